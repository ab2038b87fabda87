//! Bodies, gravity domains and the world that owns them

pub mod components;
pub mod hierarchy;
pub mod registry;
pub mod world;

// Re-export commonly used types
pub use components::{
    Body, BodyDesc, BodyId, DomainId, Fault, GravityDomain, Membership, Motion, Name,
    PhysicalProperties, TrueState, G,
};
pub use hierarchy::{DomainEvent, DomainHierarchy};
pub use registry::{BodyRegistry, RegistryError};
pub use world::{Registration, World};
