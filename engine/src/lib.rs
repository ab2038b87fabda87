//! Farspace simulation engine
//!
//! Tracks bodies across astronomical distances in true space, assigns them
//! to nested gravity domains, propagates them on patched-conic orbits and
//! presents everything inside a bounded bubble around a single observer.

pub mod app;
pub mod config;
pub mod core;
pub mod events;
pub mod io;
pub mod observer;
pub mod orbit;
pub mod spatial;

// Re-export commonly used types
pub mod prelude {
    // World types
    pub use crate::core::entity::{
        Body, BodyDesc, BodyId, DomainEvent, DomainId, GravityDomain, Motion, Registration,
        RegistryError, World,
    };

    // Bubble types
    pub use crate::core::coordinates::{BubbleConfig, ProjectionCurve};
    pub use crate::observer::{BubbleController, BubbleEvent, ProjectedBody};

    // Orbit types
    pub use crate::orbit::{ElementsError, KeplerSolver, OrbitalElements};

    // Spatial types
    pub use crate::spatial::{Neighbor, Octree};

    // IO types
    pub use crate::io::{
        FileStore, PersistenceError, PersistenceEvent, SaveRecord, SaveStore, SaveTrigger,
    };

    // Config types
    pub use crate::config::{
        ConfigError, PersistenceConfig, SimulationConfig, SolverConfig, SpatialConfig,
    };

    // App types
    pub use crate::app::{Simulation, SimulationBuilder, SimulationError};
    pub use crate::events::SimEvent;

    // Math types
    pub use glam::DVec3;
}

/// Initialize logging for the engine
pub fn init_logging() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
