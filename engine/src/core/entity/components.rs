//! Core records for bodies and gravity domains

use crate::orbit::{ElementsError, OrbitalElements};
use glam::DVec3;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Gravitational constant in km³ kg⁻¹ s⁻²
pub const G: f64 = 6.674_30e-20;

/// Stable body identifier. Allocated in increasing order and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BodyId(pub u64);

impl fmt::Display for BodyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "body#{}", self.0)
    }
}

/// Stable gravity domain identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DomainId(pub u64);

impl fmt::Display for DomainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "domain#{}", self.0)
    }
}

/// How a body is moved each tick
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Motion {
    /// Propagated by the Kepler solver about `around`
    Orbital {
        around: BodyId,
        elements: OrbitalElements,
    },
    /// Coasting in a straight line
    Ballistic,
    /// Moved by external physics only
    Controlled,
}

impl Motion {
    pub fn elements(&self) -> Option<&OrbitalElements> {
        match self {
            Motion::Orbital { elements, .. } => Some(elements),
            _ => None,
        }
    }

    pub fn reference_body(&self) -> Option<BodyId> {
        match self {
            Motion::Orbital { around, .. } => Some(*around),
            _ => None,
        }
    }

    pub fn is_controlled(&self) -> bool {
        matches!(self, Motion::Controlled)
    }
}

/// Display name component
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Name(pub String);

/// True-space position (km) and velocity (km/s)
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TrueState {
    pub position: DVec3,
    pub velocity: DVec3,
}

/// Fixed physical description of a body
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PhysicalProperties {
    /// Mass (kg)
    pub mass: f64,
    /// True radius (km)
    pub radius: f64,
    /// Apparent radius in world units at `reference_distance`
    pub apparent_radius: f64,
    /// Distance (km) at which `apparent_radius` is calibrated
    pub reference_distance: f64,
    /// Radius of the domain this body owns, 0 if it owns none
    pub influence_radius: f64,
    /// Explicit gravitational parameter, overriding `G * mass`
    pub gravitational_parameter: Option<f64>,
}

impl PhysicalProperties {
    /// Gravitational parameter (km³/s²)
    pub fn gravitational_parameter(&self) -> f64 {
        self.gravitational_parameter.unwrap_or(G * self.mass)
    }

    /// Whether registering this body creates a gravity domain
    pub fn owns_domain(&self) -> bool {
        self.influence_radius > 0.0 && self.gravitational_parameter() > 0.0
    }
}

/// Current gravity domain, `None` in deep space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Membership(pub Option<DomainId>);

/// Data error recorded against a body. Present only while the body is
/// faulted; faulted bodies are left unassigned and are not moved.
#[derive(Debug, Clone, PartialEq)]
pub struct Fault(pub ElementsError);

/// Owned snapshot of a body's components
#[derive(Debug, Clone, PartialEq)]
pub struct Body {
    pub id: BodyId,
    pub name: String,
    /// True-space position (km)
    pub position: DVec3,
    /// True-space velocity (km/s)
    pub velocity: DVec3,
    /// Mass (kg)
    pub mass: f64,
    /// True radius (km)
    pub radius: f64,
    /// Apparent radius in world units at `reference_distance`
    pub apparent_radius: f64,
    /// Distance (km) at which `apparent_radius` is calibrated
    pub reference_distance: f64,
    /// Radius of the domain this body owns, 0 if it owns none
    pub influence_radius: f64,
    /// Explicit gravitational parameter, overriding `G * mass`
    pub gravitational_parameter: Option<f64>,
    /// Current gravity domain, `None` in deep space
    pub domain: Option<DomainId>,
    pub motion: Motion,
    /// Last data error detected for this body. Faulted bodies are left
    /// unassigned and are not moved until corrected.
    pub fault: Option<ElementsError>,
}

impl Body {
    pub fn properties(&self) -> PhysicalProperties {
        PhysicalProperties {
            mass: self.mass,
            radius: self.radius,
            apparent_radius: self.apparent_radius,
            reference_distance: self.reference_distance,
            influence_radius: self.influence_radius,
            gravitational_parameter: self.gravitational_parameter,
        }
    }

    pub fn state(&self) -> TrueState {
        TrueState {
            position: self.position,
            velocity: self.velocity,
        }
    }

    /// Gravitational parameter (km³/s²)
    pub fn gravitational_parameter(&self) -> f64 {
        self.properties().gravitational_parameter()
    }

    /// Whether registering this body creates a gravity domain
    pub fn owns_domain(&self) -> bool {
        self.properties().owns_domain()
    }

    pub fn is_faulted(&self) -> bool {
        self.fault.is_some()
    }
}

/// Description of a body to register
#[derive(Debug, Clone, PartialEq)]
pub struct BodyDesc {
    pub name: String,
    pub position: DVec3,
    pub velocity: DVec3,
    pub mass: f64,
    pub radius: f64,
    pub apparent_radius: f64,
    pub reference_distance: f64,
    pub influence_radius: f64,
    pub gravitational_parameter: Option<f64>,
    pub motion: Motion,
}

impl BodyDesc {
    /// A massless point at the origin, coasting
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            position: DVec3::ZERO,
            velocity: DVec3::ZERO,
            mass: 0.0,
            radius: 0.0,
            apparent_radius: 0.0,
            reference_distance: 0.0,
            influence_radius: 0.0,
            gravitational_parameter: None,
            motion: Motion::Ballistic,
        }
    }

    pub fn at(mut self, position: DVec3) -> Self {
        self.position = position;
        self
    }

    pub fn with_velocity(mut self, velocity: DVec3) -> Self {
        self.velocity = velocity;
        self
    }

    pub fn with_mass(mut self, mass: f64) -> Self {
        self.mass = mass;
        self
    }

    pub fn with_radius(mut self, radius: f64) -> Self {
        self.radius = radius;
        self
    }

    pub fn with_apparent_radius(mut self, apparent_radius: f64, reference_distance: f64) -> Self {
        self.apparent_radius = apparent_radius;
        self.reference_distance = reference_distance;
        self
    }

    pub fn with_influence_radius(mut self, influence_radius: f64) -> Self {
        self.influence_radius = influence_radius;
        self
    }

    pub fn with_gravitational_parameter(mut self, mu: f64) -> Self {
        self.gravitational_parameter = Some(mu);
        self
    }

    /// Orbit `around` with the given elements. The initial state is derived
    /// from the elements at registration time.
    pub fn orbiting(mut self, around: BodyId, elements: OrbitalElements) -> Self {
        self.motion = Motion::Orbital { around, elements };
        self
    }

    pub fn controlled(mut self) -> Self {
        self.motion = Motion::Controlled;
        self
    }

    pub fn ballistic(mut self) -> Self {
        self.motion = Motion::Ballistic;
        self
    }
}

/// A region around a massing body in which it dominates gravity
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GravityDomain {
    pub id: DomainId,
    /// Body at the centre of the domain
    pub owner: BodyId,
    /// Influence radius (km)
    pub influence_radius: f64,
    /// Enclosing domain, `None` for a root
    pub parent: Option<DomainId>,
    /// Gravitational parameter of the owner (km³/s²)
    pub gravitational_parameter: f64,
}
