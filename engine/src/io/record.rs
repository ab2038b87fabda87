//! Versioned save record layout

use super::PersistenceError;
use crate::config::SolverConfig;
use crate::core::coordinates::BubbleConfig;
use crate::core::entity::{
    Body, BodyId, BodyRegistry, DomainHierarchy, DomainId, GravityDomain, Motion, World,
};
use crate::orbit::KeplerSolver;
use chrono::{DateTime, Utc};
use glam::DVec3;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

/// Save format version. Loaders only accept their own major version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatVersion {
    pub major: u32,
    pub minor: u32,
}

impl FormatVersion {
    pub const CURRENT: FormatVersion = FormatVersion { major: 1, minor: 0 };
}

impl std::fmt::Display for FormatVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// True-space state of one body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BodyRecord {
    pub id: BodyId,
    pub name: String,
    pub position: DVec3,
    pub velocity: DVec3,
    pub mass: f64,
    pub radius: f64,
    pub apparent_radius: f64,
    pub reference_distance: f64,
    pub influence_radius: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gravitational_parameter: Option<f64>,
    pub domain: Option<DomainId>,
    pub motion: Motion,
}

impl From<&Body> for BodyRecord {
    fn from(body: &Body) -> Self {
        Self {
            id: body.id,
            name: body.name.clone(),
            position: body.position,
            velocity: body.velocity,
            mass: body.mass,
            radius: body.radius,
            apparent_radius: body.apparent_radius,
            reference_distance: body.reference_distance,
            influence_radius: body.influence_radius,
            gravitational_parameter: body.gravitational_parameter,
            domain: body.domain,
            motion: body.motion,
        }
    }
}

impl BodyRecord {
    /// Faults are not stored; they are detected again from the elements
    fn into_body(self) -> Body {
        let fault = self.motion.elements().and_then(|e| e.validate().err());
        Body {
            id: self.id,
            name: self.name,
            position: self.position,
            velocity: self.velocity,
            mass: self.mass,
            radius: self.radius,
            apparent_radius: self.apparent_radius,
            reference_distance: self.reference_distance,
            influence_radius: self.influence_radius,
            gravitational_parameter: self.gravitational_parameter,
            domain: if fault.is_some() { None } else { self.domain },
            motion: self.motion,
            fault,
        }
    }
}

/// Snapshot of everything needed to restore a session.
///
/// Holds true-space state only; projected coordinates are derived each tick
/// and never saved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveRecord {
    pub format_version: FormatVersion,
    pub saved_at: DateTime<Utc>,
    /// Simulation time (s)
    pub sim_time: f64,
    pub bubble: BubbleConfig,
    /// Bound observer at save time
    pub observer: Option<BodyId>,
    pub next_body_id: u64,
    pub next_domain_id: u64,
    pub bodies: Vec<BodyRecord>,
    pub domains: Vec<GravityDomain>,
}

impl SaveRecord {
    /// Copy the persisted state out of a world
    pub fn capture(world: &World, bubble: &BubbleConfig, observer: Option<BodyId>) -> Self {
        Self {
            format_version: FormatVersion::CURRENT,
            saved_at: Utc::now(),
            sim_time: world.time(),
            bubble: *bubble,
            observer,
            next_body_id: world.bodies().next_id(),
            next_domain_id: world.domains().next_id(),
            bodies: world.bodies().iter().map(|body| BodyRecord::from(&body)).collect(),
            domains: world.domains().iter().copied().collect(),
        }
    }

    pub fn to_json(&self) -> Result<Vec<u8>, PersistenceError> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Parse and validate a record.
    ///
    /// The version is checked before the rest of the document is
    /// interpreted, so a newer layout is rejected rather than half-read.
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self, PersistenceError> {
        let value: serde_json::Value = serde_json::from_slice(bytes)?;
        let version: FormatVersion = value
            .get("format_version")
            .cloned()
            .map(serde_json::from_value)
            .transpose()?
            .ok_or_else(|| PersistenceError::Corrupt("missing format version".to_string()))?;

        if version.major != FormatVersion::CURRENT.major {
            return Err(PersistenceError::UnsupportedVersion {
                found: version,
                supported: FormatVersion::CURRENT,
            });
        }

        let record: SaveRecord = serde_json::from_value(value)?;
        record.validate()?;
        Ok(record)
    }

    /// Check referential integrity
    pub fn validate(&self) -> Result<(), PersistenceError> {
        self.bubble
            .validate()
            .map_err(|e| PersistenceError::Corrupt(e.to_string()))?;
        if !self.sim_time.is_finite() {
            return Err(PersistenceError::Corrupt("simulation time is not finite".to_string()));
        }

        let mut body_ids = HashSet::new();
        for body in &self.bodies {
            if !body_ids.insert(body.id) {
                return Err(PersistenceError::Corrupt(format!("duplicate {}", body.id)));
            }
            if !(body.position.is_finite() && body.velocity.is_finite()) {
                return Err(PersistenceError::Corrupt(format!("non-finite state for {}", body.id)));
            }
        }

        let mut domain_ids = HashSet::new();
        let mut owners = HashSet::new();
        for domain in &self.domains {
            if !domain_ids.insert(domain.id) {
                return Err(PersistenceError::Corrupt(format!("duplicate {}", domain.id)));
            }
            if !body_ids.contains(&domain.owner) || !owners.insert(domain.owner) {
                return Err(PersistenceError::Corrupt(format!(
                    "{} has a missing or shared owner {}",
                    domain.id, domain.owner
                )));
            }
        }
        for domain in &self.domains {
            if let Some(parent) = domain.parent {
                if !domain_ids.contains(&parent) {
                    return Err(PersistenceError::Corrupt(format!(
                        "{} references missing parent {}",
                        domain.id, parent
                    )));
                }
            }
        }
        for body in &self.bodies {
            if let Some(domain) = body.domain {
                if !domain_ids.contains(&domain) {
                    return Err(PersistenceError::Corrupt(format!(
                        "{} references missing {}",
                        body.id, domain
                    )));
                }
            }
        }
        if let Some(observer) = self.observer {
            if !body_ids.contains(&observer) {
                return Err(PersistenceError::Corrupt(format!("observer {observer} is missing")));
            }
        }

        Ok(())
    }

    /// Build a fresh world from this record
    pub fn into_world(self, solver: SolverConfig) -> World {
        debug!(
            bodies = self.bodies.len(),
            domains = self.domains.len(),
            sim_time = self.sim_time,
            "Restoring world from save record"
        );
        let bodies = BodyRegistry::restore(
            self.bodies.into_iter().map(BodyRecord::into_body),
            self.next_body_id,
        );
        let domains = DomainHierarchy::restore(self.domains, self.next_domain_id);
        World::from_parts(bodies, domains, self.sim_time, KeplerSolver::new(solver))
    }
}
