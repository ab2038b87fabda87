//! Body registry owning every trackable entity

use super::components::{
    Body, BodyDesc, BodyId, DomainId, Fault, Membership, Motion, Name, PhysicalProperties,
    TrueState,
};
use crate::orbit::ElementsError;
use glam::DVec3;
use hecs::Entity;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, warn};

/// Errors raised by registry and world operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RegistryError {
    #[error("unknown body {0}")]
    UnknownBody(BodyId),

    #[error("invalid body description: {0}")]
    InvalidBody(&'static str),

    #[error("non-finite state for {0}")]
    NonFiniteState(BodyId),

    #[error("orbital elements rejected: {0}")]
    Elements(#[from] ElementsError),
}

/// Owns body entities in a `hecs::World`.
///
/// Bodies are spawned with `BodyId`, `Name`, `TrueState`,
/// `PhysicalProperties`, `Membership` and `Motion` components, plus `Fault`
/// while faulted. The id map keeps iteration in id order and ids are never
/// handed out twice.
pub struct BodyRegistry {
    world: hecs::World,
    entities: BTreeMap<BodyId, Entity>,
    next_id: u64,
}

impl fmt::Debug for BodyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BodyRegistry")
            .field("bodies", &self.entities.len())
            .field("next_id", &self.next_id)
            .finish()
    }
}

impl Default for BodyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl BodyRegistry {
    pub fn new() -> Self {
        Self {
            world: hecs::World::new(),
            entities: BTreeMap::new(),
            next_id: 1,
        }
    }

    /// Rebuild a registry from a snapshot
    pub(crate) fn restore(bodies: impl IntoIterator<Item = Body>, next_id: u64) -> Self {
        let mut registry = Self::new();
        for body in bodies {
            registry.spawn(body);
        }
        let floor = registry.entities.keys().next_back().map_or(1, |id| id.0 + 1);
        registry.next_id = next_id.max(floor);
        registry
    }

    fn spawn(&mut self, body: Body) {
        let properties = body.properties();
        let state = body.state();
        let entity = self.world.spawn((
            body.id,
            Name(body.name),
            state,
            properties,
            Membership(body.domain),
            body.motion,
        ));
        if let Some(error) = body.fault {
            let _ = self.world.insert_one(entity, Fault(error));
        }
        if let Some(stale) = self.entities.insert(body.id, entity) {
            let _ = self.world.despawn(stale);
        }
    }

    /// Add a body with a fresh id and no domain.
    ///
    /// Descriptions with non-finite physical values are rejected. Bad orbital
    /// elements are not: the body is registered with the error recorded in
    /// its fault component, and the error is returned alongside the id.
    pub fn register(
        &mut self,
        desc: BodyDesc,
    ) -> Result<(BodyId, Option<ElementsError>), RegistryError> {
        validate_desc(&desc)?;

        let fault = desc.motion.elements().and_then(|e| e.validate().err());

        let id = BodyId(self.next_id);
        self.next_id += 1;

        if let Some(error) = &fault {
            warn!(body = %id, name = %desc.name, %error, "Registered body with invalid orbit");
        } else {
            debug!(body = %id, name = %desc.name, "Registered body");
        }

        self.spawn(Body {
            id,
            name: desc.name,
            position: desc.position,
            velocity: desc.velocity,
            mass: desc.mass,
            radius: desc.radius,
            apparent_radius: desc.apparent_radius,
            reference_distance: desc.reference_distance,
            influence_radius: desc.influence_radius,
            gravitational_parameter: desc.gravitational_parameter,
            domain: None,
            motion: desc.motion,
            fault: fault.clone(),
        });

        Ok((id, fault))
    }

    /// Remove a body, returning its last record
    pub fn unregister(&mut self, id: BodyId) -> Result<Body, RegistryError> {
        let body = self.get(id).ok_or(RegistryError::UnknownBody(id))?;
        if let Some(entity) = self.entities.remove(&id) {
            let _ = self.world.despawn(entity);
        }
        debug!(body = %id, name = %body.name, "Unregistered body");
        Ok(body)
    }

    /// Snapshot of a body's components
    pub fn get(&self, id: BodyId) -> Option<Body> {
        let entity = *self.entities.get(&id)?;
        self.snapshot(entity)
    }

    fn snapshot(&self, entity: Entity) -> Option<Body> {
        let mut query = self
            .world
            .query_one::<(
                &BodyId,
                &Name,
                &TrueState,
                &PhysicalProperties,
                &Membership,
                &Motion,
                Option<&Fault>,
            )>(entity)
            .ok()?;
        let (id, name, state, properties, membership, motion, fault) = query.get()?;
        Some(Body {
            id: *id,
            name: name.0.clone(),
            position: state.position,
            velocity: state.velocity,
            mass: properties.mass,
            radius: properties.radius,
            apparent_radius: properties.apparent_radius,
            reference_distance: properties.reference_distance,
            influence_radius: properties.influence_radius,
            gravitational_parameter: properties.gravitational_parameter,
            domain: membership.0,
            motion: *motion,
            fault: fault.map(|f| f.0.clone()),
        })
    }

    fn component<T: hecs::Component + Copy>(&self, id: BodyId) -> Option<T> {
        let entity = *self.entities.get(&id)?;
        self.world.get::<&T>(entity).ok().map(|c| *c)
    }

    pub fn state(&self, id: BodyId) -> Option<TrueState> {
        self.component::<TrueState>(id)
    }

    pub fn properties(&self, id: BodyId) -> Option<PhysicalProperties> {
        self.component::<PhysicalProperties>(id)
    }

    pub fn motion(&self, id: BodyId) -> Option<Motion> {
        self.component::<Motion>(id)
    }

    /// Current domain; `None` for unknown bodies and deep space alike
    pub fn domain_of(&self, id: BodyId) -> Option<DomainId> {
        self.component::<Membership>(id).and_then(|m| m.0)
    }

    pub fn is_faulted(&self, id: BodyId) -> bool {
        self.entities
            .get(&id)
            .is_some_and(|&entity| self.world.get::<&Fault>(entity).is_ok())
    }

    fn component_mut<T: hecs::Component>(&mut self, id: BodyId) -> Option<&mut T> {
        let entity = *self.entities.get(&id)?;
        self.world.query_one_mut::<&mut T>(entity).ok()
    }

    pub(crate) fn set_state(&mut self, id: BodyId, state: TrueState) {
        if let Some(current) = self.component_mut::<TrueState>(id) {
            *current = state;
        }
    }

    pub(crate) fn set_motion(&mut self, id: BodyId, motion: Motion) {
        if let Some(current) = self.component_mut::<Motion>(id) {
            *current = motion;
        }
    }

    pub(crate) fn set_domain(&mut self, id: BodyId, domain: Option<DomainId>) {
        if let Some(current) = self.component_mut::<Membership>(id) {
            current.0 = domain;
        }
    }

    /// Record or clear a body's fault
    pub(crate) fn set_fault(&mut self, id: BodyId, fault: Option<ElementsError>) {
        let Some(&entity) = self.entities.get(&id) else {
            return;
        };
        match fault {
            Some(error) => {
                let _ = self.world.insert_one(entity, Fault(error));
            }
            None => {
                let _ = self.world.remove_one::<Fault>(entity);
            }
        }
    }

    /// Overwrite a body's true-space position and velocity
    pub fn update_true_state(
        &mut self,
        id: BodyId,
        position: DVec3,
        velocity: DVec3,
    ) -> Result<(), RegistryError> {
        let state = self
            .component_mut::<TrueState>(id)
            .ok_or(RegistryError::UnknownBody(id))?;
        if !(position.is_finite() && velocity.is_finite()) {
            return Err(RegistryError::NonFiniteState(id));
        }
        *state = TrueState { position, velocity };
        Ok(())
    }

    pub fn contains(&self, id: BodyId) -> bool {
        self.entities.contains_key(&id)
    }

    /// Body snapshots in id order
    pub fn iter(&self) -> impl Iterator<Item = Body> + '_ {
        self.entities
            .values()
            .filter_map(|&entity| self.snapshot(entity))
    }

    /// Query body components directly. Iteration follows storage order, not
    /// id order.
    pub fn query<Q: hecs::Query>(&self) -> hecs::QueryBorrow<'_, Q> {
        self.world.query::<Q>()
    }

    pub(crate) fn query_mut<Q: hecs::Query>(&mut self) -> hecs::QueryMut<'_, Q> {
        self.world.query_mut::<Q>()
    }

    pub fn ids(&self) -> impl Iterator<Item = BodyId> + '_ {
        self.entities.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Id the next registration will receive
    pub fn next_id(&self) -> u64 {
        self.next_id
    }
}

fn validate_desc(desc: &BodyDesc) -> Result<(), RegistryError> {
    if !desc.position.is_finite() {
        return Err(RegistryError::InvalidBody("position is not finite"));
    }
    if !desc.velocity.is_finite() {
        return Err(RegistryError::InvalidBody("velocity is not finite"));
    }
    let scalars = [
        (desc.mass, "mass must be finite and non-negative"),
        (desc.radius, "radius must be finite and non-negative"),
        (desc.apparent_radius, "apparent radius must be finite and non-negative"),
        (desc.reference_distance, "reference distance must be finite and non-negative"),
        (desc.influence_radius, "influence radius must be finite and non-negative"),
    ];
    for (value, message) in scalars {
        if !(value.is_finite() && value >= 0.0) {
            return Err(RegistryError::InvalidBody(message));
        }
    }
    if let Some(mu) = desc.gravitational_parameter {
        if !(mu.is_finite() && mu > 0.0) {
            return Err(RegistryError::InvalidBody(
                "gravitational parameter must be finite and positive",
            ));
        }
    }
    Ok(())
}
