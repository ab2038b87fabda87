//! World state: body registry, domain hierarchy and simulation clock

use super::components::{
    Body, BodyDesc, BodyId, DomainId, GravityDomain, Membership, Motion, TrueState,
};
use super::hierarchy::{DomainEvent, DomainHierarchy};
use super::registry::{BodyRegistry, RegistryError};
use crate::config::SolverConfig;
use crate::orbit::{ElementsError, KeplerSolver, OrbitalElements};
use crate::spatial::Octree;
use glam::DVec3;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Outcome of a registration
#[derive(Debug, Clone, PartialEq)]
pub struct Registration {
    pub id: BodyId,
    /// Domain created for the body, if it owns one
    pub domain: Option<DomainId>,
    /// Data error detected; the body is registered but left unassigned
    pub fault: Option<ElementsError>,
}

/// Owns everything that is persisted: bodies, domains and the clock
#[derive(Debug)]
pub struct World {
    bodies: BodyRegistry,
    domains: DomainHierarchy,
    /// Simulation time (s)
    time: f64,
    solver: KeplerSolver,
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl World {
    /// Create a new empty world
    pub fn new() -> Self {
        Self::with_solver(SolverConfig::default())
    }

    pub fn with_solver(config: SolverConfig) -> Self {
        Self {
            bodies: BodyRegistry::new(),
            domains: DomainHierarchy::new(),
            time: 0.0,
            solver: KeplerSolver::new(config),
        }
    }

    /// Assemble a world from restored parts
    pub(crate) fn from_parts(
        bodies: BodyRegistry,
        domains: DomainHierarchy,
        time: f64,
        solver: KeplerSolver,
    ) -> Self {
        Self {
            bodies,
            domains,
            time,
            solver,
        }
    }

    pub fn bodies(&self) -> &BodyRegistry {
        &self.bodies
    }

    pub(crate) fn bodies_mut(&mut self) -> &mut BodyRegistry {
        &mut self.bodies
    }

    pub fn domains(&self) -> &DomainHierarchy {
        &self.domains
    }

    /// Snapshot of a body
    pub fn body(&self, id: BodyId) -> Option<Body> {
        self.bodies.get(id)
    }

    pub fn domain(&self, id: DomainId) -> Option<&GravityDomain> {
        self.domains.get(id)
    }

    pub fn solver(&self) -> &KeplerSolver {
        &self.solver
    }

    /// Simulation time (s)
    pub fn time(&self) -> f64 {
        self.time
    }

    pub(crate) fn advance_time(&mut self, dt: f64) {
        self.time += dt;
    }

    /// Register a body.
    ///
    /// A body orbiting an existing reference starts at the state its
    /// elements give at the current time. A body with mass and an influence
    /// radius gets a gravity domain. Domain membership is resolved on the
    /// next pass.
    pub fn register(&mut self, mut desc: BodyDesc) -> Result<Registration, RegistryError> {
        let mut placement_fault = None;

        if let Motion::Orbital { around, elements } = desc.motion {
            let reference = self
                .bodies
                .get(around)
                .ok_or(RegistryError::UnknownBody(around))?;

            if elements.validate().is_ok() {
                match self.initial_state(&reference, &elements) {
                    Ok((position, velocity)) => {
                        desc.position = position;
                        desc.velocity = velocity;
                    }
                    Err(error) => placement_fault = Some(error),
                }
            }
        }

        let name = desc.name.clone();
        let (id, mut fault) = self.bodies.register(desc)?;
        if fault.is_none() {
            if let Some(error) = placement_fault {
                warn!(body = %id, %error, "Body could not be placed on its orbit");
                self.bodies.set_fault(id, Some(error.clone()));
                fault = Some(error);
            }
        }

        let domain = match self.bodies.properties(id) {
            Some(properties) if properties.owns_domain() => Some(self.domains.create(
                id,
                properties.influence_radius,
                properties.gravitational_parameter(),
                None,
            )),
            _ => None,
        };

        info!(body = %id, name = %name, domain = ?domain, faulted = fault.is_some(), "Body registered");
        Ok(Registration { id, domain, fault })
    }

    fn initial_state(
        &self,
        reference: &Body,
        elements: &OrbitalElements,
    ) -> Result<(DVec3, DVec3), ElementsError> {
        let mu = self
            .domains
            .owned_by(reference.id)
            .map_or_else(|| reference.gravitational_parameter(), |d| d.gravitational_parameter);
        if !(mu.is_finite() && mu > 0.0) {
            return Err(ElementsError::GravitationalParameter(mu));
        }

        let (state, _) = self
            .solver
            .state_at(elements, mu, self.time)
            .ok_or(ElementsError::NonFinite("initial state"))?;
        Ok((
            reference.position + state.position,
            reference.velocity + state.velocity,
        ))
    }

    /// Remove a body. Its domain is deleted: child domains are re-parented
    /// and member bodies move to the enclosing domain.
    pub fn unregister(&mut self, id: BodyId) -> Result<(Body, Vec<DomainEvent>), RegistryError> {
        let body = self.bodies.unregister(id)?;
        let mut events = Vec::new();

        if let Some(owned) = self.domains.owned_by(id).map(|d| d.id) {
            if let Some(removed) = self.domains.remove(owned) {
                let mut members: Vec<BodyId> = self
                    .bodies
                    .query::<(&BodyId, &Membership)>()
                    .iter()
                    .filter(|(_, (_, membership))| membership.0 == Some(removed.id))
                    .map(|(_, (id, _))| *id)
                    .collect();
                members.sort_unstable();

                for member in members {
                    events.push(DomainEvent::Exited {
                        body: member,
                        domain: removed.id,
                    });
                    if let Some(parent) = removed.parent {
                        events.push(DomainEvent::Entered {
                            body: member,
                            domain: parent,
                        });
                    }
                    self.bodies.set_domain(member, removed.parent);
                    self.rebase(member);
                }
            }
        }

        // Anything still referencing the removed body coasts from here
        for (_, motion) in self.bodies.query_mut::<&mut Motion>() {
            if motion.reference_body() == Some(id) {
                *motion = Motion::Ballistic;
            }
        }

        info!(body = %id, name = %body.name, events = events.len(), "Body unregistered");
        Ok((body, events))
    }

    /// Apply an external state change (direct control or a maneuver).
    ///
    /// Orbiting bodies get their elements re-derived from the new state.
    pub fn update_true_state(
        &mut self,
        id: BodyId,
        position: DVec3,
        velocity: DVec3,
    ) -> Result<(), RegistryError> {
        self.bodies.update_true_state(id, position, velocity)?;
        if matches!(self.bodies.motion(id), Some(Motion::Orbital { .. })) {
            self.rebase(id);
        }
        Ok(())
    }

    /// Put a body on a new orbit, clearing any recorded fault
    pub fn set_orbit(
        &mut self,
        id: BodyId,
        around: BodyId,
        elements: OrbitalElements,
    ) -> Result<(), RegistryError> {
        if !self.bodies.contains(id) {
            return Err(RegistryError::UnknownBody(id));
        }
        if around == id {
            return Err(RegistryError::InvalidBody("a body cannot orbit itself"));
        }
        elements.validate()?;
        let reference = self
            .bodies
            .get(around)
            .ok_or(RegistryError::UnknownBody(around))?;
        let (position, velocity) = self.initial_state(&reference, &elements)?;

        self.bodies.set_state(id, TrueState { position, velocity });
        self.bodies.set_motion(id, Motion::Orbital { around, elements });
        self.bodies.set_fault(id, None);
        debug!(body = %id, around = %around, "Orbit set");
        Ok(())
    }

    /// Run the domain resolution pass and apply the result
    pub fn resolve_domains(&mut self, index: &Octree) -> Vec<DomainEvent> {
        let assignments = self.domains.resolve(&self.bodies, index);
        self.apply_assignments(assignments)
    }

    /// Move bodies to their resolved domains, raising exit/enter events and
    /// performing the patched-conic handoff.
    pub fn apply_assignments(
        &mut self,
        assignments: BTreeMap<BodyId, Option<DomainId>>,
    ) -> Vec<DomainEvent> {
        let mut events = Vec::new();

        for (id, assigned) in assignments {
            if !self.bodies.contains(id) {
                continue;
            }
            let previous = self.bodies.domain_of(id);
            let changed = previous != assigned;

            if changed {
                if let Some(domain) = previous {
                    events.push(DomainEvent::Exited { body: id, domain });
                }
                if let Some(domain) = assigned {
                    events.push(DomainEvent::Entered { body: id, domain });
                }
                debug!(body = %id, from = ?previous, to = ?assigned, "Domain transition");
            }

            self.bodies.set_domain(id, assigned);

            let owner = assigned.and_then(|d| self.domains.get(d)).map(|d| d.owner);
            let needs_rebase = match self.bodies.motion(id) {
                Some(Motion::Orbital { around, .. }) => owner != Some(around),
                Some(Motion::Ballistic) => changed && owner.is_some(),
                _ => false,
            };
            if needs_rebase {
                self.rebase(id);
            }
        }

        self.domains.sync_parents(&self.bodies);
        events
    }

    /// Re-derive a body's motion about the owner of its current domain.
    ///
    /// Bound states become orbital; unbound states and deep space coast.
    fn rebase(&mut self, id: BodyId) {
        let Some(body) = self.bodies.get(id) else {
            return;
        };
        if body.motion.is_controlled() || body.is_faulted() {
            return;
        }

        let target = body
            .domain
            .and_then(|d| self.domains.get(d))
            .and_then(|d| self.bodies.get(d.owner).map(|owner| (d, owner)));

        let motion = match target {
            None => Motion::Ballistic,
            Some((domain, owner)) => match OrbitalElements::from_state(
                body.position - owner.position,
                body.velocity - owner.velocity,
                domain.gravitational_parameter,
                self.time,
            ) {
                Ok(elements) => Motion::Orbital {
                    around: owner.id,
                    elements,
                },
                Err(error) => {
                    debug!(body = %id, domain = %domain.id, %error, "State not bound, coasting");
                    Motion::Ballistic
                }
            },
        };

        self.bodies.set_motion(id, motion);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spatial::update_spatial_index_system;

    const MU_SUN: f64 = 1.327_124_400_18e11;
    const MU_EARTH: f64 = 398_600.4418;

    fn resolve(world: &mut World) -> Vec<DomainEvent> {
        let mut index = Octree::default();
        update_spatial_index_system(world.bodies(), &mut index);
        world.resolve_domains(&index)
    }

    fn star_and_planet(world: &mut World) -> (Registration, Registration) {
        let star = world
            .register(
                BodyDesc::new("Sun")
                    .with_gravitational_parameter(MU_SUN)
                    .with_influence_radius(5.0e9),
            )
            .unwrap();
        let planet = world
            .register(
                BodyDesc::new("Earth")
                    .with_gravitational_parameter(MU_EARTH)
                    .with_influence_radius(924_000.0)
                    .orbiting(star.id, OrbitalElements::circular(1.496e8)),
            )
            .unwrap();
        (star, planet)
    }

    #[test]
    fn test_register_places_body_on_orbit() {
        let mut world = World::new();
        let (star, planet) = star_and_planet(&mut world);
        assert!(star.domain.is_some());
        assert!(planet.domain.is_some());

        let earth = world.body(planet.id).unwrap();
        assert!((earth.position - DVec3::new(1.496e8, 0.0, 0.0)).length() < 1e-3);
        let speed = (MU_SUN / 1.496e8).sqrt();
        assert!((earth.velocity.length() - speed).abs() < 1e-9);
        assert_eq!(earth.domain, None);
    }

    #[test]
    fn test_register_unknown_reference_rejected() {
        let mut world = World::new();
        let result = world.register(
            BodyDesc::new("lost").orbiting(BodyId(42), OrbitalElements::circular(1.0)),
        );
        assert_eq!(result.unwrap_err(), RegistryError::UnknownBody(BodyId(42)));
        assert!(world.bodies().is_empty());
    }

    #[test]
    fn test_orbit_kept_when_entering_reference_domain() {
        let mut world = World::new();
        let (star, planet) = star_and_planet(&mut world);
        let before = world.body(planet.id).unwrap().motion;

        let events = resolve(&mut world);
        assert_eq!(
            events,
            vec![DomainEvent::Entered {
                body: planet.id,
                domain: star.domain.unwrap()
            }]
        );
        assert_eq!(world.body(planet.id).unwrap().motion, before);
        assert_eq!(
            world.domain(planet.domain.unwrap()).unwrap().parent,
            star.domain
        );
    }

    #[test]
    fn test_handoff_rederives_elements_about_new_owner() {
        let mut world = World::new();
        let (star, planet) = star_and_planet(&mut world);
        resolve(&mut world);

        // A craft in low orbit around the planet, described relative to the star
        let earth = world.body(planet.id).unwrap();
        let offset = DVec3::new(7_000.0, 0.0, 0.0);
        let local_speed = (MU_EARTH / 7_000.0).sqrt();
        let craft = world
            .register(
                BodyDesc::new("craft")
                    .at(earth.position + offset)
                    .with_velocity(earth.velocity + DVec3::new(0.0, local_speed, 0.0)),
            )
            .unwrap();

        let events = resolve(&mut world);
        assert_eq!(
            events,
            vec![DomainEvent::Entered {
                body: craft.id,
                domain: planet.domain.unwrap()
            }]
        );

        let body = world.body(craft.id).unwrap();
        match body.motion {
            Motion::Orbital { around, elements } => {
                assert_eq!(around, planet.id);
                assert!((elements.semi_major_axis - 7_000.0).abs() < 1e-3);
                assert!(elements.eccentricity < 1e-6);
            }
            other => panic!("expected orbital motion, got {other:?}"),
        }
        assert_ne!(body.domain, star.domain);
    }

    #[test]
    fn test_unbound_state_coasts() {
        let mut world = World::new();
        let (_, planet) = star_and_planet(&mut world);
        resolve(&mut world);

        let earth = world.body(planet.id).unwrap();
        let craft = world
            .register(
                BodyDesc::new("flyby")
                    .at(earth.position + DVec3::new(50_000.0, 0.0, 0.0))
                    .with_velocity(earth.velocity + DVec3::new(0.0, 20.0, 0.0)),
            )
            .unwrap();
        resolve(&mut world);

        let body = world.body(craft.id).unwrap();
        assert_eq!(body.domain, planet.domain);
        assert_eq!(body.motion, Motion::Ballistic);
    }

    #[test]
    fn test_unregister_moves_members_to_parent() {
        let mut world = World::new();
        let (star, planet) = star_and_planet(&mut world);
        resolve(&mut world);

        let moon = world
            .register(
                BodyDesc::new("Moon")
                    .with_gravitational_parameter(4_902.8)
                    .with_influence_radius(66_100.0)
                    .orbiting(planet.id, OrbitalElements::circular(384_400.0)),
            )
            .unwrap();
        resolve(&mut world);
        assert_eq!(world.body(moon.id).unwrap().domain, planet.domain);
        assert_eq!(world.domain(moon.domain.unwrap()).unwrap().parent, planet.domain);

        let (_, events) = world.unregister(planet.id).unwrap();
        assert_eq!(
            events,
            vec![
                DomainEvent::Exited {
                    body: moon.id,
                    domain: planet.domain.unwrap()
                },
                DomainEvent::Entered {
                    body: moon.id,
                    domain: star.domain.unwrap()
                },
            ]
        );
        assert!(world.domain(planet.domain.unwrap()).is_none());
        assert_eq!(world.domain(moon.domain.unwrap()).unwrap().parent, star.domain);
        assert_eq!(world.body(moon.id).unwrap().domain, star.domain);
        assert_eq!(
            world.body(moon.id).unwrap().motion.reference_body(),
            Some(star.id)
        );
    }

    #[test]
    fn test_faulted_body_corrected_by_set_orbit() {
        let mut world = World::new();
        let (_, planet) = star_and_planet(&mut world);

        let bad = OrbitalElements::circular(7_000.0).with_eccentricity(f64::NAN);
        let scout = world
            .register(BodyDesc::new("scout").orbiting(planet.id, bad))
            .unwrap();
        assert_eq!(scout.fault, Some(ElementsError::NonFinite("eccentricity")));
        assert!(world.body(scout.id).unwrap().is_faulted());

        assert!(world
            .set_orbit(scout.id, planet.id, OrbitalElements::circular(-1.0))
            .is_err());
        world
            .set_orbit(scout.id, planet.id, OrbitalElements::circular(7_000.0))
            .unwrap();

        let body = world.body(scout.id).unwrap();
        assert!(!body.is_faulted());
        let earth = world.body(planet.id).unwrap();
        assert!(((body.position - earth.position).length() - 7_000.0).abs() < 1e-6);
    }

    #[test]
    fn test_maneuver_rederives_elements() {
        let mut world = World::new();
        let (_, planet) = star_and_planet(&mut world);
        let sat = world
            .register(BodyDesc::new("sat").orbiting(planet.id, OrbitalElements::circular(7_000.0)))
            .unwrap();
        resolve(&mut world);

        let body = world.body(sat.id).unwrap();
        let earth = world.body(planet.id).unwrap();
        let prograde = (body.velocity - earth.velocity).normalize();
        world
            .update_true_state(sat.id, body.position, body.velocity + prograde * 0.5)
            .unwrap();

        let elements = *world.body(sat.id).unwrap().motion.elements().unwrap();
        assert!(elements.semi_major_axis > 7_000.0);
        assert!((elements.periapsis_radius() - 7_000.0).abs() < 1e-3);

        assert!(world
            .update_true_state(sat.id, DVec3::NAN, DVec3::ZERO)
            .is_err());
    }
}
