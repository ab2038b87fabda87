//! Per-tick orbit propagation

use super::elements::OrbitalElements;
use crate::core::entity::{BodyId, Fault, Membership, Motion, TrueState, World};
use rayon::prelude::*;
use std::collections::BTreeMap;
use tracing::{debug, trace, warn};

/// Counts from one propagation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OrbitReport {
    /// Orbiting bodies moved by the solver
    pub solved: usize,
    /// Ballistic bodies moved in a straight line
    pub coasted: usize,
    /// Solves that hit the iteration cap
    pub unconverged: usize,
    /// Solves whose result was not finite and was dropped
    pub rejected: usize,
}

struct Job {
    id: BodyId,
    owner: BodyId,
    elements: OrbitalElements,
    mu: f64,
}

/// Move every body for the current world time.
///
/// Ballistic bodies coast by `dt` first. Orbiting bodies are solved about
/// their domain owner level by level, parents before children, so a moon
/// sees its planet's state from this same pass. Controlled and faulted
/// bodies are left alone.
pub fn update_orbits_system(world: &mut World, dt: f64) -> OrbitReport {
    let solver = *world.solver();
    let time = world.time();
    let mut report = OrbitReport::default();

    let mut levels: BTreeMap<usize, Vec<Job>> = BTreeMap::new();

    for (_, (id, membership, motion, fault)) in world
        .bodies()
        .query::<(&BodyId, &Membership, &Motion, Option<&Fault>)>()
        .iter()
    {
        if fault.is_some() {
            continue;
        }
        let Motion::Orbital { around, elements } = *motion else {
            continue;
        };
        let Some(domain) = membership.0.and_then(|d| world.domains().get(d)) else {
            continue;
        };
        if domain.owner != around {
            continue;
        }
        levels
            .entry(world.domains().depth(domain.id))
            .or_default()
            .push(Job {
                id: *id,
                owner: around,
                elements,
                mu: domain.gravitational_parameter,
            });
    }

    for (_, (motion, state, fault)) in world
        .bodies_mut()
        .query_mut::<(&Motion, &mut TrueState, Option<&Fault>)>()
    {
        if fault.is_none() && *motion == Motion::Ballistic {
            state.position += state.velocity * dt;
            report.coasted += 1;
        }
    }

    for (depth, jobs) in levels {
        let results: Vec<_> = jobs
            .par_iter()
            .map(|job| (job.id, job.owner, solver.state_at(&job.elements, job.mu, time)))
            .collect();

        trace!(depth, bodies = results.len(), "Solved domain level");

        for (id, owner, result) in results {
            let Some((state, solution)) = result else {
                warn!(body = %id, "Kepler solver produced a non-finite state, keeping previous");
                report.rejected += 1;
                continue;
            };
            if !solution.converged {
                trace!(
                    body = %id,
                    iterations = solution.iterations,
                    "Kepler solver did not converge"
                );
                report.unconverged += 1;
            }

            let Some(origin) = world.bodies().state(owner) else {
                continue;
            };
            world.bodies_mut().set_state(
                id,
                TrueState {
                    position: origin.position + state.position,
                    velocity: origin.velocity + state.velocity,
                },
            );
            report.solved += 1;
        }
    }

    if report.unconverged > 0 {
        warn!(
            bodies = report.unconverged,
            "Kepler solver hit the iteration cap, using last iterates"
        );
    }
    debug!(?report, "Orbits updated");
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::entity::BodyDesc;
    use crate::spatial::{update_spatial_index_system, Octree};
    use glam::DVec3;

    const MU_EARTH: f64 = 398_600.4418;

    fn resolve(world: &mut World) {
        let mut index = Octree::default();
        update_spatial_index_system(world.bodies(), &mut index);
        world.resolve_domains(&index);
    }

    #[test]
    fn test_children_follow_parent_in_same_pass() {
        let mut world = World::new();
        let planet = world
            .register(
                BodyDesc::new("planet")
                    .with_gravitational_parameter(MU_EARTH)
                    .with_influence_radius(1.0e6)
                    .with_velocity(DVec3::new(10.0, 0.0, 0.0)),
            )
            .unwrap();
        let moon = world
            .register(
                BodyDesc::new("moon")
                    .with_gravitational_parameter(4_902.8)
                    .with_influence_radius(60_000.0)
                    .orbiting(planet.id, OrbitalElements::circular(384_400.0)),
            )
            .unwrap();
        let scout = world
            .register(BodyDesc::new("scout").orbiting(moon.id, OrbitalElements::circular(2_000.0)))
            .unwrap();
        resolve(&mut world);

        world.advance_time(60.0);
        let report = update_orbits_system(&mut world, 60.0);
        assert_eq!(report.solved, 2);
        assert_eq!(report.coasted, 1);

        let planet_pos = world.body(planet.id).unwrap().position;
        assert_eq!(planet_pos, DVec3::new(600.0, 0.0, 0.0));
        let moon_pos = world.body(moon.id).unwrap().position;
        assert!(((moon_pos - planet_pos).length() - 384_400.0).abs() < 1e-6);
        let scout_pos = world.body(scout.id).unwrap().position;
        assert!(((scout_pos - moon_pos).length() - 2_000.0).abs() < 1e-6);
    }

    #[test]
    fn test_controlled_and_faulted_bodies_untouched() {
        let mut world = World::new();
        let planet = world
            .register(
                BodyDesc::new("planet")
                    .with_gravitational_parameter(MU_EARTH)
                    .with_influence_radius(1.0e6)
                    .controlled(),
            )
            .unwrap();
        let ship = world
            .register(
                BodyDesc::new("ship")
                    .at(DVec3::new(7_000.0, 0.0, 0.0))
                    .with_velocity(DVec3::Y)
                    .controlled(),
            )
            .unwrap();
        let broken = world
            .register(
                BodyDesc::new("broken")
                    .orbiting(planet.id, OrbitalElements::circular(7_000.0).with_eccentricity(2.0)),
            )
            .unwrap();
        resolve(&mut world);

        world.advance_time(10.0);
        let report = update_orbits_system(&mut world, 10.0);
        assert_eq!(report, OrbitReport::default());
        assert_eq!(world.body(ship.id).unwrap().position, DVec3::new(7_000.0, 0.0, 0.0));
        assert_eq!(world.body(broken.id).unwrap().position, DVec3::ZERO);
    }
}
