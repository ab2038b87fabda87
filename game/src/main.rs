//! Headless driver: builds a small star system, flies a ship through it and
//! exercises save/load

use farspace_engine::prelude::*;
use std::f64::consts::PI;
use tracing::info;

const MU_SUN: f64 = 1.327_124_400_18e11;
const MU_EARTH: f64 = 398_600.4418;
const MU_MOON: f64 = 4_902.800_066;

/// Simulated seconds per tick at warp 1
const TICK: f64 = 1.0;

fn main() -> Result<(), SimulationError> {
    // Initialize logging
    farspace_engine::init_logging();
    info!("Starting farspace headless demo");

    let mut config = match std::env::args().nth(1) {
        Some(path) => SimulationConfig::load_from_file(path)?,
        None => SimulationConfig::default(),
    };
    config.time_warp = 600.0;

    let mut sim = Simulation::new(config)?;
    let system = create_demo_system(&mut sim)?;

    sim.bind_observer(system.ship)?;
    run(&mut sim, 200);

    // Burn prograde and watch the ship climb out of low orbit
    let burn = match (sim.world().body(system.ship), sim.world().body(system.earth)) {
        (Some(ship), Some(earth)) => {
            let prograde = (ship.velocity - earth.velocity).normalize_or_zero();
            Some((ship.position, ship.velocity + prograde * 3.1))
        }
        _ => None,
    };
    if let Some((position, velocity)) = burn {
        sim.update_true_state(system.ship, position, velocity)?;
        info!("Trans-lunar burn applied");
    }
    run(&mut sim, 400);

    // Hand the bubble to the Moon for a while
    sim.bind_observer(system.moon)?;
    run(&mut sim, 50);

    sim.checkpoint()?;
    sim.save("demo")?;
    for event in sim.flush_persistence() {
        info!(?event, "Persistence");
    }

    let before = sim.time();
    run(&mut sim, 100);
    sim.load_blocking("demo")?;
    info!(
        restored_time = sim.time(),
        discarded = sim.time() - before,
        bodies = sim.world().bodies().len(),
        "Save restored"
    );
    run(&mut sim, 10);

    report(&sim);
    Ok(())
}

struct DemoSystem {
    earth: BodyId,
    moon: BodyId,
    ship: BodyId,
}

fn create_demo_system(sim: &mut Simulation) -> Result<DemoSystem, SimulationError> {
    let sun = sim.register(
        BodyDesc::new("Sun")
            .with_mass(1.989e30)
            .with_gravitational_parameter(MU_SUN)
            .with_radius(696_000.0)
            .with_influence_radius(7.5e9),
    )?;
    let earth = sim.register(
        BodyDesc::new("Earth")
            .with_mass(5.972e24)
            .with_gravitational_parameter(MU_EARTH)
            .with_radius(6_371.0)
            .with_influence_radius(924_000.0)
            .orbiting(
                sun.id,
                OrbitalElements::circular(1.496e8)
                    .with_eccentricity(0.0167)
                    .with_argument_of_periapsis(1.796),
            ),
    )?;
    let moon = sim.register(
        BodyDesc::new("Moon")
            .with_mass(7.342e22)
            .with_gravitational_parameter(MU_MOON)
            .with_radius(1_737.4)
            .with_influence_radius(66_100.0)
            .orbiting(
                earth.id,
                OrbitalElements::circular(384_400.0)
                    .with_eccentricity(0.0549)
                    .with_inclination(5.145_f64.to_radians())
                    .with_mean_anomaly(PI / 3.0, 0.0),
            ),
    )?;
    let ship = sim.register(
        BodyDesc::new("Ship")
            .with_mass(30_000.0)
            .with_radius(0.02)
            .with_apparent_radius(1.0, 0.05)
            .orbiting(earth.id, OrbitalElements::circular(6_771.0)),
    )?;

    info!(
        sun = %sun.id,
        earth = %earth.id,
        moon = %moon.id,
        ship = %ship.id,
        "Demo system registered"
    );
    Ok(DemoSystem {
        earth: earth.id,
        moon: moon.id,
        ship: ship.id,
    })
}

fn run(sim: &mut Simulation, ticks: usize) {
    for _ in 0..ticks {
        for event in sim.tick(TICK) {
            match event {
                SimEvent::Domain(event) => info!(?event, "Domain"),
                SimEvent::Bubble(BubbleEvent::InfluenceChanged { .. }) => {}
                SimEvent::Bubble(event) => info!(?event, "Bubble"),
                SimEvent::Persistence(event) => info!(?event, "Persistence"),
            }
        }
    }
}

fn report(sim: &Simulation) {
    for body in sim.world().bodies().iter() {
        let projected = sim.bubble().projected(body.id);
        info!(
            body = %body.id,
            name = %body.name,
            domain = ?body.domain,
            true_distance = ?projected.map(|p| p.distance),
            scale_factor = ?projected.map(|p| p.scale_factor),
            "Final state"
        );
    }
}
