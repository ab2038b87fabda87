//! Observer bubble projection through the simulation tick

use farspace_engine::prelude::*;

fn simulation(bubble: BubbleConfig) -> Simulation {
    let config = SimulationConfig {
        bubble,
        ..Default::default()
    };
    Simulation::builder(config)
        .without_persistence()
        .build()
        .unwrap()
}

fn bubble_events(events: &[SimEvent]) -> Vec<BubbleEvent> {
    events
        .iter()
        .filter_map(|event| match event {
            SimEvent::Bubble(event) => Some(*event),
            _ => None,
        })
        .collect()
}

fn point(sim: &mut Simulation, name: &str, position: DVec3) -> BodyId {
    sim.register(BodyDesc::new(name).at(position).with_radius(100.0).controlled())
        .unwrap()
        .id
}

#[test]
fn test_body_near_inner_edge() {
    let mut sim = simulation(BubbleConfig::new(10_000.0, 1_000_000.0, 0.1));
    let observer = point(&mut sim, "Observer", DVec3::ZERO);
    let body = point(&mut sim, "Body", DVec3::new(50_000.0, 0.0, 0.0));
    sim.bind_observer(observer).unwrap();
    sim.tick(0.0);

    let projected = *sim.bubble().projected(body).unwrap();
    assert!(projected.scale_factor < 1.0);
    assert!(projected.scale_factor > 0.1);
    assert!((projected.distance - 50_000.0).abs() < 1e-9);
    assert!((projected.offset.x - 50_000.0 * projected.scale_factor).abs() < 1e-6);
    assert!((projected.display_radius - 100.0 * projected.scale_factor).abs() < 1e-9);

    // A wider inner radius leaves it at full scale
    let mut wide = simulation(BubbleConfig::new(100_000.0, 1_000_000.0, 0.1));
    let observer = point(&mut wide, "Observer", DVec3::ZERO);
    let body = point(&mut wide, "Body", DVec3::new(50_000.0, 0.0, 0.0));
    wide.bind_observer(observer).unwrap();
    wide.tick(0.0);
    assert_eq!(wide.bubble().projected(body).unwrap().scale_factor, 1.0);
}

#[test]
fn test_projection_keeps_direction() {
    let mut sim = simulation(BubbleConfig::default());
    let observer = point(&mut sim, "Observer", DVec3::new(1.0e6, 2.0e6, 0.0));
    let far = point(&mut sim, "Far", DVec3::new(1.0e6, 2.0e6, 0.0) + DVec3::new(3.0e8, -4.0e8, 0.0));
    sim.bind_observer(observer).unwrap();
    sim.tick(0.0);

    let projected = sim.bubble().projected(far).unwrap();
    assert_eq!(projected.scale_factor, 0.1);
    let direction = projected.offset.normalize();
    assert!((direction - DVec3::new(0.6, -0.8, 0.0)).length() < 1e-12);
    assert!((projected.offset.length() - 5.0e7).abs() < 1e-3);

    // The observer is the origin and is not projected
    assert!(sim.bubble().projected(observer).is_none());
}

#[test]
fn test_enter_and_leave_events() {
    let mut sim = simulation(BubbleConfig::default());
    let observer = point(&mut sim, "Observer", DVec3::ZERO);
    let visitor = point(&mut sim, "Visitor", DVec3::new(5.0e6, 0.0, 0.0));
    sim.bind_observer(observer).unwrap();

    let events = bubble_events(&sim.tick(0.0));
    assert_eq!(
        events,
        vec![BubbleEvent::Rebound {
            from: None,
            to: Some(observer)
        }]
    );
    assert!(!sim.bubble().is_inside(visitor));

    sim.update_true_state(visitor, DVec3::new(500_000.0, 0.0, 0.0), DVec3::ZERO)
        .unwrap();
    let events = bubble_events(&sim.tick(0.0));
    assert!(events.contains(&BubbleEvent::Entered {
        body: visitor,
        distance: 500_000.0
    }));
    assert!(sim.bubble().is_inside(visitor));

    // Staying inside raises nothing new
    assert!(bubble_events(&sim.tick(0.0)).is_empty());

    sim.update_true_state(visitor, DVec3::new(2.0e6, 0.0, 0.0), DVec3::ZERO)
        .unwrap();
    let events = bubble_events(&sim.tick(0.0));
    assert!(events.contains(&BubbleEvent::Left { body: visitor }));
    assert!(!sim.bubble().is_inside(visitor));
}

#[test]
fn test_influence_changes_past_threshold() {
    let mut sim = simulation(BubbleConfig::default());
    let observer = point(&mut sim, "Observer", DVec3::ZERO);
    let body = point(&mut sim, "Body", DVec3::new(20_000.0, 0.0, 0.0));
    sim.bind_observer(observer).unwrap();
    sim.tick(0.0);
    let baseline = sim.bubble().projected(body).unwrap().scale_factor;

    // A metre of movement is below the threshold
    sim.update_true_state(body, DVec3::new(20_000.001, 0.0, 0.0), DVec3::ZERO)
        .unwrap();
    assert!(bubble_events(&sim.tick(0.0)).is_empty());

    sim.update_true_state(body, DVec3::new(200_000.0, 0.0, 0.0), DVec3::ZERO)
        .unwrap();
    let events = bubble_events(&sim.tick(0.0));
    let changed = events.iter().find_map(|event| match event {
        BubbleEvent::InfluenceChanged {
            body: id,
            scale_factor,
        } if *id == body => Some(*scale_factor),
        _ => None,
    });
    let scale_factor = changed.expect("influence change expected");
    assert!(scale_factor < baseline);
}

#[test]
fn test_rebind_takes_effect_next_tick() {
    let mut sim = simulation(BubbleConfig::default());
    let first = point(&mut sim, "First", DVec3::ZERO);
    let second = point(&mut sim, "Second", DVec3::new(40_000.0, 0.0, 0.0));
    sim.bind_observer(first).unwrap();
    sim.tick(0.0);
    assert_eq!(sim.bubble().center(), Some(first));

    sim.bind_observer(second).unwrap();
    // Projections still come from the old centre until the next pass
    assert_eq!(sim.bubble().center(), Some(first));
    assert_eq!(sim.bubble().requested_center(), Some(second));
    assert!(sim.bubble().projected(second).is_some());

    let events = bubble_events(&sim.tick(0.0));
    assert!(events.contains(&BubbleEvent::Rebound {
        from: Some(first),
        to: Some(second)
    }));
    assert_eq!(sim.bubble().center(), Some(second));
    assert!(sim.bubble().projected(second).is_none());
    let back = sim.bubble().projected(first).unwrap();
    assert!((back.offset.normalize() - DVec3::new(-1.0, 0.0, 0.0)).length() < 1e-12);

    assert!(matches!(
        sim.bind_observer(BodyId(999)),
        Err(SimulationError::Registry(RegistryError::UnknownBody(_)))
    ));
}

#[test]
fn test_removed_observer_unbinds() {
    let mut sim = simulation(BubbleConfig::default());
    let observer = point(&mut sim, "Observer", DVec3::ZERO);
    let nearby = point(&mut sim, "Nearby", DVec3::new(30_000.0, 0.0, 0.0));
    sim.bind_observer(observer).unwrap();
    sim.tick(0.0);
    assert!(sim.bubble().is_inside(nearby));

    sim.unregister(observer).unwrap();
    let events = bubble_events(&sim.tick(0.0));
    assert_eq!(
        events,
        vec![
            BubbleEvent::Rebound {
                from: Some(observer),
                to: None
            },
            BubbleEvent::Left { body: nearby },
        ]
    );
    assert_eq!(sim.bubble().center(), None);
    assert_eq!(sim.bubble().projections().count(), 0);
}

#[test]
fn test_apparent_radius_sets_display_size() {
    let mut sim = simulation(BubbleConfig::default());
    let observer = point(&mut sim, "Observer", DVec3::ZERO);
    let ship = sim
        .register(
            BodyDesc::new("Ship")
                .at(DVec3::new(200_000.0, 0.0, 0.0))
                .with_radius(0.02)
                .with_apparent_radius(25.0, 200_000.0)
                .controlled(),
        )
        .unwrap()
        .id;
    sim.bind_observer(observer).unwrap();
    sim.tick(0.0);

    // Exact at the calibration distance, regardless of the true radius
    let projected = *sim.bubble().projected(ship).unwrap();
    assert!((projected.display_radius - 25.0).abs() < 1e-9);

    sim.update_true_state(ship, DVec3::new(800_000.0, 0.0, 0.0), DVec3::ZERO)
        .unwrap();
    sim.tick(0.0);
    let farther = sim.bubble().projected(ship).unwrap();
    let ratio = farther.scale_factor / projected.scale_factor;
    assert!((farther.display_radius - 25.0 * ratio).abs() < 1e-9);
    assert!(farther.display_radius < 25.0);
}
