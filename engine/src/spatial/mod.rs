//! Proximity queries over true-space positions

mod octree;

pub use octree::{Neighbor, Octree};

use crate::core::entity::{BodyId, BodyRegistry, TrueState};
use tracing::trace;

/// Bring the index in line with the registry: drop unregistered bodies and
/// move the rest to their current true positions. Rebuilds the tree once
/// enough entries have changed leaves.
pub fn update_spatial_index_system(bodies: &BodyRegistry, index: &mut Octree) {
    let stale: Vec<BodyId> = index.ids().filter(|id| !bodies.contains(*id)).collect();
    for id in &stale {
        index.remove(*id);
    }

    for (_, (id, state)) in bodies.query::<(&BodyId, &TrueState)>().iter() {
        index.update(*id, state.position);
    }

    let rebuilt = index.rebuild_if_fragmented();

    trace!(
        entries = index.len(),
        removed = stale.len(),
        rebuilt,
        "Spatial index refreshed"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SpatialConfig;
    use crate::core::entity::BodyDesc;
    use glam::DVec3;

    #[test]
    fn test_index_follows_registry() {
        let mut bodies = BodyRegistry::new();
        let (a, _) = bodies.register(BodyDesc::new("a").at(DVec3::X * 10.0)).unwrap();
        let (b, _) = bodies.register(BodyDesc::new("b").at(DVec3::Y * 20.0)).unwrap();

        let mut index = Octree::default();
        update_spatial_index_system(&bodies, &mut index);
        assert_eq!(index.len(), 2);

        bodies.unregister(a).unwrap();
        bodies
            .update_true_state(b, DVec3::Z * 5.0, DVec3::ZERO)
            .unwrap();
        update_spatial_index_system(&bodies, &mut index);

        assert!(!index.contains(a));
        assert_eq!(index.position(b), Some(DVec3::Z * 5.0));
    }

    #[test]
    fn test_index_rebuilt_after_many_reinsertions() {
        let mut bodies = BodyRegistry::new();
        bodies.register(BodyDesc::new("a").at(DVec3::X)).unwrap();
        let (b, _) = bodies.register(BodyDesc::new("b").at(DVec3::X * 2.0)).unwrap();

        let config = SpatialConfig {
            leaf_capacity: 1,
            rebuild_after: 4,
            ..Default::default()
        };
        let mut index = Octree::new(config);
        update_spatial_index_system(&bodies, &mut index);
        // Two close entries split all the way down
        let split = index.node_count();
        assert_eq!(split, 1 + 8 * config.max_depth as usize);

        let far = [
            DVec3::new(-1.0e9, -1.0e9, -1.0e9),
            DVec3::new(1.0e9, -1.0e9, -1.0e9),
        ];
        for step in 0..3 {
            bodies
                .update_true_state(b, far[step % 2], DVec3::ZERO)
                .unwrap();
            update_spatial_index_system(&bodies, &mut index);
        }
        assert_eq!(index.reinsertions_since_rebuild(), 3);
        assert_eq!(index.node_count(), split);

        bodies.update_true_state(b, far[1], DVec3::ZERO).unwrap();
        update_spatial_index_system(&bodies, &mut index);
        assert_eq!(index.reinsertions(), 4);
        assert_eq!(index.reinsertions_since_rebuild(), 0);
        assert_eq!(index.node_count(), 9);
        assert_eq!(index.position(b), Some(far[1]));
    }
}
