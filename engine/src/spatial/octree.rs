//! Bounded octree over true-space positions

use crate::config::SpatialConfig;
use crate::core::entity::BodyId;
use glam::DVec3;
use ordered_float::OrderedFloat;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use tracing::{debug, trace};

/// A query hit
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub id: BodyId,
    /// Distance from the query point (km)
    pub distance: f64,
}

/// Axis-aligned cube
#[derive(Debug, Clone, Copy, PartialEq)]
struct Bounds {
    center: DVec3,
    half_extent: f64,
}

impl Bounds {
    fn contains(&self, point: DVec3) -> bool {
        (point - self.center).abs().max_element() <= self.half_extent
    }

    /// Squared distance from `point` to the closest point of the cube
    fn distance_sq(&self, point: DVec3) -> f64 {
        let outside = ((point - self.center).abs() - DVec3::splat(self.half_extent)).max(DVec3::ZERO);
        outside.length_squared()
    }

    fn octant(&self, point: DVec3) -> usize {
        (point.x >= self.center.x) as usize
            | ((point.y >= self.center.y) as usize) << 1
            | ((point.z >= self.center.z) as usize) << 2
    }

    fn child(&self, octant: usize) -> Bounds {
        let quarter = self.half_extent * 0.5;
        let sign = |bit: usize| if octant & bit != 0 { quarter } else { -quarter };
        Bounds {
            center: self.center + DVec3::new(sign(1), sign(2), sign(4)),
            half_extent: quarter,
        }
    }
}

#[derive(Debug, Clone)]
struct Node {
    bounds: Bounds,
    depth: u32,
    children: Option<[usize; 8]>,
    /// Only leaves hold entries
    entries: Vec<BodyId>,
}

impl Node {
    fn leaf(bounds: Bounds, depth: u32) -> Self {
        Self {
            bounds,
            depth,
            children: None,
            entries: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Placement {
    Node(usize),
    /// Outside the root cube
    Overflow,
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    position: DVec3,
    placement: Placement,
}

/// Best-first search item; nodes sort before entries at equal distance so an
/// entry is only emitted once nothing closer can remain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Candidate {
    Node(usize),
    Entry(BodyId),
}

/// Octree with lazy rebalancing.
///
/// Entries that leave their leaf are re-inserted from the root; emptied
/// nodes are not merged until [`Octree::rebuild`]. Below
/// `linear_threshold` entries queries scan every entry instead.
#[derive(Debug, Clone)]
pub struct Octree {
    config: SpatialConfig,
    nodes: Vec<Node>,
    slots: HashMap<BodyId, Slot>,
    overflow: Vec<BodyId>,
    reinsertions: u64,
    /// `reinsertions` at the last rebuild
    rebuilt_at: u64,
}

impl Default for Octree {
    fn default() -> Self {
        Self::new(SpatialConfig::default())
    }
}

impl Octree {
    pub fn new(config: SpatialConfig) -> Self {
        Self {
            nodes: vec![Self::root(&config)],
            config,
            slots: HashMap::new(),
            overflow: Vec::new(),
            reinsertions: 0,
            rebuilt_at: 0,
        }
    }

    fn root(config: &SpatialConfig) -> Node {
        Node::leaf(
            Bounds {
                center: DVec3::ZERO,
                half_extent: config.half_extent,
            },
            0,
        )
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn contains(&self, id: BodyId) -> bool {
        self.slots.contains_key(&id)
    }

    /// Position the index currently holds for `id`
    pub fn position(&self, id: BodyId) -> Option<DVec3> {
        self.slots.get(&id).map(|slot| slot.position)
    }

    pub fn ids(&self) -> impl Iterator<Item = BodyId> + '_ {
        self.slots.keys().copied()
    }

    /// Entries moved to a different leaf by [`Octree::update`] so far
    pub fn reinsertions(&self) -> u64 {
        self.reinsertions
    }

    pub fn reinsertions_since_rebuild(&self) -> u64 {
        self.reinsertions - self.rebuilt_at
    }

    /// Nodes allocated, including emptied ones awaiting a rebuild
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Insert or move an entry
    pub fn insert(&mut self, id: BodyId, position: DVec3) {
        if self.slots.contains_key(&id) {
            self.update(id, position);
            return;
        }
        self.place(id, position);
    }

    /// Remove an entry, returning its last position
    pub fn remove(&mut self, id: BodyId) -> Option<DVec3> {
        let slot = self.slots.remove(&id)?;
        self.detach(id, slot.placement);
        Some(slot.position)
    }

    /// Move an entry. Stays in place while it remains inside its leaf.
    pub fn update(&mut self, id: BodyId, position: DVec3) {
        let Some(slot) = self.slots.get_mut(&id) else {
            self.place(id, position);
            return;
        };

        if let Placement::Node(index) = slot.placement {
            if self.nodes[index].bounds.contains(position) {
                slot.position = position;
                return;
            }
        }
        // Overflow entries that are still outside the root stay put too
        if slot.placement == Placement::Overflow && !self.nodes[0].bounds.contains(position) {
            slot.position = position;
            return;
        }

        let placement = slot.placement;
        self.slots.remove(&id);
        self.detach(id, placement);
        self.place(id, position);
        self.reinsertions += 1;
        trace!(body = %id, "Re-inserted into spatial index");
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.nodes.push(Self::root(&self.config));
        self.slots.clear();
        self.overflow.clear();
        self.rebuilt_at = self.reinsertions;
    }

    /// Rebuild the tree from the current entries, dropping empty nodes
    pub fn rebuild(&mut self) {
        let mut entries: Vec<(BodyId, DVec3)> = self
            .slots
            .iter()
            .map(|(id, slot)| (*id, slot.position))
            .collect();
        entries.sort_by_key(|(id, _)| *id);

        self.clear();
        for (id, position) in entries {
            self.place(id, position);
        }
    }

    /// Rebuild once `rebuild_after` entries have been re-inserted since the
    /// last rebuild. Returns whether it did.
    pub fn rebuild_if_fragmented(&mut self) -> bool {
        let limit = self.config.rebuild_after;
        if limit == 0 || self.reinsertions_since_rebuild() < limit {
            return false;
        }
        let before = self.nodes.len();
        self.rebuild();
        debug!(
            before,
            after = self.nodes.len(),
            entries = self.slots.len(),
            "Spatial index rebuilt"
        );
        true
    }

    /// Every entry within `radius` of `center`, ordered by distance then id
    pub fn query_radius(&self, center: DVec3, radius: f64) -> Vec<Neighbor> {
        if !(radius >= 0.0) || !center.is_finite() {
            return Vec::new();
        }
        let radius_sq = radius * radius;
        let mut hits: Vec<(f64, BodyId)> = Vec::new();

        if self.len() < self.config.linear_threshold {
            for (id, slot) in &self.slots {
                let distance_sq = slot.position.distance_squared(center);
                if distance_sq <= radius_sq {
                    hits.push((distance_sq, *id));
                }
            }
        } else {
            let mut stack = vec![0];
            while let Some(index) = stack.pop() {
                let node = &self.nodes[index];
                if node.bounds.distance_sq(center) > radius_sq {
                    continue;
                }
                match node.children {
                    Some(children) => stack.extend(children),
                    None => {
                        for id in &node.entries {
                            self.collect_within(*id, center, radius_sq, &mut hits);
                        }
                    }
                }
            }
            for id in &self.overflow {
                self.collect_within(*id, center, radius_sq, &mut hits);
            }
        }

        into_neighbors(hits)
    }

    /// The `k` entries closest to `point`, ordered by distance then id
    pub fn query_nearest(&self, point: DVec3, k: usize) -> Vec<Neighbor> {
        if k == 0 || !point.is_finite() {
            return Vec::new();
        }

        if self.len() < self.config.linear_threshold {
            let mut hits: Vec<(f64, BodyId)> = self
                .slots
                .iter()
                .map(|(id, slot)| (slot.position.distance_squared(point), *id))
                .collect();
            hits.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
            hits.truncate(k);
            return hits
                .into_iter()
                .map(|(distance_sq, id)| Neighbor {
                    id,
                    distance: distance_sq.sqrt(),
                })
                .collect();
        }

        let mut heap = BinaryHeap::new();
        heap.push(Reverse((
            OrderedFloat(self.nodes[0].bounds.distance_sq(point)),
            Candidate::Node(0),
        )));
        for id in &self.overflow {
            if let Some(slot) = self.slots.get(id) {
                heap.push(Reverse((
                    OrderedFloat(slot.position.distance_squared(point)),
                    Candidate::Entry(*id),
                )));
            }
        }

        let mut result = Vec::with_capacity(k);
        while let Some(Reverse((OrderedFloat(distance_sq), candidate))) = heap.pop() {
            match candidate {
                Candidate::Entry(id) => {
                    result.push(Neighbor {
                        id,
                        distance: distance_sq.sqrt(),
                    });
                    if result.len() == k {
                        break;
                    }
                }
                Candidate::Node(index) => {
                    let node = &self.nodes[index];
                    match node.children {
                        Some(children) => {
                            for child in children {
                                let bound = self.nodes[child].bounds.distance_sq(point);
                                heap.push(Reverse((OrderedFloat(bound), Candidate::Node(child))));
                            }
                        }
                        None => {
                            for id in &node.entries {
                                if let Some(slot) = self.slots.get(id) {
                                    heap.push(Reverse((
                                        OrderedFloat(slot.position.distance_squared(point)),
                                        Candidate::Entry(*id),
                                    )));
                                }
                            }
                        }
                    }
                }
            }
        }
        result
    }

    fn collect_within(&self, id: BodyId, center: DVec3, radius_sq: f64, hits: &mut Vec<(f64, BodyId)>) {
        if let Some(slot) = self.slots.get(&id) {
            let distance_sq = slot.position.distance_squared(center);
            if distance_sq <= radius_sq {
                hits.push((distance_sq, id));
            }
        }
    }

    fn place(&mut self, id: BodyId, position: DVec3) {
        if !self.nodes[0].bounds.contains(position) {
            self.overflow.push(id);
            self.slots.insert(
                id,
                Slot {
                    position,
                    placement: Placement::Overflow,
                },
            );
            return;
        }
        self.place_from(0, id, position);
    }

    fn place_from(&mut self, mut index: usize, id: BodyId, position: DVec3) {
        while let Some(children) = self.nodes[index].children {
            index = children[self.nodes[index].bounds.octant(position)];
        }

        self.nodes[index].entries.push(id);
        self.slots.insert(
            id,
            Slot {
                position,
                placement: Placement::Node(index),
            },
        );

        let node = &self.nodes[index];
        if node.entries.len() > self.config.leaf_capacity && node.depth < self.config.max_depth {
            self.split(index);
        }
    }

    fn split(&mut self, index: usize) {
        let bounds = self.nodes[index].bounds;
        let depth = self.nodes[index].depth + 1;

        let first = self.nodes.len();
        for octant in 0..8 {
            self.nodes.push(Node::leaf(bounds.child(octant), depth));
        }
        let children: [usize; 8] = std::array::from_fn(|octant| first + octant);
        self.nodes[index].children = Some(children);

        let entries = std::mem::take(&mut self.nodes[index].entries);
        for id in entries {
            if let Some(position) = self.position(id) {
                let child = children[bounds.octant(position)];
                self.place_from(child, id, position);
            }
        }
    }

    fn detach(&mut self, id: BodyId, placement: Placement) {
        let entries = match placement {
            Placement::Node(index) => &mut self.nodes[index].entries,
            Placement::Overflow => &mut self.overflow,
        };
        if let Some(at) = entries.iter().position(|entry| *entry == id) {
            entries.swap_remove(at);
        }
    }
}

fn into_neighbors(mut hits: Vec<(f64, BodyId)>) -> Vec<Neighbor> {
    hits.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
    hits.into_iter()
        .map(|(distance_sq, id)| Neighbor {
            id,
            distance: distance_sq.sqrt(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Small deterministic generator so the tests need no extra crates
    fn scatter(count: u64, extent: f64) -> Vec<(BodyId, DVec3)> {
        let mut state = 0x9E37_79B9_7F4A_7C15_u64;
        let mut next = move || {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            ((state >> 11) as f64 / (1u64 << 53) as f64) * 2.0 - 1.0
        };
        (1..=count)
            .map(|i| (BodyId(i), DVec3::new(next(), next(), next()) * extent))
            .collect()
    }

    fn tree_config() -> SpatialConfig {
        SpatialConfig {
            half_extent: 1_000.0,
            leaf_capacity: 4,
            max_depth: 10,
            linear_threshold: 0,
            rebuild_after: 0,
        }
    }

    fn brute_radius(points: &[(BodyId, DVec3)], center: DVec3, radius: f64) -> Vec<BodyId> {
        let mut hits: Vec<(f64, BodyId)> = points
            .iter()
            .map(|(id, p)| (p.distance_squared(center), *id))
            .filter(|(d, _)| *d <= radius * radius)
            .collect();
        hits.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        hits.into_iter().map(|(_, id)| id).collect()
    }

    #[test]
    fn test_radius_query_matches_brute_force() {
        let points = scatter(500, 900.0);
        let mut tree = Octree::new(tree_config());
        for (id, p) in &points {
            tree.insert(*id, *p);
        }
        assert_eq!(tree.len(), 500);

        for (center, radius) in [
            (DVec3::ZERO, 250.0),
            (DVec3::new(500.0, -200.0, 100.0), 400.0),
            (DVec3::new(-900.0, 900.0, -900.0), 50.0),
        ] {
            let ids: Vec<BodyId> = tree
                .query_radius(center, radius)
                .iter()
                .map(|n| n.id)
                .collect();
            assert_eq!(ids, brute_radius(&points, center, radius));
        }
    }

    #[test]
    fn test_nearest_matches_brute_force() {
        let points = scatter(300, 900.0);
        let mut tree = Octree::new(tree_config());
        for (id, p) in &points {
            tree.insert(*id, *p);
        }

        let query = DVec3::new(123.0, -45.0, 600.0);
        let nearest = tree.query_nearest(query, 7);
        let expected: Vec<BodyId> = brute_radius(&points, query, f64::INFINITY)
            .into_iter()
            .take(7)
            .collect();
        assert_eq!(nearest.iter().map(|n| n.id).collect::<Vec<_>>(), expected);
        assert!(nearest.windows(2).all(|w| w[0].distance <= w[1].distance));
    }

    #[test]
    fn test_linear_and_tree_paths_agree() {
        let points = scatter(100, 900.0);
        let mut tree = Octree::new(tree_config());
        let mut linear = Octree::new(SpatialConfig {
            linear_threshold: usize::MAX,
            ..tree_config()
        });
        for (id, p) in &points {
            tree.insert(*id, *p);
            linear.insert(*id, *p);
        }

        let center = DVec3::new(10.0, 20.0, 30.0);
        assert_eq!(tree.query_radius(center, 500.0), linear.query_radius(center, 500.0));
        assert_eq!(tree.query_nearest(center, 10), linear.query_nearest(center, 10));
    }

    #[test]
    fn test_ties_ordered_by_id() {
        let mut tree = Octree::new(tree_config());
        tree.insert(BodyId(9), DVec3::new(10.0, 0.0, 0.0));
        tree.insert(BodyId(3), DVec3::new(-10.0, 0.0, 0.0));
        tree.insert(BodyId(5), DVec3::new(0.0, 10.0, 0.0));

        let ids: Vec<_> = tree.query_radius(DVec3::ZERO, 10.0).iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![BodyId(3), BodyId(5), BodyId(9)]);

        let nearest: Vec<_> = tree.query_nearest(DVec3::ZERO, 2).iter().map(|n| n.id).collect();
        assert_eq!(nearest, vec![BodyId(3), BodyId(5)]);
    }

    #[test]
    fn test_update_reinserts_only_when_leaving_leaf() {
        let mut tree = Octree::new(tree_config());
        for (id, p) in scatter(50, 900.0) {
            tree.insert(id, p);
        }
        let id = BodyId(1);
        let start = tree.position(id).unwrap();

        tree.update(id, start + DVec3::splat(1e-6));
        assert_eq!(tree.reinsertions(), 0);

        tree.update(id, -start);
        assert_eq!(tree.reinsertions(), 1);
        let hits = tree.query_radius(-start, 1e-9);
        assert_eq!(hits[0].id, id);
        assert!(tree.query_radius(start, 1e-9).iter().all(|n| n.id != id));
    }

    #[test]
    fn test_overflow_outside_bounds() {
        let mut tree = Octree::new(tree_config());
        for (id, p) in scatter(20, 500.0) {
            tree.insert(id, p);
        }
        let far = BodyId(100);
        tree.insert(far, DVec3::new(1.0e6, 0.0, 0.0));

        let hits = tree.query_radius(DVec3::new(1.0e6, 0.0, 0.0), 1.0);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, far);
        assert_eq!(tree.query_nearest(DVec3::new(2.0e6, 0.0, 0.0), 1)[0].id, far);

        // Moving back inside the cube leaves the overflow list
        tree.update(far, DVec3::ZERO);
        assert_eq!(tree.query_nearest(DVec3::ZERO, 1)[0].distance, 0.0);
    }

    #[test]
    fn test_remove_and_rebuild() {
        let points = scatter(64, 900.0);
        let mut tree = Octree::new(tree_config());
        for (id, p) in &points {
            tree.insert(*id, *p);
        }
        for (id, p) in points.iter().take(32) {
            assert_eq!(tree.remove(*id), Some(*p));
        }
        assert_eq!(tree.remove(BodyId(1)), None);
        assert_eq!(tree.len(), 32);

        let before = tree.query_radius(DVec3::ZERO, 2_000.0);
        tree.rebuild();
        assert_eq!(tree.query_radius(DVec3::ZERO, 2_000.0), before);
        assert_eq!(before.len(), 32);
    }

    #[test]
    fn test_coincident_points_stop_at_max_depth() {
        let mut tree = Octree::new(tree_config());
        for i in 1..=20 {
            tree.insert(BodyId(i), DVec3::splat(1.0));
        }
        assert_eq!(tree.query_radius(DVec3::splat(1.0), 0.0).len(), 20);
    }
}
