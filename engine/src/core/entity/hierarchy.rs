//! Gravity domain hierarchy
//!
//! Domains live in a flat arena keyed by id with an explicit parent id.
//! Deleting a domain re-parents its children in one pass over the arena.

use super::components::{BodyId, DomainId, GravityDomain};
use super::registry::BodyRegistry;
use crate::spatial::Octree;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, trace};

/// Domain membership transitions, exit always before enter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainEvent {
    Exited { body: BodyId, domain: DomainId },
    Entered { body: BodyId, domain: DomainId },
}

/// Arena of gravity domains
#[derive(Debug, Clone)]
pub struct DomainHierarchy {
    domains: BTreeMap<DomainId, GravityDomain>,
    by_owner: HashMap<BodyId, DomainId>,
    next_id: u64,
}

impl Default for DomainHierarchy {
    fn default() -> Self {
        Self::new()
    }
}

impl DomainHierarchy {
    pub fn new() -> Self {
        Self {
            domains: BTreeMap::new(),
            by_owner: HashMap::new(),
            next_id: 1,
        }
    }

    /// Rebuild a hierarchy from a snapshot
    pub(crate) fn restore(domains: impl IntoIterator<Item = GravityDomain>, next_id: u64) -> Self {
        let domains: BTreeMap<_, _> = domains.into_iter().map(|d| (d.id, d)).collect();
        let by_owner = domains.values().map(|d| (d.owner, d.id)).collect();
        let floor = domains.keys().next_back().map_or(1, |id| id.0 + 1);
        Self {
            domains,
            by_owner,
            next_id: next_id.max(floor),
        }
    }

    pub(crate) fn create(
        &mut self,
        owner: BodyId,
        influence_radius: f64,
        gravitational_parameter: f64,
        parent: Option<DomainId>,
    ) -> DomainId {
        let id = DomainId(self.next_id);
        self.next_id += 1;

        self.domains.insert(
            id,
            GravityDomain {
                id,
                owner,
                influence_radius,
                parent,
                gravitational_parameter,
            },
        );
        self.by_owner.insert(owner, id);
        debug!(domain = %id, owner = %owner, influence_radius, "Created gravity domain");
        id
    }

    /// Delete a domain. Its children take over its parent.
    pub fn remove(&mut self, id: DomainId) -> Option<GravityDomain> {
        let removed = self.domains.remove(&id)?;
        self.by_owner.remove(&removed.owner);

        let mut reparented = 0;
        for domain in self.domains.values_mut() {
            if domain.parent == Some(id) {
                domain.parent = removed.parent;
                reparented += 1;
            }
        }

        debug!(
            domain = %id,
            new_parent = ?removed.parent,
            reparented,
            "Removed gravity domain"
        );
        Some(removed)
    }

    pub fn get(&self, id: DomainId) -> Option<&GravityDomain> {
        self.domains.get(&id)
    }

    /// Domain owned by `owner`, if any
    pub fn owned_by(&self, owner: BodyId) -> Option<&GravityDomain> {
        self.by_owner.get(&owner).and_then(|id| self.domains.get(id))
    }

    /// Direct children in id order
    pub fn children(&self, id: DomainId) -> Vec<DomainId> {
        self.domains
            .values()
            .filter(|d| d.parent == Some(id))
            .map(|d| d.id)
            .collect()
    }

    pub fn roots(&self) -> Vec<DomainId> {
        self.domains
            .values()
            .filter(|d| d.parent.is_none())
            .map(|d| d.id)
            .collect()
    }

    /// Parent chain from the immediate parent up to the root
    pub fn ancestors(&self, id: DomainId) -> Vec<DomainId> {
        let mut chain = Vec::new();
        let mut current = self.domains.get(&id).and_then(|d| d.parent);
        while let Some(parent) = current {
            // Guards against a malformed snapshot
            if chain.contains(&parent) || chain.len() > self.domains.len() {
                break;
            }
            chain.push(parent);
            current = self.domains.get(&parent).and_then(|d| d.parent);
        }
        chain
    }

    /// Number of ancestors; roots have depth 0
    pub fn depth(&self, id: DomainId) -> usize {
        self.ancestors(id).len()
    }

    /// Domains in id order
    pub fn iter(&self) -> impl Iterator<Item = &GravityDomain> {
        self.domains.values()
    }

    pub fn len(&self) -> usize {
        self.domains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }

    /// Id the next created domain will receive
    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    /// Point every domain's parent at the domain its owner sits in
    pub(crate) fn sync_parents(&mut self, bodies: &BodyRegistry) {
        for domain in self.domains.values_mut() {
            let parent = bodies.domain_of(domain.owner);
            if domain.parent != parent {
                trace!(domain = %domain.id, from = ?domain.parent, to = ?parent, "Domain re-parented");
                domain.parent = parent;
            }
        }
    }

    /// Compute the domain every body belongs to.
    ///
    /// A body belongs to the smallest domain whose influence radius exceeds
    /// its distance to the owner; equal radii go to the lower owner id.
    /// Bodies never join their own domain, owners only join domains strictly
    /// larger than their own, and faulted bodies stay unassigned. Positions
    /// come from the spatial index.
    pub fn resolve(
        &self,
        bodies: &BodyRegistry,
        index: &Octree,
    ) -> BTreeMap<BodyId, Option<DomainId>> {
        // (radius, owner, domain) of the best candidate so far
        let mut best: HashMap<BodyId, (f64, BodyId, DomainId)> = HashMap::new();

        for domain in self.domains.values() {
            let Some(center) = index.position(domain.owner) else {
                continue;
            };

            for hit in index.query_radius(center, domain.influence_radius) {
                if hit.distance >= domain.influence_radius || hit.id == domain.owner {
                    continue;
                }
                if !bodies.contains(hit.id) || bodies.is_faulted(hit.id) {
                    continue;
                }
                if let Some(own) = self.owned_by(hit.id) {
                    if own.influence_radius >= domain.influence_radius {
                        continue;
                    }
                }

                let candidate = (domain.influence_radius, domain.owner, domain.id);
                best.entry(hit.id)
                    .and_modify(|current| {
                        if better(&candidate, current) {
                            *current = candidate;
                        }
                    })
                    .or_insert(candidate);
            }
        }

        bodies
            .ids()
            .map(|id| (id, best.get(&id).map(|(_, _, domain)| *domain)))
            .collect()
    }
}

fn better(candidate: &(f64, BodyId, DomainId), current: &(f64, BodyId, DomainId)) -> bool {
    match candidate.0.total_cmp(&current.0) {
        Ordering::Less => true,
        Ordering::Greater => false,
        Ordering::Equal => candidate.1 < current.1,
    }
}
