//! Observer binding and the per-tick bubble projection pass

use crate::config::ConfigError;
use crate::core::coordinates::{BubbleConfig, ProjectionCurve};
use crate::core::entity::{BodyId, BodyRegistry, PhysicalProperties, TrueState};
use glam::DVec3;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, trace};

/// Projected view of one body, relative to the observer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProjectedBody {
    pub id: BodyId,
    /// Observer-relative offset inside the bubble
    pub offset: DVec3,
    pub scale_factor: f64,
    /// True distance to the observer (km)
    pub distance: f64,
    /// Radius to draw at `offset`, for LOD selection. Follows the body's
    /// apparent radius when one is calibrated, its true radius otherwise.
    pub display_radius: f64,
}

/// Notifications raised by the projection pass
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BubbleEvent {
    /// Crossed the outer radius inwards
    Entered { body: BodyId, distance: f64 },
    /// Crossed the outer radius outwards, or was removed while inside
    Left { body: BodyId },
    /// Scale factor moved by more than the configured threshold
    InfluenceChanged { body: BodyId, scale_factor: f64 },
    /// The bubble centre changed
    Rebound {
        from: Option<BodyId>,
        to: Option<BodyId>,
    },
}

/// Projects every body against a single observer.
///
/// The centre is latched once at the start of each pass; `bind` only takes
/// effect on the next [`BubbleController::update`].
#[derive(Debug, Clone)]
pub struct BubbleController {
    curve: ProjectionCurve,
    center: Option<BodyId>,
    pending: Option<Option<BodyId>>,
    projected: BTreeMap<BodyId, ProjectedBody>,
    inside: BTreeSet<BodyId>,
    reported_scale: BTreeMap<BodyId, f64>,
}

impl BubbleController {
    pub fn new(config: BubbleConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            curve: ProjectionCurve::new(config)?,
            center: None,
            pending: None,
            projected: BTreeMap::new(),
            inside: BTreeSet::new(),
            reported_scale: BTreeMap::new(),
        })
    }

    pub fn config(&self) -> &BubbleConfig {
        self.curve.config()
    }

    pub fn curve(&self) -> &ProjectionCurve {
        &self.curve
    }

    /// Replace the bubble configuration; projections refresh next pass
    pub fn set_config(&mut self, config: BubbleConfig) -> Result<(), ConfigError> {
        self.curve = ProjectionCurve::new(config)?;
        Ok(())
    }

    /// Request a new centre for the next pass
    pub fn bind(&mut self, id: BodyId) {
        debug!(body = %id, "Observer rebind requested");
        self.pending = Some(Some(id));
    }

    pub fn unbind(&mut self) {
        self.pending = Some(None);
    }

    /// Centre used by the last pass
    pub fn center(&self) -> Option<BodyId> {
        self.center
    }

    /// Centre the next pass will use
    pub fn requested_center(&self) -> Option<BodyId> {
        self.pending.unwrap_or(self.center)
    }

    pub fn projected(&self, id: BodyId) -> Option<&ProjectedBody> {
        self.projected.get(&id)
    }

    /// All projections from the last pass, in id order
    pub fn projections(&self) -> impl Iterator<Item = &ProjectedBody> {
        self.projected.values()
    }

    pub fn is_inside(&self, id: BodyId) -> bool {
        self.inside.contains(&id)
    }

    /// Forget all projection state, keeping the binding
    pub fn reset(&mut self) {
        self.projected.clear();
        self.inside.clear();
        self.reported_scale.clear();
    }

    /// Display radius for a body at the given scale factor.
    ///
    /// A calibrated apparent radius is exact at its reference distance and
    /// shrinks with the projection beyond it.
    fn display_radius(&self, properties: &PhysicalProperties, scale_factor: f64) -> f64 {
        if properties.apparent_radius > 0.0 && properties.reference_distance > 0.0 {
            let reference = self.curve.scale_factor(properties.reference_distance);
            properties.apparent_radius * scale_factor / reference
        } else {
            properties.radius * scale_factor
        }
    }

    /// Run the projection pass for every registered body
    pub fn update(&mut self, bodies: &BodyRegistry) -> Vec<BubbleEvent> {
        let mut events = Vec::new();

        if let Some(requested) = self.pending.take() {
            if requested != self.center {
                info!(from = ?self.center, to = ?requested, "Observer rebound");
                events.push(BubbleEvent::Rebound {
                    from: self.center,
                    to: requested,
                });
                self.center = requested;
                // Scale reports are relative to the old centre
                self.reported_scale.clear();
            }
        }

        let origin = match self.center.and_then(|id| bodies.state(id)) {
            Some(observer) => observer.position,
            None => {
                if let Some(lost) = self.center.take() {
                    info!(body = %lost, "Observer body no longer registered, unbinding");
                    events.push(BubbleEvent::Rebound {
                        from: Some(lost),
                        to: None,
                    });
                }
                for body in std::mem::take(&mut self.inside) {
                    events.push(BubbleEvent::Left { body });
                }
                self.projected.clear();
                self.reported_scale.clear();
                return events;
            }
        };
        let center = self.center;

        self.projected.clear();
        let outer = self.curve.config().outer_radius;
        let threshold = self.curve.config().influence_threshold;
        let mut inside = BTreeSet::new();

        // Id order keeps event order stable
        let mut targets: Vec<(BodyId, DVec3, PhysicalProperties)> = bodies
            .query::<(&BodyId, &TrueState, &PhysicalProperties)>()
            .iter()
            .filter(|(_, (id, _, _))| Some(**id) != center)
            .map(|(_, (id, state, properties))| (*id, state.position, *properties))
            .collect();
        targets.sort_unstable_by_key(|(id, _, _)| *id);

        for (id, position, properties) in targets {
            let (offset, projection) = self.curve.project_offset(position - origin);
            let display_radius = self.display_radius(&properties, projection.scale_factor);
            self.projected.insert(
                id,
                ProjectedBody {
                    id,
                    offset,
                    scale_factor: projection.scale_factor,
                    distance: projection.distance,
                    display_radius,
                },
            );

            if projection.distance < outer {
                inside.insert(id);
                if !self.inside.contains(&id) {
                    trace!(body = %id, distance = projection.distance, "Entered bubble");
                    events.push(BubbleEvent::Entered {
                        body: id,
                        distance: projection.distance,
                    });
                }
            }

            match self.reported_scale.get(&id) {
                None => {
                    self.reported_scale.insert(id, projection.scale_factor);
                }
                Some(last) if (projection.scale_factor - last).abs() > threshold => {
                    self.reported_scale.insert(id, projection.scale_factor);
                    events.push(BubbleEvent::InfluenceChanged {
                        body: id,
                        scale_factor: projection.scale_factor,
                    });
                }
                Some(_) => {}
            }
        }

        for body in self.inside.difference(&inside) {
            trace!(body = %body, "Left bubble");
            events.push(BubbleEvent::Left { body: *body });
        }
        self.reported_scale
            .retain(|id, _| self.projected.contains_key(id));
        self.inside = inside;

        events
    }
}
