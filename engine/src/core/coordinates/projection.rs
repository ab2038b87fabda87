//! Distance projection curve
//!
//! The falloff between the inner and outer radius is defined in log-log space.
//! With `L = ln(outer / inner)`, `u = ln(d / inner) / L`, `m` the minimum
//! scale factor and `F = ln(1/m)`:
//!
//! ```text
//! s(d) = exp(-F * g(u))
//! ```
//!
//! The slope of `ln d'` against `ln d` is `1 - beta * g'(u)` with
//! `beta = F / L`, so projected distance keeps increasing while
//! `g' < 1/beta`. The shape `g` rises from 0 to 1 with its slope capped at
//! `c = max(1, 0.9 / beta)`:
//!
//! ```text
//! k <= c:   g(u) = u^k
//! k >  c:   w = (1 - 1/c) * k / (k - 1)
//!           g(u) = (c*w/k) * (u/w)^k          for u <= w
//!           g(u) = c*w/k + c * (u - w)        for u >  w
//! ```
//!
//! The second form is a power onset joined smoothly to a linear tail at the
//! slope cap. Large exponents keep bodies just past the inner radius close to
//! full scale and push the compression outwards. `s(inner) = 1` and
//! `s(outer) = m` hold for every exponent.

use super::BubbleConfig;
use crate::config::ConfigError;
use glam::DVec3;
use tracing::{debug, warn};

/// Share of the monotonic slope limit the curve may use. Keeps projected
/// distance strictly increasing between the radii.
const SLOPE_MARGIN: f64 = 0.9;

/// Result of projecting one true-space distance
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projection {
    /// True-space distance (km), after clamping
    pub distance: f64,
    /// Distance inside the bubble
    pub projected_distance: f64,
    /// `projected_distance / distance`, or 1.0 at zero distance
    pub scale_factor: f64,
}

/// Precomputed projection curve for one bubble configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProjectionCurve {
    config: BubbleConfig,
    /// `ln(outer / inner)`
    log_span: f64,
    /// `ln(1 / min_scale_factor)`
    falloff: f64,
    /// Onset exponent, at least 1
    exponent: f64,
    /// Slope of the linear tail
    max_slope: f64,
    /// Normalised log distance where the onset meets the tail, 1 for a pure
    /// power curve
    knee: f64,
}

impl ProjectionCurve {
    /// Build a curve, rejecting configurations that break the bubble invariants
    pub fn new(config: BubbleConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let log_span = (config.outer_radius / config.inner_radius).ln();
        let falloff = (1.0 / config.min_scale_factor).ln();
        let beta = falloff / log_span;
        let max_slope = if beta > 0.0 {
            (SLOPE_MARGIN / beta).max(1.0)
        } else {
            f64::INFINITY
        };
        // A cap of 1 leaves the straight line as the only shape that fits
        let exponent = if max_slope <= 1.0 {
            1.0
        } else {
            config.scaling_exponent.max(1.0)
        };
        if exponent != config.scaling_exponent {
            debug!(
                requested = config.scaling_exponent,
                effective = exponent,
                "Scaling exponent adjusted to keep projection monotonic"
            );
        }

        let knee = if exponent > max_slope {
            (1.0 - 1.0 / max_slope) * exponent / (exponent - 1.0)
        } else {
            1.0
        };

        Ok(Self {
            config,
            log_span,
            falloff,
            exponent,
            max_slope,
            knee,
        })
    }

    /// Configuration this curve was built from
    pub fn config(&self) -> &BubbleConfig {
        &self.config
    }

    /// Exponent actually used by the curve
    pub fn effective_exponent(&self) -> f64 {
        self.exponent
    }

    /// Scale factor for a true-space distance
    pub fn scale_factor(&self, distance: f64) -> f64 {
        let distance = clamp_distance(distance);
        if distance == 0.0 || distance <= self.config.inner_radius {
            return 1.0;
        }
        if distance >= self.config.outer_radius {
            return self.config.min_scale_factor;
        }

        let u = (distance / self.config.inner_radius).ln() / self.log_span;
        (-self.falloff * self.shape(u)).exp()
    }

    /// Falloff shape over the normalised log distance, 0 at the inner
    /// radius and 1 at the outer
    fn shape(&self, u: f64) -> f64 {
        if self.knee >= 1.0 {
            return u.powf(self.exponent);
        }
        let joint = self.max_slope * self.knee / self.exponent;
        if u <= self.knee {
            joint * (u / self.knee).powf(self.exponent)
        } else {
            joint + self.max_slope * (u - self.knee)
        }
    }

    /// Project a true-space distance into the bubble
    pub fn project(&self, distance: f64) -> Projection {
        let distance = clamp_distance(distance);
        let scale_factor = self.scale_factor(distance);
        Projection {
            distance,
            projected_distance: distance * scale_factor,
            scale_factor,
        }
    }

    /// Project an observer-relative offset, keeping its direction
    pub fn project_offset(&self, offset: DVec3) -> (DVec3, Projection) {
        let projection = self.project(offset.length());
        (offset * projection.scale_factor, projection)
    }

    /// Recover the true-space distance for a projected distance.
    ///
    /// Bisects the forward curve; only meant for diagnostics and debug
    /// overlays, never for the per-tick path.
    pub fn unproject_distance(&self, projected_distance: f64) -> f64 {
        let projected = clamp_distance(projected_distance);
        let inner = self.config.inner_radius;
        let saturated = self.config.min_scale_factor * self.config.outer_radius;

        if projected <= inner {
            return projected;
        }
        if projected >= saturated {
            return projected / self.config.min_scale_factor;
        }

        let mut low = inner;
        let mut high = self.config.outer_radius;
        for _ in 0..200 {
            let mid = 0.5 * (low + high);
            if self.project(mid).projected_distance < projected {
                low = mid;
            } else {
                high = mid;
            }
            if high - low <= high * 1e-14 {
                break;
            }
        }
        0.5 * (low + high)
    }
}

/// Negative or non-finite distances indicate a caller bug; clamp them
fn clamp_distance(distance: f64) -> f64 {
    if distance >= 0.0 {
        distance
    } else {
        warn!(distance, "Invalid distance passed to projection, clamping to 0");
        0.0
    }
}
