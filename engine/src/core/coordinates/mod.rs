//! Observer-relative distance projection
//!
//! True-space positions are stored in f64 kilometres and can be hundreds of
//! millions of kilometres apart. Presenting them directly to rendering and
//! flight physics would blow through both float precision and the depth range
//! of any sensible camera, so everything is presented inside a "bubble"
//! centred on the observer:
//! - inside `inner_radius` distances are untouched (scale factor 1.0)
//! - between `inner_radius` and `outer_radius` they are compressed along a
//!   monotonic curve
//! - beyond `outer_radius` they are scaled by the constant `min_scale_factor`
//!
//! Direction is always preserved, only magnitude changes.

pub mod projection;


pub use projection::{Projection, ProjectionCurve};

use crate::config::ConfigError;
use serde::{Deserialize, Serialize};

/// Configuration for the observer bubble
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BubbleConfig {
    /// True-space distance (km) below which bodies are shown at full scale
    pub inner_radius: f64,
    /// True-space distance (km) at which the scale factor saturates
    pub outer_radius: f64,
    /// Scale factor applied at and beyond `outer_radius` (0 < value <= 1)
    pub min_scale_factor: f64,
    /// Sharpness of the falloff onset past the inner radius (>= 1)
    pub scaling_exponent: f64,
    /// Minimum scale factor change before an influence notification is raised
    pub influence_threshold: f64,
}

impl Default for BubbleConfig {
    fn default() -> Self {
        Self {
            inner_radius: 10_000.0,        // 10,000 km
            outer_radius: 1_000_000.0,     // 1 million km
            min_scale_factor: 0.1,
            scaling_exponent: 6.0,
            influence_threshold: 0.01,
        }
    }
}

impl BubbleConfig {
    /// Create a bubble configuration with the default exponent and threshold
    pub fn new(inner_radius: f64, outer_radius: f64, min_scale_factor: f64) -> Self {
        Self {
            inner_radius,
            outer_radius,
            min_scale_factor,
            ..Default::default()
        }
    }

    /// Check the invariants the projection curve relies on
    pub fn validate(&self) -> Result<(), ConfigError> {
        let values = [
            self.inner_radius,
            self.outer_radius,
            self.min_scale_factor,
            self.scaling_exponent,
            self.influence_threshold,
        ];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(ConfigError::Invalid(
                "bubble parameters must be finite".to_string(),
            ));
        }
        if self.inner_radius <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "inner radius must be positive, got {}",
                self.inner_radius
            )));
        }
        if self.inner_radius >= self.outer_radius {
            return Err(ConfigError::Invalid(format!(
                "inner radius {} must be smaller than outer radius {}",
                self.inner_radius, self.outer_radius
            )));
        }
        if self.min_scale_factor <= 0.0 || self.min_scale_factor > 1.0 {
            return Err(ConfigError::Invalid(format!(
                "minimum scale factor must be in (0, 1], got {}",
                self.min_scale_factor
            )));
        }
        // Beyond the outer radius projected distance grows as min * d, so the
        // curve has to arrive there without ever shrinking.
        if self.min_scale_factor * self.outer_radius < self.inner_radius {
            return Err(ConfigError::Invalid(format!(
                "min scale factor * outer radius ({}) must not be below inner radius ({})",
                self.min_scale_factor * self.outer_radius,
                self.inner_radius
            )));
        }
        if self.scaling_exponent <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "scaling exponent must be positive, got {}",
                self.scaling_exponent
            )));
        }
        if self.influence_threshold < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "influence threshold must not be negative, got {}",
                self.influence_threshold
            )));
        }
        Ok(())
    }
}
