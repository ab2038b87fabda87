//! Configuration types for the simulation

use crate::core::coordinates::BubbleConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Errors raised while loading or validating configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Tuning for the Kepler solver
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Newton-Raphson iteration cap for Kepler's equation
    pub max_iterations: u32,
    /// Convergence tolerance on the eccentric anomaly (radians)
    pub tolerance: f64,
    /// Eccentricities above this are clamped on the elliptical path. At
    /// most [`SolverConfig::ECCENTRICITY_CEILING`].
    pub max_eccentricity: f64,
}

impl SolverConfig {
    /// Highest eccentricity clamp a configuration may set
    pub const ECCENTRICITY_CEILING: f64 = 0.99;
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_iterations: 8,
            tolerance: 1e-8,
            max_eccentricity: SolverConfig::ECCENTRICITY_CEILING,
        }
    }
}

/// Layout of the spatial index
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpatialConfig {
    /// Half the edge length (km) of the indexed cube centred on the origin
    pub half_extent: f64,
    /// Entries a leaf holds before it splits
    pub leaf_capacity: usize,
    /// Maximum subdivision depth
    pub max_depth: u32,
    /// Below this many entries queries scan linearly
    pub linear_threshold: usize,
    /// Re-inserted entries tolerated before the tree is rebuilt to drop
    /// emptied nodes. 0 never rebuilds.
    pub rebuild_after: u64,
}

impl Default for SpatialConfig {
    fn default() -> Self {
        Self {
            half_extent: 1.0e10, // ~67 AU
            leaf_capacity: 16,
            max_depth: 20,
            linear_threshold: 64,
            rebuild_after: 4_096,
        }
    }
}

/// Save slot and auto-save settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Directory holding save slots and their backups
    pub save_dir: PathBuf,
    /// Whether the interval auto-save runs at all
    pub autosave_enabled: bool,
    /// Seconds between auto-save attempts
    pub autosave_interval_secs: u64,
    /// Slot name used by auto-save
    pub autosave_slot: String,
    /// Slot name used by pre-transition checkpoints
    pub checkpoint_slot: String,
    /// Number of rotated backups kept per slot
    pub backup_count: usize,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            save_dir: PathBuf::from("saves"),
            autosave_enabled: true,
            autosave_interval_secs: 300,
            autosave_slot: "autosave".to_string(),
            checkpoint_slot: "checkpoint".to_string(),
            backup_count: 5,
        }
    }
}

impl PersistenceConfig {
    /// Auto-save interval as a duration
    pub fn autosave_interval(&self) -> Duration {
        Duration::from_secs(self.autosave_interval_secs)
    }
}

/// Top-level simulation configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub bubble: BubbleConfig,
    pub spatial: SpatialConfig,
    pub solver: SolverConfig,
    pub persistence: PersistenceConfig,
    /// Simulated seconds per real second
    pub time_warp: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            bubble: BubbleConfig::default(),
            spatial: SpatialConfig::default(),
            solver: SolverConfig::default(),
            persistence: PersistenceConfig::default(),
            time_warp: 1.0,
        }
    }
}

impl SimulationConfig {
    /// Create the default configuration with a specific save directory
    pub fn with_save_dir(save_dir: impl Into<PathBuf>) -> Self {
        let mut config = Self::default();
        config.persistence.save_dir = save_dir.into();
        config
    }

    /// Check every section for values the simulation cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bubble.validate()?;

        if !(self.time_warp.is_finite() && self.time_warp > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "time warp must be positive, got {}",
                self.time_warp
            )));
        }
        if self.solver.max_iterations == 0 {
            return Err(ConfigError::Invalid(
                "solver needs at least one iteration".to_string(),
            ));
        }
        if !(self.solver.tolerance > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "solver tolerance must be positive, got {}",
                self.solver.tolerance
            )));
        }
        if !(0.0..=SolverConfig::ECCENTRICITY_CEILING).contains(&self.solver.max_eccentricity) {
            return Err(ConfigError::Invalid(format!(
                "max eccentricity must be in [0, {}], got {}",
                SolverConfig::ECCENTRICITY_CEILING,
                self.solver.max_eccentricity
            )));
        }
        if !(self.spatial.half_extent.is_finite() && self.spatial.half_extent > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "spatial half extent must be positive, got {}",
                self.spatial.half_extent
            )));
        }
        if self.spatial.leaf_capacity == 0 {
            return Err(ConfigError::Invalid(
                "leaf capacity must be at least 1".to_string(),
            ));
        }
        if self.persistence.autosave_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "auto-save interval must be at least one second".to_string(),
            ));
        }

        Ok(())
    }

    /// Load a configuration from a JSON file; missing fields take defaults
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = ?path, "Loading simulation config");

        let json = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;

        debug!(config = ?config, "Simulation config loaded");
        Ok(config)
    }

    /// Write this configuration as pretty JSON
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        info!(path = ?path, "Simulation config saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SimulationConfig::default();
        assert_eq!(config.persistence.autosave_interval(), Duration::from_secs(300));
        assert_eq!(config.persistence.backup_count, 5);
        assert_eq!(config.solver.max_iterations, 8);
        assert_eq!(config.solver.tolerance, 1e-8);
        assert_eq!(config.time_warp, 1.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{
            "bubble": { "inner_radius": 5000.0 },
            "persistence": { "backup_count": 2 }
        }"#;
        let config: SimulationConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.bubble.inner_radius, 5000.0);
        assert_eq!(config.bubble.outer_radius, 1_000_000.0);
        assert_eq!(config.persistence.backup_count, 2);
        assert_eq!(config.persistence.autosave_slot, "autosave");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_values() {
        let mut config = SimulationConfig::default();
        config.time_warp = 0.0;
        assert!(config.validate().is_err());

        let mut config = SimulationConfig::default();
        config.solver.max_eccentricity = 1.0;
        assert!(config.validate().is_err());
        config.solver.max_eccentricity = 0.995;
        assert!(config.validate().is_err());
        config.solver.max_eccentricity = f64::NAN;
        assert!(config.validate().is_err());
        config.solver.max_eccentricity = 0.99;
        assert!(config.validate().is_ok());
        config.solver.max_eccentricity = 0.5;
        assert!(config.validate().is_ok());

        let mut config = SimulationConfig::default();
        config.bubble.outer_radius = config.bubble.inner_radius;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sim.json");

        let mut config = SimulationConfig::with_save_dir(dir.path().join("saves"));
        config.time_warp = 10.0;
        config.save_to_file(&path).unwrap();

        let loaded = SimulationConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }
}
