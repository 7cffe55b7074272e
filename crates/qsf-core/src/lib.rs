//! # QSF Core
//!
//! Core runtime library for the QSF engine.
//!
//! This crate provides the substrate the link graph and movement layers run on:
//! - **ECS**: Map-scoped entity world with per-type component storage
//! - **Memory**: Generational object pools with stale-handle detection
//! - **Time**: Fixed-rate simulation ticks with render interpolation factor
//! - **Scene**: Transforms and their composition
//! - **Math**: glam re-exports and rotation helpers

pub mod ecs;
pub mod math;
pub mod memory;
pub mod scene;
pub mod time;

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use ecs::{Component, Entity, MapId, Prototype, World};
pub use memory::{MemoryStats, Pool, PoolHandle};
pub use scene::Transform;
pub use time::{DeltaTime, FixedTimeStep, TimeManager};

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    ParseError(#[from] serde_json::Error),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Result type for configuration loading
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Simulation ticks per second
    pub tick_rate: f64,
    /// Maximum ticks run in a single frame
    pub max_ticks_per_frame: u32,
    /// Time scale (for slow motion or fast forward)
    pub time_scale: f64,
    /// Map the simulated world belongs to
    pub map_id: MapId,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_rate: 30.0,
            max_ticks_per_frame: 8,
            time_scale: 1.0,
            map_id: 0,
        }
    }
}

impl EngineConfig {
    /// Parse a configuration from JSON; missing fields take their defaults
    pub fn from_json_str(json: &str) -> ConfigResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file
    pub fn from_json_file(path: &Path) -> ConfigResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Check value ranges
    pub fn validate(&self) -> ConfigResult<()> {
        if !(self.tick_rate.is_finite() && self.tick_rate > 0.0) {
            return Err(ConfigError::InvalidValue {
                field: "tick_rate",
                reason: format!("must be positive, got {}", self.tick_rate),
            });
        }
        if self.max_ticks_per_frame == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_ticks_per_frame",
                reason: "must be at least 1".to_string(),
            });
        }
        if !(self.time_scale.is_finite() && self.time_scale >= 0.0) {
            return Err(ConfigError::InvalidValue {
                field: "time_scale",
                reason: format!("must be finite and not negative, got {}", self.time_scale),
            });
        }
        Ok(())
    }

    /// Fixed step derived from the tick rate
    pub fn fixed_time_step(&self) -> FixedTimeStep {
        FixedTimeStep::from_hz(self.tick_rate).with_max_updates(self.max_ticks_per_frame)
    }

    /// Build a time manager for this configuration
    pub fn time_manager(&self) -> TimeManager {
        let mut time = TimeManager::new(self.fixed_time_step());
        time.set_time_scale(self.time_scale);
        time
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.tick_rate, 30.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = EngineConfig::from_json_str(r#"{ "tick_rate": 20.0 }"#).unwrap();
        assert_eq!(config.tick_rate, 20.0);
        assert_eq!(config.max_ticks_per_frame, 8);
        assert!((config.fixed_time_step().step - 0.05).abs() < 1e-9);
    }

    #[test]
    fn test_invalid_tick_rate_rejected() {
        let err = EngineConfig::from_json_str(r#"{ "tick_rate": 0.0 }"#).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { field: "tick_rate", .. }));
    }

    #[test]
    fn test_invalid_time_scale_rejected() {
        for time_scale in [-1.0, f64::NAN, f64::INFINITY] {
            let config = EngineConfig {
                time_scale,
                ..EngineConfig::default()
            };
            assert!(matches!(
                config.validate(),
                Err(ConfigError::InvalidValue { field: "time_scale", .. })
            ));
        }
        let paused = EngineConfig {
            time_scale: 0.0,
            ..EngineConfig::default()
        };
        assert!(paused.validate().is_ok());
    }

    #[test]
    fn test_malformed_json_rejected() {
        let err = EngineConfig::from_json_str("{ tick_rate").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }
}
