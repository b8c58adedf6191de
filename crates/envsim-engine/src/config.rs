//! Engine configuration and validation.
//!
//! Every field has a default, so embedders can deserialize a partial
//! document (TOML, JSON) and fill in the rest.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ── LoopConfig ─────────────────────────────────────────────────────

/// Cadence of the background auto-advance loop.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    /// Wall-time sleep between ticks, in milliseconds. Default: 10.
    pub tick_interval_ms: u64,
    /// How long `stop()` waits for the loop thread to exit, in
    /// milliseconds. Default: 1000.
    pub stop_timeout_ms: u64,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 10,
            stop_timeout_ms: 1000,
        }
    }
}

impl LoopConfig {
    /// Tick interval as a [`Duration`].
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Stop timeout as a [`Duration`].
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

// ── EngineConfig ───────────────────────────────────────────────────

/// Construction-time settings for a
/// [`SimulationEngine`](crate::SimulationEngine).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Initial virtual seconds per wall second. Default: 1.0.
    pub time_scale: f64,
    /// Whether [`start_configured`](crate::SimulationEngine::start_configured)
    /// spawns the auto-advance loop. Default: false.
    pub auto_advance: bool,
    /// Background loop cadence.
    #[serde(rename = "loop")]
    pub loop_config: LoopConfig,
    /// Maximum undo entries retained. Default: 1000.
    pub max_history: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            time_scale: 1.0,
            auto_advance: false,
            loop_config: LoopConfig::default(),
            max_history: 1000,
        }
    }
}

impl EngineConfig {
    /// Check structural invariants.
    ///
    /// 1. `time_scale` is finite and positive.
    /// 2. `tick_interval_ms` is at least 1.
    /// 3. `stop_timeout_ms` is at least 1.
    /// 4. `max_history` is at least 1.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.time_scale.is_finite() || self.time_scale <= 0.0 {
            return Err(ConfigError::InvalidTimeScale {
                value: self.time_scale,
            });
        }
        if self.loop_config.tick_interval_ms == 0 {
            return Err(ConfigError::InvalidTickInterval {
                value: self.loop_config.tick_interval_ms,
            });
        }
        if self.loop_config.stop_timeout_ms == 0 {
            return Err(ConfigError::InvalidStopTimeout {
                value: self.loop_config.stop_timeout_ms,
            });
        }
        if self.max_history == 0 {
            return Err(ConfigError::InvalidHistoryCapacity {
                value: self.max_history,
            });
        }
        Ok(())
    }
}

// ── ConfigError ────────────────────────────────────────────────────

/// Errors detected during [`EngineConfig::validate()`].
#[derive(Clone, Debug, PartialEq, Error)]
pub enum ConfigError {
    /// `time_scale` is NaN, infinite, zero, or negative.
    #[error("time_scale must be finite and positive, got {value}")]
    InvalidTimeScale {
        /// The invalid value.
        value: f64,
    },
    /// `tick_interval_ms` is zero.
    #[error("tick_interval_ms must be at least 1, got {value}")]
    InvalidTickInterval {
        /// The invalid value.
        value: u64,
    },
    /// `stop_timeout_ms` is zero.
    #[error("stop_timeout_ms must be at least 1, got {value}")]
    InvalidStopTimeout {
        /// The invalid value.
        value: u64,
    },
    /// `max_history` is zero.
    #[error("max_history must be at least 1, got {value}")]
    InvalidHistoryCapacity {
        /// The invalid value.
        value: usize,
    },
}
