//! Engine configuration.
//!
//! Loadable from JSON; every section falls back to its defaults:
//!
//! ```json
//! {
//!   "acceleration": "forced-off",
//!   "ring_capacity": 5000,
//!   "telemetry": { "throttle": { "max_similar": 3 } }
//! }
//! ```

use std::path::{Path, PathBuf};

use logflow_accel::AccelConfig;
use logflow_core::Level;
use logflow_telemetry::{ConfigError, TelemetryConfig};
use serde::{Deserialize, Serialize};

/// Acceleration override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AccelerationMode {
    /// Let the selector decide.
    #[default]
    Auto,
    /// Accelerate whenever the backend is usable and memory allows.
    ForcedOn,
    /// Never accelerate.
    ForcedOff,
}

/// Execution-path selection and threshold self-tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    /// Inputs smaller than this always use the reference merge.
    pub hard_floor: usize,
    /// Inputs larger than this accelerate once any sample exists.
    pub hard_ceiling: usize,
    /// Starting per-operation threshold.
    pub initial_threshold: usize,
    /// Required speedup (reference time / accelerated time).
    pub min_gain: f64,
    /// Added to `min_gain` under memory pressure.
    pub pressure_gain_penalty: f64,
    /// Added to `min_gain` on high-end hardware, where the reference
    /// merge is already fast.
    pub high_end_gain_penalty: f64,
    pub tuning_interval_ms: u64,
    /// Bucket samples needed before a threshold may move.
    pub min_samples_for_tuning: u64,
    /// Largest relative threshold change per tuning cycle.
    pub max_adjustment: f64,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            hard_floor: 64,
            hard_ceiling: 20_000,
            initial_threshold: 500,
            min_gain: 1.2,
            pressure_gain_penalty: 0.3,
            high_end_gain_penalty: 0.1,
            tuning_interval_ms: 60_000,
            min_samples_for_tuning: 20,
            max_adjustment: 0.2,
        }
    }
}

/// Backend memory admission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryGuardConfig {
    /// Utilization that triggers reclaim before admission.
    pub critical_utilization: f64,
    /// Utilization that raises the selector's gain bar.
    pub pressure_utilization: f64,
    /// Largest single `grow_capacity` request.
    pub max_growth_bytes: usize,
    pub check_interval_ms: u64,
}

impl Default for MemoryGuardConfig {
    fn default() -> Self {
        Self {
            critical_utilization: 0.9,
            pressure_utilization: 0.7,
            max_growth_bytes: 16 * 1024 * 1024,
            check_interval_ms: 30_000,
        }
    }
}

/// Failure backoff for accelerated operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlacklistConfig {
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for BlacklistConfig {
    fn default() -> Self {
        Self {
            base_backoff_ms: 5_000,
            max_backoff_ms: 30 * 60 * 1_000,
        }
    }
}

/// Performance model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Weight of a new observation in every moving average.
    pub ema_alpha: f64,
    /// Largest input counted as "small".
    pub small_max: usize,
    /// Largest input counted as "medium".
    pub medium_max: usize,
    /// Prior for `a` in `a · n · log2(n + 2)` ms.
    pub reference_coeff_prior: f64,
    /// Prior for `b` in `overhead + b · n` ms.
    pub accelerated_coeff_prior: f64,
    pub accelerated_overhead_prior: f64,
    /// Where to persist the model. `None` disables persistence.
    pub seed_path: Option<PathBuf>,
    pub persist_interval_ms: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            ema_alpha: 0.2,
            small_max: 1_000,
            medium_max: 10_000,
            reference_coeff_prior: 5.0e-5,
            accelerated_coeff_prior: 1.5e-5,
            accelerated_overhead_prior: 0.05,
            seed_path: None,
            persist_interval_ms: 5 * 60 * 1_000,
        }
    }
}

/// Top-level configuration of a [`LogEngine`](crate::LogEngine).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub acceleration: AccelerationMode,
    /// Entries kept in the ring. Default: 1000.
    pub ring_capacity: usize,
    /// Entries below this level are dropped on ingest.
    pub min_severity: Level,
    pub default_operation_timeout_ms: u64,
    /// Fixed session id; generated when absent.
    pub session_id: Option<String>,
    pub selector: SelectorConfig,
    pub memory: MemoryGuardConfig,
    pub blacklist: BlacklistConfig,
    pub metrics: MetricsConfig,
    pub telemetry: TelemetryConfig,
    pub accel: AccelConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            acceleration: AccelerationMode::Auto,
            ring_capacity: 1_000,
            min_severity: Level::Debug,
            default_operation_timeout_ms: 30_000,
            session_id: None,
            selector: SelectorConfig::default(),
            memory: MemoryGuardConfig::default(),
            blacklist: BlacklistConfig::default(),
            metrics: MetricsConfig::default(),
            telemetry: TelemetryConfig::default(),
            accel: AccelConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Small ring, short timers, tiny backend heap.
    pub fn for_testing() -> Self {
        Self {
            ring_capacity: 100,
            min_severity: Level::Trace,
            default_operation_timeout_ms: 1_000,
            session_id: Some("test-session".to_string()),
            selector: SelectorConfig {
                hard_floor: 4,
                hard_ceiling: 2_000,
                initial_threshold: 50,
                tuning_interval_ms: 1_000,
                min_samples_for_tuning: 3,
                ..SelectorConfig::default()
            },
            memory: MemoryGuardConfig {
                check_interval_ms: 500,
                max_growth_bytes: 256 * 1024,
                ..MemoryGuardConfig::default()
            },
            metrics: MetricsConfig {
                persist_interval_ms: 1_000,
                ..MetricsConfig::default()
            },
            telemetry: TelemetryConfig::for_testing(),
            accel: AccelConfig::for_testing(),
            ..Self::default()
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ring_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "ring_capacity",
                reason: "must be greater than zero".into(),
            });
        }
        if self.selector.hard_floor > self.selector.hard_ceiling {
            return Err(ConfigError::InvalidValue {
                field: "selector.hard_floor",
                reason: "cannot exceed hard_ceiling".into(),
            });
        }
        if !(0.0..=1.0).contains(&self.selector.max_adjustment) {
            return Err(ConfigError::InvalidValue {
                field: "selector.max_adjustment",
                reason: "must be within 0.0..=1.0".into(),
            });
        }
        if !(0.0..=1.0).contains(&self.memory.critical_utilization)
            || self.memory.pressure_utilization > self.memory.critical_utilization
        {
            return Err(ConfigError::InvalidValue {
                field: "memory.critical_utilization",
                reason: "must be within 0.0..=1.0 and above pressure_utilization".into(),
            });
        }
        if self.metrics.ema_alpha <= 0.0 || self.metrics.ema_alpha > 1.0 {
            return Err(ConfigError::InvalidValue {
                field: "metrics.ema_alpha",
                reason: "must be within (0.0, 1.0]".into(),
            });
        }
        if self.blacklist.base_backoff_ms == 0
            || self.blacklist.base_backoff_ms > self.blacklist.max_backoff_ms
        {
            return Err(ConfigError::InvalidValue {
                field: "blacklist.base_backoff_ms",
                reason: "must be non-zero and at most max_backoff_ms".into(),
            });
        }
        self.telemetry.validate()
    }
}
