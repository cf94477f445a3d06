//! Execution-path selection.
//!
//! [`decide`] is a pure function of a [`SelectionInput`]; the engine
//! gathers the input (backend state, blacklist, memory pressure, model
//! gain) and runs the memory guard afterwards for positive decisions.
//!
//! Decision order:
//!
//! 1. backend unusable or operation blacklisted → reference
//! 2. forced-off → reference, forced-on → accelerated
//! 3. below the hard floor → reference
//! 4. above the hard ceiling with at least one sample → accelerated
//! 5. estimated gain must clear the required bar and the input must reach
//!    the operation's adaptive threshold
//!
//! Thresholds are tuned per operation from the observed bucket gains.

use rustc_hash::FxHashMap;
use serde::Serialize;

use crate::config::{AccelerationMode, SelectorConfig};
use crate::metrics::{PerformanceMetricsTracker, SizeBucket};

/// Why a path was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    BackendUnavailable,
    Blacklisted,
    ForcedOff,
    ForcedOn,
    BelowFloor,
    AboveCeiling,
    InsufficientGain,
    BelowThreshold,
    EstimatedGain,
    /// Selected, then refused by the memory guard.
    MemoryGuard,
}

impl DecisionReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DecisionReason::BackendUnavailable => "backend_unavailable",
            DecisionReason::Blacklisted => "blacklisted",
            DecisionReason::ForcedOff => "forced_off",
            DecisionReason::ForcedOn => "forced_on",
            DecisionReason::BelowFloor => "below_floor",
            DecisionReason::AboveCeiling => "above_ceiling",
            DecisionReason::InsufficientGain => "insufficient_gain",
            DecisionReason::BelowThreshold => "below_threshold",
            DecisionReason::EstimatedGain => "estimated_gain",
            DecisionReason::MemoryGuard => "memory_guard",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PathDecision {
    pub accelerate: bool,
    pub reason: DecisionReason,
    pub estimated_gain: f64,
    pub required_gain: f64,
}

/// Everything [`decide`] looks at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SelectionInput {
    pub input_size: usize,
    pub mode: AccelerationMode,
    pub backend_ready: bool,
    pub blacklisted: bool,
    pub has_samples: bool,
    pub estimated_gain: f64,
    pub memory_pressure: bool,
    pub high_end: bool,
    pub threshold: usize,
}

pub fn required_gain(config: &SelectorConfig, memory_pressure: bool, high_end: bool) -> f64 {
    let mut required = config.min_gain;
    if memory_pressure {
        required += config.pressure_gain_penalty;
    }
    if high_end {
        required += config.high_end_gain_penalty;
    }
    required
}

pub fn decide(input: &SelectionInput, config: &SelectorConfig) -> PathDecision {
    let required = required_gain(config, input.memory_pressure, input.high_end);
    let verdict = |accelerate, reason| PathDecision {
        accelerate,
        reason,
        estimated_gain: input.estimated_gain,
        required_gain: required,
    };

    if !input.backend_ready {
        return verdict(false, DecisionReason::BackendUnavailable);
    }
    if input.blacklisted {
        return verdict(false, DecisionReason::Blacklisted);
    }
    match input.mode {
        AccelerationMode::ForcedOff => return verdict(false, DecisionReason::ForcedOff),
        AccelerationMode::ForcedOn => return verdict(true, DecisionReason::ForcedOn),
        AccelerationMode::Auto => {}
    }
    if input.input_size < config.hard_floor {
        return verdict(false, DecisionReason::BelowFloor);
    }
    if input.input_size > config.hard_ceiling && input.has_samples {
        return verdict(true, DecisionReason::AboveCeiling);
    }
    if input.estimated_gain < required {
        return verdict(false, DecisionReason::InsufficientGain);
    }
    if input.input_size < input.threshold {
        return verdict(false, DecisionReason::BelowThreshold);
    }
    verdict(true, DecisionReason::EstimatedGain)
}

/// One threshold move made by [`ExecutionPathSelector::tune`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThresholdChange {
    pub operation: String,
    pub from: usize,
    pub to: usize,
}

/// Holds the mode and per-operation adaptive thresholds.
#[derive(Debug)]
pub struct ExecutionPathSelector {
    config: SelectorConfig,
    mode: AccelerationMode,
    thresholds: FxHashMap<String, usize>,
}

impl ExecutionPathSelector {
    pub fn new(config: SelectorConfig, mode: AccelerationMode) -> Self {
        Self {
            config,
            mode,
            thresholds: FxHashMap::default(),
        }
    }

    pub fn config(&self) -> &SelectorConfig {
        &self.config
    }

    pub fn mode(&self) -> AccelerationMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: AccelerationMode) {
        self.mode = mode;
    }

    pub fn threshold(&self, operation: &str) -> usize {
        self.thresholds
            .get(operation)
            .copied()
            .unwrap_or(self.config.initial_threshold)
    }

    /// Adjust one operation's threshold from its bucket gains.
    ///
    /// Small inputs consistently far above the bar lower the threshold;
    /// medium inputs below the bar raise it. At most one move of at most
    /// `max_adjustment` per call, clamped to the floor/ceiling.
    pub fn tune(
        &mut self,
        operation: &str,
        metrics: &PerformanceMetricsTracker,
        memory_pressure: bool,
        high_end: bool,
    ) -> Option<ThresholdChange> {
        let required = required_gain(&self.config, memory_pressure, high_end);
        let current = self.threshold(operation);
        let small = metrics.bucket_gain(operation, SizeBucket::Small);
        let medium = metrics.bucket_gain(operation, SizeBucket::Medium);
        let min_samples = self.config.min_samples_for_tuning;
        let step = self.config.max_adjustment;

        let proposed = if small.samples >= min_samples && small.gain >= required * 1.5 {
            (current as f64 * (1.0 - step)).floor() as usize
        } else if medium.samples >= min_samples && medium.gain < required {
            (current as f64 * (1.0 + step)).ceil() as usize
        } else {
            return None;
        };
        let proposed = proposed.clamp(self.config.hard_floor, self.config.hard_ceiling);
        if proposed == current {
            return None;
        }

        self.thresholds.insert(operation.to_string(), proposed);
        log::info!("Acceleration threshold for '{operation}' moved {current} -> {proposed}");
        Some(ThresholdChange {
            operation: operation.to_string(),
            from: current,
            to: proposed,
        })
    }

    /// Tune every operation the tracker knows.
    pub fn tune_all(
        &mut self,
        metrics: &PerformanceMetricsTracker,
        memory_pressure: bool,
        high_end: bool,
    ) -> Vec<ThresholdChange> {
        let mut operations: Vec<String> = metrics.operations().map(str::to_string).collect();
        operations.sort();
        operations
            .iter()
            .filter_map(|op| self.tune(op, metrics, memory_pressure, high_end))
            .collect()
    }

    /// Sorted thresholds that differ from the initial one.
    pub fn thresholds(&self) -> Vec<(String, usize)> {
        let mut all: Vec<_> = self
            .thresholds
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        all.sort();
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MetricsConfig;
    use crate::metrics::ExecutionPath;

    fn input() -> SelectionInput {
        SelectionInput {
            input_size: 1_000,
            mode: AccelerationMode::Auto,
            backend_ready: true,
            blacklisted: false,
            has_samples: true,
            estimated_gain: 3.0,
            memory_pressure: false,
            high_end: false,
            threshold: 500,
        }
    }

    fn config() -> SelectorConfig {
        SelectorConfig::default()
    }

    #[test]
    fn test_gain_and_threshold() {
        let d = decide(&input(), &config());
        assert!(d.accelerate);
        assert_eq!(d.reason, DecisionReason::EstimatedGain);

        let d = decide(&SelectionInput { input_size: 400, ..input() }, &config());
        assert_eq!(d.reason, DecisionReason::BelowThreshold);

        let d = decide(&SelectionInput { estimated_gain: 1.1, ..input() }, &config());
        assert_eq!(d.reason, DecisionReason::InsufficientGain);
    }

    #[test]
    fn test_order_of_checks() {
        let d = decide(
            &SelectionInput {
                backend_ready: false,
                mode: AccelerationMode::ForcedOn,
                ..input()
            },
            &config(),
        );
        assert_eq!(d.reason, DecisionReason::BackendUnavailable);

        let d = decide(
            &SelectionInput {
                blacklisted: true,
                mode: AccelerationMode::ForcedOn,
                ..input()
            },
            &config(),
        );
        assert_eq!(d.reason, DecisionReason::Blacklisted);

        let d = decide(
            &SelectionInput {
                input_size: 1,
                mode: AccelerationMode::ForcedOn,
                ..input()
            },
            &config(),
        );
        assert!(d.accelerate);
        assert_eq!(d.reason, DecisionReason::ForcedOn);
    }

    #[test]
    fn test_forced_off_always_reference() {
        for size in [0, 10, 1_000, 1_000_000] {
            let d = decide(
                &SelectionInput {
                    input_size: size,
                    mode: AccelerationMode::ForcedOff,
                    estimated_gain: 100.0,
                    ..input()
                },
                &config(),
            );
            assert!(!d.accelerate);
        }
    }

    #[test]
    fn test_floor_and_ceiling() {
        let d = decide(&SelectionInput { input_size: 10, ..input() }, &config());
        assert_eq!(d.reason, DecisionReason::BelowFloor);

        let big = SelectionInput {
            input_size: 50_000,
            estimated_gain: 0.5,
            ..input()
        };
        assert_eq!(decide(&big, &config()).reason, DecisionReason::AboveCeiling);
        let unsampled = SelectionInput { has_samples: false, ..big };
        assert_eq!(decide(&unsampled, &config()).reason, DecisionReason::InsufficientGain);
    }

    #[test]
    fn test_required_gain_raised() {
        let c = config();
        assert_eq!(required_gain(&c, false, false), 1.2);
        assert!(required_gain(&c, true, false) > required_gain(&c, false, false));
        assert!(required_gain(&c, false, true) > required_gain(&c, false, false));

        let d = decide(
            &SelectionInput {
                estimated_gain: 1.4,
                memory_pressure: true,
                ..input()
            },
            &c,
        );
        assert_eq!(d.reason, DecisionReason::InsufficientGain);
    }

    #[test]
    fn test_tuning_lowers_on_high_small_gain() {
        let mut metrics = PerformanceMetricsTracker::new(MetricsConfig::default());
        // Fast accelerated merges of small inputs: observed gain far above the bar.
        for _ in 0..25 {
            metrics.record("merge", ExecutionPath::Accelerated, 900, 0.01);
        }
        let mut selector = ExecutionPathSelector::new(config(), AccelerationMode::Auto);
        let change = selector.tune("merge", &metrics, false, false).unwrap();
        assert_eq!(change.from, 500);
        assert_eq!(change.to, 400);
        assert_eq!(selector.threshold("merge"), 400);
    }

    #[test]
    fn test_tuning_raises_on_poor_medium_gain() {
        let mut metrics = PerformanceMetricsTracker::new(MetricsConfig::default());
        for _ in 0..25 {
            metrics.record("merge", ExecutionPath::Accelerated, 5_000, 100.0);
        }
        let mut selector = ExecutionPathSelector::new(config(), AccelerationMode::Auto);
        let change = selector.tune("merge", &metrics, false, false).unwrap();
        assert_eq!(change.to, 600);
    }

    #[test]
    fn test_tuning_needs_samples() {
        let mut metrics = PerformanceMetricsTracker::new(MetricsConfig::default());
        for _ in 0..5 {
            metrics.record("merge", ExecutionPath::Accelerated, 900, 0.01);
        }
        let mut selector = ExecutionPathSelector::new(config(), AccelerationMode::Auto);
        assert!(selector.tune("merge", &metrics, false, false).is_none());
        assert!(selector.tune_all(&metrics, false, false).is_empty());
    }
}
