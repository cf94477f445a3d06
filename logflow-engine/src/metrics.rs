//! Per-operation performance model.
//!
//! Each operation keeps two cost models fitted from observed merges:
//!
//! ```text
//!   reference(n)   = a · n · log2(n + 2)        (super-linear)
//!   accelerated(n) = overhead + b · n           (near-linear, fixed setup cost)
//!
//!   gain(n) = reference(n) / accelerated(n)
//! ```
//!
//! Coefficients start from configured priors and move by exponential
//! moving average. Observed gains are also tracked per size bucket
//! (small / medium / large) to drive threshold tuning.
//!
//! The model can be written to a JSON seed file and read back at startup.
//! A loaded seed keeps its coefficients but its sample counts are capped,
//! so fresh observations take over quickly.

use std::collections::BTreeMap;
use std::path::Path;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::config::MetricsConfig;
use crate::error::EngineError;

/// Sample counts a seed is allowed to carry into a new session.
const SEED_WEIGHT: u64 = 5;

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPath {
    Reference,
    Accelerated,
}

impl ExecutionPath {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionPath::Reference => "reference",
            ExecutionPath::Accelerated => "accelerated",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeBucket {
    Small,
    Medium,
    Large,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SizeBucketCounts {
    pub small: u64,
    pub medium: u64,
    pub large: u64,
}

impl SizeBucketCounts {
    fn bump(&mut self, bucket: SizeBucket) {
        match bucket {
            SizeBucket::Small => self.small += 1,
            SizeBucket::Medium => self.medium += 1,
            SizeBucket::Large => self.large += 1,
        }
    }
}

/// Moving-average observed gain for one bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GainStat {
    pub gain: f64,
    pub samples: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BucketGains {
    pub small: GainStat,
    pub medium: GainStat,
    pub large: GainStat,
}

impl BucketGains {
    pub fn get(&self, bucket: SizeBucket) -> GainStat {
        match bucket {
            SizeBucket::Small => self.small,
            SizeBucket::Medium => self.medium,
            SizeBucket::Large => self.large,
        }
    }

    fn get_mut(&mut self, bucket: SizeBucket) -> &mut GainStat {
        match bucket {
            SizeBucket::Small => &mut self.small,
            SizeBucket::Medium => &mut self.medium,
            SizeBucket::Large => &mut self.large,
        }
    }
}

/// Rolling statistics for one operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceSample {
    /// Milliseconds.
    pub avg_reference_time: f64,
    pub avg_accelerated_time: f64,
    pub operations_count: u64,
    pub size_bucket_counts: SizeBucketCounts,
    pub reference_samples: u64,
    pub accelerated_samples: u64,
    pub reference_coeff: f64,
    pub accelerated_coeff: f64,
    pub accelerated_overhead: f64,
    pub bucket_gains: BucketGains,
}

impl PerformanceSample {
    fn from_priors(config: &MetricsConfig) -> Self {
        Self {
            avg_reference_time: 0.0,
            avg_accelerated_time: 0.0,
            operations_count: 0,
            size_bucket_counts: SizeBucketCounts::default(),
            reference_samples: 0,
            accelerated_samples: 0,
            reference_coeff: config.reference_coeff_prior,
            accelerated_coeff: config.accelerated_coeff_prior,
            accelerated_overhead: config.accelerated_overhead_prior,
            bucket_gains: BucketGains::default(),
        }
    }

    fn reference_model(&self, n: usize) -> f64 {
        self.reference_coeff * n_log_n(n)
    }

    fn accelerated_model(&self, n: usize) -> f64 {
        self.accelerated_overhead + self.accelerated_coeff * n as f64
    }

    fn gain(&self, n: usize) -> f64 {
        let accelerated = self.accelerated_model(n);
        if accelerated <= f64::EPSILON {
            return f64::MAX;
        }
        self.reference_model(n) / accelerated
    }
}

fn n_log_n(n: usize) -> f64 {
    let n = n as f64;
    n * (n + 2.0).log2()
}

fn ema(current: f64, observed: f64, alpha: f64, first: bool) -> f64 {
    if first {
        observed
    } else {
        current + alpha * (observed - current)
    }
}

/// Serialized form of the whole model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub version: u32,
    pub operations: BTreeMap<String, PerformanceSample>,
}

/// The tracker.
#[derive(Debug)]
pub struct PerformanceMetricsTracker {
    config: MetricsConfig,
    samples: FxHashMap<String, PerformanceSample>,
    dirty: bool,
}

impl PerformanceMetricsTracker {
    pub fn new(config: MetricsConfig) -> Self {
        Self {
            config,
            samples: FxHashMap::default(),
            dirty: false,
        }
    }

    pub fn bucket_for(&self, n: usize) -> SizeBucket {
        if n <= self.config.small_max {
            SizeBucket::Small
        } else if n <= self.config.medium_max {
            SizeBucket::Medium
        } else {
            SizeBucket::Large
        }
    }

    /// Fold one completed merge of `n` entries into the model.
    pub fn record(&mut self, operation: &str, path: ExecutionPath, n: usize, duration_ms: f64) {
        let alpha = self.config.ema_alpha;
        let bucket = self.bucket_for(n);
        let sample = self
            .samples
            .entry(operation.to_string())
            .or_insert_with(|| PerformanceSample::from_priors(&self.config));

        sample.operations_count += 1;
        sample.size_bucket_counts.bump(bucket);
        let duration_ms = duration_ms.max(0.0);

        let observed_gain = match path {
            ExecutionPath::Reference => {
                let first = sample.reference_samples == 0;
                sample.avg_reference_time = ema(sample.avg_reference_time, duration_ms, alpha, first);
                if n > 0 {
                    let coeff = duration_ms / n_log_n(n);
                    sample.reference_coeff = ema(sample.reference_coeff, coeff, alpha, false);
                }
                sample.reference_samples += 1;
                let predicted = sample.accelerated_model(n);
                (duration_ms > 0.0 && predicted > 0.0).then(|| duration_ms / predicted)
            }
            ExecutionPath::Accelerated => {
                let first = sample.accelerated_samples == 0;
                sample.avg_accelerated_time =
                    ema(sample.avg_accelerated_time, duration_ms, alpha, first);
                if n > 0 {
                    let coeff = (duration_ms - sample.accelerated_overhead).max(0.0) / n as f64;
                    sample.accelerated_coeff = ema(sample.accelerated_coeff, coeff, alpha, false);
                }
                let residual = (duration_ms - sample.accelerated_coeff * n as f64).max(0.0);
                sample.accelerated_overhead =
                    ema(sample.accelerated_overhead, residual, alpha, false);
                sample.accelerated_samples += 1;
                let predicted = sample.reference_model(n);
                (duration_ms > 0.0).then(|| predicted / duration_ms)
            }
        };

        if let Some(observed) = observed_gain {
            let stat = sample.bucket_gains.get_mut(bucket);
            stat.gain = ema(stat.gain, observed, alpha, stat.samples == 0);
            stat.samples += 1;
        }
        self.dirty = true;
    }

    /// Predicted speedup of the accelerated path for `n` entries.
    pub fn estimate_gain(&self, operation: &str, n: usize) -> f64 {
        match self.samples.get(operation) {
            Some(sample) => sample.gain(n),
            None => PerformanceSample::from_priors(&self.config).gain(n),
        }
    }

    pub fn has_samples(&self, operation: &str) -> bool {
        self.samples
            .get(operation)
            .is_some_and(|s| s.operations_count > 0)
    }

    pub fn sample(&self, operation: &str) -> Option<&PerformanceSample> {
        self.samples.get(operation)
    }

    pub fn bucket_gain(&self, operation: &str, bucket: SizeBucket) -> GainStat {
        self.samples
            .get(operation)
            .map(|s| s.bucket_gains.get(bucket))
            .unwrap_or_default()
    }

    pub fn operations(&self) -> impl Iterator<Item = &str> {
        self.samples.keys().map(String::as_str)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            version: SNAPSHOT_VERSION,
            operations: self
                .samples
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    /// Write the model to `path` as pretty JSON.
    pub fn save(&mut self, path: &Path) -> Result<(), EngineError> {
        let json = serde_json::to_string_pretty(&self.snapshot())?;
        std::fs::write(path, json)?;
        self.dirty = false;
        log::debug!("Performance metrics saved to {}", path.display());
        Ok(())
    }

    /// Seed the model from a previously saved file. Returns the number of
    /// operations loaded.
    pub fn load_seed(&mut self, path: &Path) -> Result<usize, EngineError> {
        let json = std::fs::read_to_string(path)?;
        let snapshot: MetricsSnapshot = serde_json::from_str(&json)?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(EngineError::Persistence(format!(
                "unsupported metrics seed version {}",
                snapshot.version
            )));
        }

        let loaded = snapshot.operations.len();
        for (operation, mut sample) in snapshot.operations {
            sample.operations_count = sample.operations_count.min(SEED_WEIGHT);
            sample.reference_samples = sample.reference_samples.min(SEED_WEIGHT);
            sample.accelerated_samples = sample.accelerated_samples.min(SEED_WEIGHT);
            for bucket in [SizeBucket::Small, SizeBucket::Medium, SizeBucket::Large] {
                let stat = sample.bucket_gains.get_mut(bucket);
                stat.samples = stat.samples.min(SEED_WEIGHT);
            }
            self.samples.insert(operation, sample);
        }
        log::info!("Seeded performance model with {loaded} operations from {}", path.display());
        Ok(loaded)
    }
}
