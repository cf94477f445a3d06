//! Similarity throttling for low-severity messages.
//!
//! ```text
//!  (level, component, signature) ──► ThrottleRecord { count, window_start, samples }
//!
//!  count ≤ cap      → Pass
//!  count > cap      → Suppressed (never stored, never forwarded)
//!  window elapsed   → record closed; if count > cap emit one RollUp
//! ```
//!
//! WARN and above always pass, as do messages matching an
//! "always surface" pattern. Records live in memory only.

use logflow_core::{EntryDraft, Level};
use regex::RegexSet;
use rustc_hash::FxHashMap;
use serde::Serialize;

use crate::config::{ConfigError, ThrottleConfig};
use crate::normalize::MessageNormalizer;

const MAX_SAMPLES: usize = 3;

/// Tag carried by roll-up entries.
pub const ROLLUP_TAG: &str = "throttle-rollup";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Pass,
    Suppressed,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ThrottleKey {
    level: Level,
    component: String,
    signature: String,
}

#[derive(Debug, Clone)]
struct ThrottleRecord {
    count: u32,
    window_start: u64,
    samples: Vec<String>,
}

/// Summary of one closed window that went over its cap.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RollUp {
    pub level: Level,
    pub component: String,
    pub signature: String,
    /// Every occurrence in the window, passed or not.
    pub count: u32,
    pub suppressed: u32,
    pub samples: Vec<String>,
    pub window_start: u64,
    pub window_ms: u64,
}

impl RollUp {
    pub fn message(&self) -> String {
        format!(
            "{} similar messages in {} ms ({} suppressed): {}",
            self.count, self.window_ms, self.suppressed, self.signature
        )
    }

    /// Entry recording this roll-up, at the level of the throttled messages.
    pub fn to_draft(&self) -> EntryDraft {
        let samples: Vec<logflow_core::ContextValue> = self
            .samples
            .iter()
            .map(|s| s.as_str().into())
            .collect();
        EntryDraft::new(self.level, self.component.clone(), self.message())
            .with_field("count", self.count)
            .with_field("suppressed", self.suppressed)
            .with_field("windowStart", self.window_start)
            .with_field("samples", logflow_core::ContextValue::List(samples))
            .with_tag(ROLLUP_TAG)
    }
}

/// The throttle gate.
#[derive(Debug)]
pub struct ThrottleGate {
    config: ThrottleConfig,
    normalizer: MessageNormalizer,
    always_surface: RegexSet,
    records: FxHashMap<ThrottleKey, ThrottleRecord>,
    /// Roll-ups closed by `admit` before the next sweep.
    closed: Vec<RollUp>,
    suppressed_total: u64,
}

impl ThrottleGate {
    pub fn new(config: ThrottleConfig) -> Result<Self, ConfigError> {
        let always_surface = RegexSet::new(&config.always_surface).map_err(|source| {
            ConfigError::InvalidPattern {
                pattern: config.always_surface.join(" | "),
                source,
            }
        })?;
        let normalizer = MessageNormalizer::new(config.signature_cache)?;
        Ok(Self {
            config,
            normalizer,
            always_surface,
            records: FxHashMap::default(),
            closed: Vec::new(),
            suppressed_total: 0,
        })
    }

    pub fn config(&self) -> &ThrottleConfig {
        &self.config
    }

    /// Suppression cap for `component`.
    pub fn cap_for(&self, component: &str) -> u32 {
        self.config
            .component_caps
            .get(component)
            .copied()
            .unwrap_or(self.config.max_similar)
    }

    pub fn admit(&mut self, level: Level, component: &str, message: &str, now_ms: u64) -> Admission {
        if level >= Level::Warn || self.always_surface.is_match(message) {
            return Admission::Pass;
        }

        let key = ThrottleKey {
            level,
            component: component.to_string(),
            signature: self.normalizer.signature(message),
        };
        let cap = self.cap_for(component);
        let window_ms = self.config.window_ms;

        let elapsed = self
            .records
            .get(&key)
            .is_some_and(|r| now_ms.saturating_sub(r.window_start) >= window_ms);
        if elapsed {
            if let Some(record) = self.records.remove(&key) {
                if let Some(rollup) = close_record(&key, record, cap, window_ms) {
                    self.closed.push(rollup);
                }
            }
        }

        let record = self.records.entry(key).or_insert_with(|| ThrottleRecord {
            count: 0,
            window_start: now_ms,
            samples: Vec::with_capacity(MAX_SAMPLES),
        });
        record.count += 1;
        if record.samples.len() < MAX_SAMPLES {
            record.samples.push(message.to_string());
        }

        if record.count <= cap {
            Admission::Pass
        } else {
            self.suppressed_total += 1;
            Admission::Suppressed
        }
    }

    /// Close every elapsed window and return the roll-ups due.
    pub fn sweep(&mut self, now_ms: u64) -> Vec<RollUp> {
        let window_ms = self.config.window_ms;
        let expired: Vec<ThrottleKey> = self
            .records
            .iter()
            .filter(|(_, r)| now_ms.saturating_sub(r.window_start) >= window_ms)
            .map(|(k, _)| k.clone())
            .collect();

        let mut rollups = std::mem::take(&mut self.closed);
        for key in expired {
            let cap = self.cap_for(&key.component);
            if let Some(record) = self.records.remove(&key) {
                if let Some(rollup) = close_record(&key, record, cap, window_ms) {
                    rollups.push(rollup);
                }
            }
        }
        rollups.sort_by_key(|r| r.window_start);
        rollups
    }

    /// When the earliest open window closes.
    pub fn next_window_close(&self) -> Option<u64> {
        if !self.closed.is_empty() {
            return Some(0);
        }
        self.records
            .values()
            .map(|r| r.window_start + self.config.window_ms)
            .min()
    }

    pub fn open_windows(&self) -> usize {
        self.records.len()
    }

    pub fn suppressed_total(&self) -> u64 {
        self.suppressed_total
    }

    /// Forget all windows. Pending roll-ups are discarded.
    pub fn clear(&mut self) {
        self.records.clear();
        self.closed.clear();
    }
}

fn close_record(key: &ThrottleKey, record: ThrottleRecord, cap: u32, window_ms: u64) -> Option<RollUp> {
    if record.count <= cap {
        return None;
    }
    Some(RollUp {
        level: key.level,
        component: key.component.clone(),
        signature: key.signature.clone(),
        count: record.count,
        suppressed: record.count - cap,
        samples: record.samples,
        window_start: record.window_start,
        window_ms,
    })
}
