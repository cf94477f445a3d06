//! Operation blacklist with exponential backoff.
//!
//! ```text
//!  failure #n  →  backoff = min(base · 3^(n-1), cap)
//!
//!  base = 5s:   5s → 15s → 45s → 2m15s → … → 30m
//! ```
//!
//! Once `now > next_retry_time` the entry is lifted provisionally: the next
//! `is_blacklisted` returns `false` once and the operation gets one attempt.
//! A failure on that attempt re-lists it with the retry count carried over;
//! a success (`clear`) forgives it completely.

use rustc_hash::FxHashMap;
use serde::Serialize;

use crate::config::BlacklistConfig;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlacklistEntry {
    pub retry_count: u32,
    pub next_retry_time: u64,
    pub backoff_ms: u64,
    pub last_error: String,
}

#[derive(Debug)]
pub struct OperationBlacklist {
    config: BlacklistConfig,
    entries: FxHashMap<String, BlacklistEntry>,
    /// Retry counts of operations on their provisional attempt.
    probation: FxHashMap<String, u32>,
}

impl OperationBlacklist {
    pub fn new(config: BlacklistConfig) -> Self {
        Self {
            config,
            entries: FxHashMap::default(),
            probation: FxHashMap::default(),
        }
    }

    pub fn backoff_for(&self, retry_count: u32) -> u64 {
        let factor = 3u64.saturating_pow(retry_count.saturating_sub(1));
        self.config
            .base_backoff_ms
            .saturating_mul(factor)
            .min(self.config.max_backoff_ms)
    }

    pub fn is_blacklisted(&mut self, operation: &str, now_ms: u64) -> bool {
        let Some(entry) = self.entries.get(operation) else {
            return false;
        };
        if now_ms <= entry.next_retry_time {
            return true;
        }
        let retry_count = entry.retry_count;
        self.entries.remove(operation);
        self.probation.insert(operation.to_string(), retry_count);
        log::info!("Operation '{operation}' backoff expired, allowing one provisional attempt");
        false
    }

    /// Record a failure. Returns the backoff now in effect.
    pub fn add_failure(&mut self, operation: &str, error: &str, now_ms: u64) -> u64 {
        let previous = self
            .entries
            .get(operation)
            .map(|e| e.retry_count)
            .or_else(|| self.probation.remove(operation))
            .unwrap_or(0);
        let retry_count = previous + 1;
        let backoff_ms = self.backoff_for(retry_count);

        self.entries.insert(
            operation.to_string(),
            BlacklistEntry {
                retry_count,
                next_retry_time: now_ms + backoff_ms,
                backoff_ms,
                last_error: error.to_string(),
            },
        );
        log::warn!(
            "Operation '{operation}' blacklisted for {backoff_ms} ms (failure #{retry_count}): {error}"
        );
        backoff_ms
    }

    /// Forgive `operation`. Returns `true` if it had any failure history.
    pub fn clear(&mut self, operation: &str) -> bool {
        let listed = self.entries.remove(operation).is_some();
        let probation = self.probation.remove(operation).is_some();
        if listed || probation {
            log::info!("Operation '{operation}' succeeded, backoff reset");
        }
        listed || probation
    }

    pub fn entry(&self, operation: &str) -> Option<&BlacklistEntry> {
        self.entries.get(operation)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sorted copy of all entries, for diagnostics.
    pub fn entries(&self) -> Vec<(String, BlacklistEntry)> {
        let mut all: Vec<_> = self
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }
}
