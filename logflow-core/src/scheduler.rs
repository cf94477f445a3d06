//! Virtual time and a cooperative timer queue.
//!
//! Nothing in the workspace sleeps or spawns. Components read the current
//! time from a [`Clock`] and register deadlines in a [`Scheduler`]; the
//! owner polls `take_due(now)` from its single logic thread and runs each
//! returned callback to completion before the next one.
//!
//! A key that is already pending cannot be armed a second time, so a flush
//! or maintenance pass is never queued twice.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Source of "now" in milliseconds since the Unix epoch.
pub trait Clock {
    fn now_ms(&self) -> u64;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default()
    }
}

/// Hand-driven clock for tests and simulations. Clones share one timeline.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(start_ms)),
        }
    }

    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::Relaxed);
    }

    pub fn set(&self, ms: u64) {
        self.now.store(ms, Ordering::Relaxed);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::Relaxed)
    }
}

/// Deadline queue keyed by timer identity.
#[derive(Debug, Clone)]
pub struct Scheduler<K: Ord + Copy> {
    pending: BTreeMap<K, u64>,
}

impl<K: Ord + Copy> Default for Scheduler<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Ord + Copy> Scheduler<K> {
    pub fn new() -> Self {
        Self {
            pending: BTreeMap::new(),
        }
    }

    /// Arm `key` for `due_ms`. Returns `false` (and changes nothing) if the
    /// key is already pending.
    pub fn schedule_at(&mut self, key: K, due_ms: u64) -> bool {
        if self.pending.contains_key(&key) {
            return false;
        }
        self.pending.insert(key, due_ms);
        true
    }

    /// Arm `key`, replacing any pending deadline.
    pub fn reschedule(&mut self, key: K, due_ms: u64) {
        self.pending.insert(key, due_ms);
    }

    pub fn cancel(&mut self, key: &K) -> bool {
        self.pending.remove(key).is_some()
    }

    pub fn is_pending(&self, key: &K) -> bool {
        self.pending.contains_key(key)
    }

    pub fn deadline(&self, key: &K) -> Option<u64> {
        self.pending.get(key).copied()
    }

    /// Remove and return every key due at or before `now_ms`, earliest
    /// first (ties by key order).
    pub fn take_due(&mut self, now_ms: u64) -> Vec<K> {
        let mut due: Vec<(u64, K)> = self
            .pending
            .iter()
            .filter(|(_, at)| **at <= now_ms)
            .map(|(k, at)| (*at, *k))
            .collect();
        due.sort();
        for (_, key) in &due {
            self.pending.remove(key);
        }
        due.into_iter().map(|(_, k)| k).collect()
    }

    pub fn next_deadline(&self) -> Option<u64> {
        self.pending.values().min().copied()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}
