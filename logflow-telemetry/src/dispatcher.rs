//! Outbound batch buffer.
//!
//! Architecture:
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │              BatchDispatcher                 │
//! │                                              │
//! │  Buffer: [ record | record | record | ... ]  │
//! │                                              │
//! │  Flush when:                                 │
//! │    1. Buffer reaches max_batch_size          │
//! │    2. Oldest record waited max_wait_ms       │
//! │    3. Explicit drain (shutdown)              │
//! │                                              │
//! │  Drain: group by component, pack into JSON   │
//! │         arrays of at most max_payload_bytes  │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! Records are encoded on enqueue, so a drain never fails and payload
//! sizes are known up front.
//!
//! Performance targets:
//! - Enqueue: one serde_json encode, no I/O
//! - Drain of 50 records: <100μs

use std::collections::BTreeMap;

use logflow_core::LogEntry;

use crate::config::DispatcherConfig;
use crate::sink::SinkError;
use crate::wire::{pack_arrays, WireRecord};

#[derive(Debug, Clone)]
struct Buffered {
    component: String,
    encoded: String,
}

/// One `send_batch` call worth of records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundBatch {
    pub component: String,
    /// JSON array.
    pub payload: String,
    pub records: usize,
}

/// Dispatcher statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct DispatcherStats {
    pub records_enqueued: u64,
    pub batches_built: u64,
    pub size_flushes: u64,
    pub timer_flushes: u64,
}

/// Size-or-time batch buffer.
#[derive(Debug)]
pub struct BatchDispatcher {
    config: DispatcherConfig,
    buffer: Vec<Buffered>,
    buffered_bytes: usize,
    /// Enqueue time of the oldest buffered record.
    oldest_at: Option<u64>,
    stats: DispatcherStats,
}

impl BatchDispatcher {
    pub fn new(config: DispatcherConfig) -> Self {
        Self {
            buffer: Vec::with_capacity(config.max_batch_size),
            config,
            buffered_bytes: 0,
            oldest_at: None,
            stats: DispatcherStats::default(),
        }
    }

    /// Encode a single record for an immediate `send`.
    pub fn encode_single(&self, entry: &LogEntry) -> Result<String, SinkError> {
        WireRecord::from_entry(entry).encode_bounded(self.config.max_record_bytes)
    }

    /// Buffer `entry`. Returns `true` when the size threshold is reached and
    /// the caller should drain now.
    pub fn enqueue(&mut self, entry: &LogEntry, now_ms: u64) -> Result<bool, SinkError> {
        let encoded =
            WireRecord::from_entry(entry).encode_bounded(self.config.max_record_bytes)?;

        self.buffered_bytes += encoded.len();
        self.buffer.push(Buffered {
            component: entry.component().to_string(),
            encoded,
        });
        self.oldest_at.get_or_insert(now_ms);
        self.stats.records_enqueued += 1;

        let full = self.buffer.len() >= self.config.max_batch_size;
        if full {
            self.stats.size_flushes += 1;
        }
        Ok(full)
    }

    /// When the max-wait timer for the current buffer fires.
    pub fn flush_deadline(&self) -> Option<u64> {
        self.oldest_at.map(|t| t + self.config.max_wait_ms)
    }

    pub fn is_due(&self, now_ms: u64) -> bool {
        self.flush_deadline().is_some_and(|d| now_ms >= d)
    }

    /// Drain on the max-wait timer. Empty if nothing is due yet.
    pub fn drain_due(&mut self, now_ms: u64) -> Vec<OutboundBatch> {
        if !self.is_due(now_ms) {
            return Vec::new();
        }
        self.stats.timer_flushes += 1;
        self.drain()
    }

    /// Drain everything regardless of timers.
    pub fn drain(&mut self) -> Vec<OutboundBatch> {
        if self.buffer.is_empty() {
            self.oldest_at = None;
            return Vec::new();
        }

        let mut by_component: BTreeMap<String, Vec<Buffered>> = BTreeMap::new();
        for record in self.buffer.drain(..) {
            by_component
                .entry(record.component.clone())
                .or_default()
                .push(record);
        }
        self.buffered_bytes = 0;
        self.oldest_at = None;

        let mut batches = Vec::new();
        for (component, records) in by_component {
            let encoded: Vec<String> = records.into_iter().map(|r| r.encoded).collect();
            let arrays = pack_arrays(&encoded, self.config.max_payload_bytes);
            if arrays.len() > 1 {
                log::debug!(
                    "Batch for '{component}' split into {} payloads of at most {} bytes",
                    arrays.len(),
                    self.config.max_payload_bytes
                );
            }
            for (payload, records) in arrays {
                batches.push(OutboundBatch {
                    component: component.clone(),
                    payload,
                    records,
                });
            }
        }
        self.stats.batches_built += batches.len() as u64;
        batches
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn buffered_bytes(&self) -> usize {
        self.buffered_bytes
    }

    pub fn stats(&self) -> DispatcherStats {
        self.stats
    }
}
