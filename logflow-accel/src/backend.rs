//! Accelerated merge backend over a page-granular managed heap.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 AcceleratedBackend                  │
//! │                                                     │
//! │  heap: pages × 64 KiB   (grows, never shrinks)      │
//! │  tracker: active / peak / history / rate / trend    │
//! │                                                     │
//! │  merge_insert:                                      │
//! │    1. charge inputs, fail if output would not fit   │
//! │    2. append / prepend fast path, else gallop       │
//! │    3. charge output, release inputs                 │
//! │                                                     │
//! │  reclaim(): active → 10% of heap                    │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! Merge output is identical to [`logflow_core::merge_insert`] for any pair
//! of strictly ordered inputs. Fast paths look at sequence numbers only.
//!
//! Performance targets:
//! - Append / prepend of 10k entries: one memcpy-like extend, no compares
//! - Mixed merge: O(runs · log n) compares via `partition_point`

use std::mem::size_of;

use serde::{Deserialize, Serialize};

use logflow_core::{
    AccelerationBackend, BackendError, Capabilities, LogEntry, MemoryEstimate, MemorySnapshot,
    MergeStrategy, Recommendation, RiskLevel,
};

use crate::tracker::AllocationTracker;

/// Heap page size in bytes.
pub const PAGE_SIZE: usize = 64 * 1024;

/// Per-entry string payload assumed before any merge has been observed.
const DEFAULT_STRING_BYTES: usize = 80;

/// Backend configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccelConfig {
    /// Pages reserved at initialization. Default: 256 (16 MiB).
    pub initial_pages: usize,
    /// Hard limit for `grow_capacity`. Default: 4096 (256 MiB).
    pub max_pages: usize,
    /// Report vectorized compare paths.
    pub vectorized: bool,
    /// Override the detected hardware thread count.
    pub hardware_threads: Option<usize>,
}

impl Default for AccelConfig {
    fn default() -> Self {
        Self {
            initial_pages: 256,
            max_pages: 4096,
            vectorized: cfg!(any(target_arch = "x86_64", target_arch = "aarch64")),
            hardware_threads: None,
        }
    }
}

impl AccelConfig {
    /// Tiny heap so tests can hit the memory limits quickly.
    pub fn for_testing() -> Self {
        Self {
            initial_pages: 4,
            max_pages: 16,
            vectorized: false,
            hardware_threads: Some(4),
        }
    }
}

/// The accelerated merge engine.
#[derive(Debug)]
pub struct AcceleratedBackend {
    config: AccelConfig,
    pages: usize,
    capabilities: Option<Capabilities>,
    tracker: AllocationTracker,
    merges: u64,
    fast_path_merges: u64,
}

impl AcceleratedBackend {
    pub fn new(config: AccelConfig) -> Self {
        Self {
            config,
            pages: 0,
            capabilities: None,
            tracker: AllocationTracker::new(),
            merges: 0,
            fast_path_merges: 0,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.capabilities.is_some()
    }

    pub fn heap_bytes(&self) -> usize {
        self.pages * PAGE_SIZE
    }

    pub fn pages(&self) -> usize {
        self.pages
    }

    pub fn tracker(&self) -> &AllocationTracker {
        &self.tracker
    }

    /// Merges that took the append or prepend path.
    pub fn fast_path_merges(&self) -> u64 {
        self.fast_path_merges
    }

    fn entry_bytes(entries: &[LogEntry]) -> usize {
        entries.iter().map(LogEntry::approx_size).sum()
    }

    fn merge_entries(&mut self, existing: &[LogEntry], incoming: &[LogEntry]) -> Vec<LogEntry> {
        if incoming.is_empty() {
            return existing.to_vec();
        }
        if existing.is_empty() {
            return incoming.to_vec();
        }

        let mut merged = Vec::with_capacity(existing.len() + incoming.len());
        let (head, tail) = match (existing.first(), existing.last()) {
            (Some(h), Some(t)) => (h.sequence(), t.sequence()),
            _ => return incoming.to_vec(),
        };
        let (in_head, in_tail) = match (incoming.first(), incoming.last()) {
            (Some(h), Some(t)) => (h.sequence(), t.sequence()),
            _ => return existing.to_vec(),
        };

        // Append: everything new sorts after the stored tail.
        if in_head > tail {
            self.fast_path_merges += 1;
            merged.extend_from_slice(existing);
            merged.extend_from_slice(incoming);
            return merged;
        }
        // Prepend: late arrivals that all predate the stored head.
        if in_tail < head {
            self.fast_path_merges += 1;
            merged.extend_from_slice(incoming);
            merged.extend_from_slice(existing);
            return merged;
        }

        gallop_merge(existing, incoming, &mut merged);
        merged
    }
}

/// Run-based merge: copy whole runs found by binary search.
fn gallop_merge(existing: &[LogEntry], incoming: &[LogEntry], out: &mut Vec<LogEntry>) {
    let (mut i, mut j) = (0, 0);

    while i < existing.len() && j < incoming.len() {
        let pivot = incoming[j].sequence();
        let run = existing[i..].partition_point(|e| e.sequence() < pivot);
        out.extend_from_slice(&existing[i..i + run]);
        i += run;
        // Incoming wins on equal sequence.
        if i < existing.len() && existing[i].sequence() == pivot {
            i += 1;
        }
        if i == existing.len() {
            break;
        }

        let pivot = existing[i].sequence();
        let run = incoming[j..].partition_point(|e| e.sequence() <= pivot);
        out.extend_from_slice(&incoming[j..j + run]);
        j += run;
        if out.last().map(LogEntry::sequence) == Some(pivot) {
            i += 1;
        }
    }

    out.extend_from_slice(&existing[i..]);
    out.extend_from_slice(&incoming[j..]);
}

impl MergeStrategy for AcceleratedBackend {
    fn name(&self) -> &'static str {
        "accelerated"
    }

    fn merge_insert(
        &mut self,
        existing: &[LogEntry],
        incoming: &[LogEntry],
    ) -> Result<Vec<LogEntry>, BackendError> {
        if !self.is_initialized() {
            return Err(BackendError::Initialization(
                "merge_insert called before initialize".into(),
            ));
        }

        let input_bytes = Self::entry_bytes(existing) + Self::entry_bytes(incoming);
        // Output is at most the size of both inputs.
        let required = input_bytes * 2;
        let free = self.heap_bytes().saturating_sub(self.tracker.active_bytes());
        if required > free {
            log::debug!(
                "Accelerated merge refused: {required} bytes required, {free} free \
                 ({} existing + {} incoming)",
                existing.len(),
                incoming.len()
            );
            return Err(BackendError::OutOfMemory {
                requested: required,
                available: free,
            });
        }

        self.tracker.track_allocation(input_bytes);
        let merged = self.merge_entries(existing, incoming);
        let output_bytes = Self::entry_bytes(&merged);
        self.tracker.track_allocation(output_bytes);
        self.tracker.track_deallocation(input_bytes);
        if !merged.is_empty() {
            self.tracker.observe_entry_cost(output_bytes / merged.len());
        }
        self.merges += 1;

        Ok(merged)
    }
}

impl AccelerationBackend for AcceleratedBackend {
    fn initialize(&mut self) -> Result<Capabilities, BackendError> {
        if let Some(caps) = self.capabilities {
            return Ok(caps);
        }
        if self.config.initial_pages == 0 {
            return Err(BackendError::Initialization(
                "initial heap must be at least one page".into(),
            ));
        }
        if self.config.initial_pages > self.config.max_pages {
            return Err(BackendError::Initialization(format!(
                "initial heap of {} pages exceeds the {} page limit",
                self.config.initial_pages, self.config.max_pages
            )));
        }

        let hardware_threads = self.config.hardware_threads.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        });
        let caps = Capabilities {
            vectorized: self.config.vectorized,
            hardware_threads,
        };

        self.pages = self.config.initial_pages;
        self.capabilities = Some(caps);
        log::info!(
            "Accelerated backend ready: {} KiB heap, {hardware_threads} threads, vectorized={}",
            self.heap_bytes() / 1024,
            caps.vectorized
        );
        Ok(caps)
    }

    fn memory_usage(&self) -> MemorySnapshot {
        if !self.is_initialized() {
            return MemorySnapshot::unavailable();
        }
        MemorySnapshot {
            peak_bytes: self.tracker.peak_bytes(),
            allocation_count: self.tracker.allocation_count(),
            ..MemorySnapshot::from_usage(self.heap_bytes(), self.tracker.active_bytes())
        }
    }

    fn estimate_memory_for(&self, entries: usize) -> MemoryEstimate {
        let avg_string = match self.tracker.avg_entry_bytes() {
            0 => DEFAULT_STRING_BYTES,
            avg => avg / 4,
        };
        let estimated_bytes = entries * (size_of::<LogEntry>() + avg_string);
        let heap = self.heap_bytes();
        let active = self.tracker.active_bytes();
        let would_fit = heap > 0 && self.tracker.would_fit(estimated_bytes, heap);

        let projected_utilization = if heap > 0 {
            (active + estimated_bytes) as f64 / heap as f64
        } else {
            1.0
        };
        let risk = if projected_utilization > 0.95 {
            RiskLevel::High
        } else if projected_utilization > 0.85 {
            RiskLevel::Moderate
        } else {
            RiskLevel::Low
        };
        let recommendation = if !would_fit {
            Recommendation::UseReference
        } else if projected_utilization > 0.9 {
            Recommendation::ProceedWithCaution
        } else {
            Recommendation::Proceed
        };

        MemoryEstimate {
            estimated_bytes,
            current_available: heap.saturating_sub(active),
            would_fit,
            projected_utilization,
            risk,
            recommendation,
        }
    }

    fn reclaim(&mut self) {
        let before = self.tracker.active_bytes();
        let baseline = (self.heap_bytes() / 10).min(before);
        self.tracker.reset_to_baseline(baseline);
        log::debug!("Accelerated heap reclaimed: {before} -> {baseline} bytes");
    }

    fn grow_capacity(&mut self, bytes: usize) -> bool {
        if !self.is_initialized() {
            return false;
        }
        // One spare page on top of the request.
        let extra_pages = bytes.div_ceil(PAGE_SIZE) + 1;
        if self.pages + extra_pages > self.config.max_pages {
            log::warn!(
                "Accelerated heap growth refused: {} + {extra_pages} pages exceeds limit of {}",
                self.pages,
                self.config.max_pages
            );
            return false;
        }
        self.pages += extra_pages;
        log::info!(
            "Accelerated heap grown by {extra_pages} pages to {} KiB",
            self.heap_bytes() / 1024
        );
        true
    }

    fn diagnostics(&self) -> serde_json::Value {
        serde_json::json!({
            "backend": self.name(),
            "initialized": self.is_initialized(),
            "capabilities": self.capabilities,
            "pages": self.pages,
            "max_pages": self.config.max_pages,
            "heap_bytes": self.heap_bytes(),
            "merges": self.merges,
            "fast_path_merges": self.fast_path_merges,
            "tracker": self.tracker.report(self.heap_bytes()),
        })
    }
}
