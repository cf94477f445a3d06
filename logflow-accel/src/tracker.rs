//! Allocation bookkeeping for the accelerated backend's managed heap.
//!
//! The backend does not own a real allocator; it reserves heap pages and
//! charges every merge an estimated byte cost. Output buffers stay charged
//! until [`AllocationTracker::reset_to_baseline`] (the backend's reclaim
//! pass), which mirrors how a managed heap only shrinks on collection.

use serde::Serialize;
use std::time::Instant;

const HISTORY_LEN: usize = 10;

/// Running allocation statistics.
#[derive(Debug, Clone)]
pub struct AllocationTracker {
    active_bytes: usize,
    peak_bytes: usize,
    allocation_count: usize,
    /// Circular buffer of recent allocation sizes.
    history: [usize; HISTORY_LEN],
    history_index: usize,
    average_allocation: usize,
    sample_count: usize,
    /// Exponential moving average, bytes per second.
    allocation_rate: f64,
    last_reclaim: Option<Instant>,
    /// Average bytes charged per merged entry (0 until observed).
    avg_entry_bytes: usize,
}

impl Default for AllocationTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl AllocationTracker {
    pub fn new() -> Self {
        Self {
            active_bytes: 0,
            peak_bytes: 0,
            allocation_count: 0,
            history: [0; HISTORY_LEN],
            history_index: 0,
            average_allocation: 0,
            sample_count: 0,
            allocation_rate: 0.0,
            last_reclaim: None,
            avg_entry_bytes: 0,
        }
    }

    pub fn track_allocation(&mut self, bytes: usize) {
        self.active_bytes += bytes;
        self.allocation_count += 1;
        self.peak_bytes = self.peak_bytes.max(self.active_bytes);

        self.history[self.history_index] = bytes;
        self.history_index = (self.history_index + 1) % HISTORY_LEN;

        self.sample_count += 1;
        self.average_allocation =
            (self.average_allocation * (self.sample_count - 1) + bytes) / self.sample_count;

        if let Some(since) = self.last_reclaim {
            let secs = since.elapsed().as_secs_f64();
            if secs > 0.0 {
                let rate = bytes as f64 / secs;
                self.allocation_rate = self.allocation_rate * 0.7 + rate * 0.3;
            }
        }
    }

    pub fn track_deallocation(&mut self, bytes: usize) {
        if bytes <= self.active_bytes {
            self.active_bytes -= bytes;
        } else {
            log::warn!(
                "Accelerated heap: releasing {bytes} bytes but only {} tracked as active",
                self.active_bytes
            );
            self.active_bytes = 0;
        }
    }

    /// Fold an observed per-entry cost into the running average.
    pub fn observe_entry_cost(&mut self, bytes_per_entry: usize) {
        self.avg_entry_bytes = if self.avg_entry_bytes == 0 {
            bytes_per_entry
        } else {
            (self.avg_entry_bytes * 3 + bytes_per_entry) / 4
        };
    }

    /// Reclaim: drop everything except a runtime baseline.
    pub fn reset_to_baseline(&mut self, baseline_bytes: usize) {
        self.active_bytes = baseline_bytes;
        self.allocation_count = 1;
        self.last_reclaim = Some(Instant::now());
    }

    /// True if `estimated_bytes` plus 20% headroom fits in `heap_bytes`.
    pub fn would_fit(&self, estimated_bytes: usize, heap_bytes: usize) -> bool {
        let required = (estimated_bytes as f64 * 1.2) as usize;
        heap_bytes.saturating_sub(self.active_bytes) >= required
    }

    pub fn active_bytes(&self) -> usize {
        self.active_bytes
    }

    pub fn peak_bytes(&self) -> usize {
        self.peak_bytes
    }

    pub fn allocation_count(&self) -> usize {
        self.allocation_count
    }

    pub fn avg_entry_bytes(&self) -> usize {
        self.avg_entry_bytes
    }

    /// Least-squares slope over the recent allocation sizes.
    /// Positive means allocations are growing.
    pub fn growth_trend(&self) -> f64 {
        let (mut sx, mut sy, mut sxy, mut sxx, mut n) = (0f64, 0f64, 0f64, 0f64, 0f64);
        for (i, &y) in self.history.iter().enumerate() {
            if y == 0 {
                continue;
            }
            let x = (i + 1) as f64;
            let y = y as f64;
            sx += x;
            sy += y;
            sxy += x * y;
            sxx += x * x;
            n += 1.0;
        }
        if n < 2.0 {
            return 0.0;
        }
        let denominator = n * sxx - sx * sx;
        if denominator == 0.0 {
            return 0.0;
        }
        (n * sxy - sx * sy) / denominator
    }

    /// Heuristic in [0, 1]: many small allocations relative to what the
    /// active bytes would need at the average size.
    pub fn fragmentation_estimate(&self, heap_bytes: usize) -> f64 {
        if self.allocation_count < 10 || heap_bytes == 0 || self.average_allocation == 0 {
            return 0.0;
        }
        let theoretical = self.active_bytes as f64 / self.average_allocation as f64;
        if theoretical <= 0.0 {
            return 0.0;
        }
        (self.allocation_count as f64 / theoretical - 1.0).clamp(0.0, 1.0)
    }

    pub fn report(&self, heap_bytes: usize) -> TrackerReport {
        TrackerReport {
            active_bytes: self.active_bytes,
            peak_bytes: self.peak_bytes,
            allocation_count: self.allocation_count,
            average_allocation: self.average_allocation,
            allocation_rate: self.allocation_rate,
            ms_since_reclaim: self.last_reclaim.map(|t| t.elapsed().as_millis() as u64),
            growth_trend: self.growth_trend(),
            fragmentation_estimate: self.fragmentation_estimate(heap_bytes),
        }
    }
}

/// Serializable tracker state for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct TrackerReport {
    pub active_bytes: usize,
    pub peak_bytes: usize,
    pub allocation_count: usize,
    pub average_allocation: usize,
    pub allocation_rate: f64,
    pub ms_since_reclaim: Option<u64>,
    pub growth_trend: f64,
    pub fragmentation_estimate: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocation_and_peak() {
        let mut t = AllocationTracker::new();
        t.track_allocation(100);
        t.track_allocation(300);
        assert_eq!(t.active_bytes(), 400);
        assert_eq!(t.peak_bytes(), 400);
        assert_eq!(t.allocation_count(), 2);

        t.track_deallocation(300);
        assert_eq!(t.active_bytes(), 100);
        assert_eq!(t.peak_bytes(), 400);
    }

    #[test]
    fn test_over_release_clamps_to_zero() {
        let mut t = AllocationTracker::new();
        t.track_allocation(10);
        t.track_deallocation(50);
        assert_eq!(t.active_bytes(), 0);
    }

    #[test]
    fn test_would_fit_needs_headroom() {
        let mut t = AllocationTracker::new();
        t.track_allocation(500);
        // 1000 heap, 500 free: 400 * 1.2 = 480 fits, 450 * 1.2 = 540 does not.
        assert!(t.would_fit(400, 1000));
        assert!(!t.would_fit(450, 1000));
    }

    #[test]
    fn test_reset_to_baseline() {
        let mut t = AllocationTracker::new();
        for _ in 0..5 {
            t.track_allocation(1000);
        }
        t.reset_to_baseline(64);
        assert_eq!(t.active_bytes(), 64);
        assert_eq!(t.allocation_count(), 1);
        assert_eq!(t.peak_bytes(), 5000);
    }

    #[test]
    fn test_growth_trend_sign() {
        let mut t = AllocationTracker::new();
        for size in [100, 200, 300, 400] {
            t.track_allocation(size);
        }
        assert!(t.growth_trend() > 0.0);

        let mut t = AllocationTracker::new();
        t.track_allocation(100);
        assert_eq!(t.growth_trend(), 0.0);
    }

    #[test]
    fn test_entry_cost_average() {
        let mut t = AllocationTracker::new();
        t.observe_entry_cost(200);
        assert_eq!(t.avg_entry_bytes(), 200);
        t.observe_entry_cost(600);
        assert_eq!(t.avg_entry_bytes(), 300);
    }
}
