//! Merge strategies and the optional acceleration backend contract.
//!
//! ```text
//!                 ┌───────────────────┐
//!                 │   MergeStrategy   │  merge_insert(existing, incoming)
//!                 └─────────┬─────────┘
//!             ┌─────────────┴──────────────┐
//!   ┌─────────▼─────────┐       ┌──────────▼───────────┐
//!   │  ReferenceMerge   │       │ AccelerationBackend  │  + initialize, memory
//!   │  (always works)   │       │ (optional, admitted) │    usage, estimate,
//!   └───────────────────┘       └──────────────────────┘    reclaim, grow
//! ```
//!
//! Both sides must produce identical output for identical input. The
//! backend is allowed to fail; the reference strategy is not.

use serde::{Deserialize, Serialize};

use crate::entry::LogEntry;
use crate::merge;

/// Failures reported by a merge backend.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BackendError {
    #[error("backend initialization failed: {0}")]
    Initialization(String),

    #[error("backend out of memory: {requested} bytes requested, {available} available")]
    OutOfMemory { requested: usize, available: usize },

    #[error("backend operation '{operation}' failed: {reason}")]
    Operation { operation: String, reason: String },
}

impl BackendError {
    pub fn is_memory(&self) -> bool {
        matches!(self, BackendError::OutOfMemory { .. })
    }
}

/// A sorted-merge implementation.
pub trait MergeStrategy {
    /// Short identifier used in logs and metrics.
    fn name(&self) -> &'static str;

    /// Merge two sequence-ordered lists; duplicates resolve to `incoming`.
    fn merge_insert(
        &mut self,
        existing: &[LogEntry],
        incoming: &[LogEntry],
    ) -> Result<Vec<LogEntry>, BackendError>;
}

/// The always-available portable merge.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReferenceMerge;

impl MergeStrategy for ReferenceMerge {
    fn name(&self) -> &'static str {
        "reference"
    }

    fn merge_insert(
        &mut self,
        existing: &[LogEntry],
        incoming: &[LogEntry],
    ) -> Result<Vec<LogEntry>, BackendError> {
        Ok(merge::merge_insert(existing, incoming))
    }
}

// ───────────────────────────────────────────────────────────────────
// Memory reporting
// ───────────────────────────────────────────────────────────────────

/// Point-in-time view of backend memory.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MemorySnapshot {
    pub total_bytes: usize,
    pub used_bytes: usize,
    /// `used_bytes / total_bytes`, 0.0 when the total is unknown.
    pub utilization: f64,
    pub available: bool,
    pub peak_bytes: usize,
    pub allocation_count: usize,
}

impl MemorySnapshot {
    /// Snapshot for a backend that cannot report memory.
    pub fn unavailable() -> Self {
        Self::default()
    }

    pub fn from_usage(total_bytes: usize, used_bytes: usize) -> Self {
        let utilization = if total_bytes > 0 {
            used_bytes as f64 / total_bytes as f64
        } else {
            0.0
        };
        Self {
            total_bytes,
            used_bytes,
            utilization,
            available: total_bytes > 0,
            peak_bytes: used_bytes,
            allocation_count: 0,
        }
    }

    pub fn free_bytes(&self) -> usize {
        self.total_bytes.saturating_sub(self.used_bytes)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Moderate,
    High,
}

/// What the backend advises for a prospective operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    Proceed,
    ProceedWithCaution,
    UseReference,
}

impl Recommendation {
    pub fn as_str(self) -> &'static str {
        match self {
            Recommendation::Proceed => "proceed",
            Recommendation::ProceedWithCaution => "proceed_with_caution",
            Recommendation::UseReference => "use_reference",
        }
    }
}

/// Backend's own estimate of what an operation on `n` entries needs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MemoryEstimate {
    pub estimated_bytes: usize,
    pub current_available: usize,
    pub would_fit: bool,
    pub projected_utilization: f64,
    pub risk: RiskLevel,
    pub recommendation: Recommendation,
}

/// What an initialized backend reports about the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Capabilities {
    /// Vectorized compare paths are available.
    pub vectorized: bool,
    pub hardware_threads: usize,
}

impl Capabilities {
    /// Eight or more hardware threads.
    pub fn is_high_end(&self) -> bool {
        self.hardware_threads >= 8
    }
}

/// Optional high-throughput merge backend with its own managed memory.
pub trait AccelerationBackend: MergeStrategy {
    /// Prepare the backend. An error disables it for the whole session.
    fn initialize(&mut self) -> Result<Capabilities, BackendError>;

    fn memory_usage(&self) -> MemorySnapshot;

    fn estimate_memory_for(&self, entries: usize) -> MemoryEstimate;

    /// Release whatever the backend can give back.
    fn reclaim(&mut self);

    /// Ask for at least `bytes` more capacity. Returns `false` if refused.
    fn grow_capacity(&mut self, bytes: usize) -> bool;

    /// Free-form state for crash reports.
    fn diagnostics(&self) -> serde_json::Value {
        serde_json::Value::Null
    }
}
