//! # logflow-engine — Adaptive dual-backend log ingestion
//!
//! Owns the ring store and decides, per merge, whether the accelerated
//! backend is worth it. Falls back to the reference merge on any backend
//! trouble and keeps going.
//!
//! ## Architecture
//!
//! ```text
//!                       ┌──────────────────────────────┐
//!   ingest / log ──────►│          LogEngine           │────► TelemetryPipeline
//!                       │                              │
//!                       │  ExecutionPathSelector       │
//!                       │    ├─ PerformanceMetrics     │◄──── seed file (JSON)
//!                       │    ├─ OperationBlacklist     │
//!                       │    └─ MemoryGuard ───────────┼────► AccelerationBackend
//!                       │                              │
//!                       │  RingLogStore ──► listeners  │
//!                       └──────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`config`] — `EngineConfig` and its sections, JSON loading
//! - [`error`] — `EngineError` taxonomy
//! - [`metrics`] — per-operation timing model and gain estimates
//! - [`selector`] — path decision and threshold self-tuning
//! - [`memory_guard`] — backend memory admission
//! - [`blacklist`] — exponential backoff for failing operations
//! - [`operation`] — operation scopes
//! - [`engine`] — `LogEngine`, the consumer API

pub mod blacklist;
pub mod config;
pub mod engine;
pub mod error;
pub mod memory_guard;
pub mod metrics;
pub mod operation;
pub mod selector;

pub use blacklist::{BlacklistEntry, OperationBlacklist};
pub use config::{
    AccelerationMode, BlacklistConfig, EngineConfig, MemoryGuardConfig, MetricsConfig,
    SelectorConfig,
};
pub use engine::{
    BackendState, EngineDiagnostics, EngineStats, IngestReport, LogEngine, StoreDiagnostics,
    SubscriptionId, ENGINE_COMPONENT, MERGE_OPERATION, UNSTORED_SEQUENCE,
};
pub use error::EngineError;
pub use memory_guard::{GuardAction, GuardDecision, GuardStats, MemoryGuard};
pub use metrics::{
    ExecutionPath, MetricsSnapshot, PerformanceMetricsTracker, PerformanceSample, SizeBucket,
};
pub use operation::{OperationOutcome, OperationSummary};
pub use selector::{
    decide, required_gain, DecisionReason, ExecutionPathSelector, PathDecision, SelectionInput,
    ThresholdChange,
};
