//! # logflow-accel — Accelerated merge backend
//!
//! Optional [`AccelerationBackend`](logflow_core::AccelerationBackend)
//! implementation. It produces exactly what the reference merge produces,
//! but skips comparisons when a batch lands entirely after (append) or
//! before (prepend) the stored range, and copies whole runs otherwise.
//!
//! The backend owns a bounded, page-granular heap. Every merge is charged
//! against it, so callers must go through admission (estimate, reclaim,
//! grow) before handing it large inputs.
//!
//! ## Modules
//!
//! - [`backend`] — `AcceleratedBackend` and its `AccelConfig`
//! - [`tracker`] — allocation statistics behind memory reporting

pub mod backend;
pub mod tracker;

pub use backend::{AccelConfig, AcceleratedBackend, PAGE_SIZE};
pub use tracker::{AllocationTracker, TrackerReport};
