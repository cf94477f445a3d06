//! # logflow-core — Log entry model, ring store and reference merge
//!
//! Leaf crate of the logflow workspace. Everything here is plain,
//! single-threaded data structures with no I/O.
//!
//! ## Architecture
//!
//! ```text
//!  EntryDraft ──seal(seq)──► LogEntry ──┐
//!      ▲                                │ batches
//!  Sequencer                            ▼
//!                         ┌──────── MergeStrategy ────────┐
//!                         │ ReferenceMerge │ Acceleration…│
//!                         └───────────────┬───────────────┘
//!                                         ▼ sorted
//!                                   RingLogStore (last N)
//! ```
//!
//! ## Modules
//!
//! - [`entry`] — `Level`, immutable `LogEntry`, `EntryDraft`, `Sequencer`
//! - [`context`] — ordered context maps and the cycle-safe sanitizer
//! - [`ring`] — fixed-capacity ring buffer
//! - [`merge`] — reference two-pointer merge and batch normalization
//! - [`backend`] — `MergeStrategy` / `AccelerationBackend` contracts
//! - [`scheduler`] — virtual `Clock` and cooperative timer queue

pub mod backend;
pub mod context;
pub mod entry;
pub mod merge;
pub mod ring;
pub mod scheduler;

pub use backend::{
    AccelerationBackend, BackendError, Capabilities, MemoryEstimate, MemorySnapshot,
    MergeStrategy, Recommendation, ReferenceMerge, RiskLevel,
};
pub use context::{ContextMap, ContextValue, DynValue, Sanitizer};
pub use entry::{new_session_id, EntryDraft, Level, LogEntry, ParseLevelError, Sequencer};
pub use merge::{is_strictly_ordered, merge_insert, normalize_batch};
pub use ring::RingLogStore;
pub use scheduler::{Clock, ManualClock, Scheduler, SystemClock};
