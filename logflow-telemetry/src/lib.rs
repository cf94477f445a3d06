//! # logflow-telemetry — Throttled, batched, retrying log forwarding
//!
//! Everything between a stored log entry and the persistent sink.
//!
//! ## Architecture
//!
//! ```text
//!  ┌──────────────┐   ┌─────────────────┐   ┌────────────┐
//!  │ ThrottleGate │──►│ BatchDispatcher │──►│    Sink    │
//!  │ (signature)  │   │ (size | timer)  │   │ (may fail) │
//!  └──────────────┘   └─────────────────┘   └─────┬──────┘
//!                                                 │ failure
//!                                           ┌─────▼──────┐   ┌─────────────┐
//!                                           │ RetryQueue │──►│ ConsoleSink │
//!                                           └────────────┘   └─────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`config`] — `TelemetryConfig` and `ConfigError`
//! - [`normalize`] — message signatures with an LRU cache
//! - [`throttle`] — `ThrottleGate` and roll-ups
//! - [`wire`] — compact JSON record
//! - [`dispatcher`] — `BatchDispatcher`
//! - [`retry`] — `RetryQueue`
//! - [`sink`] — `Sink` trait, `ConsoleSink`, `MemorySink`
//! - [`pipeline`] — `TelemetryPipeline`, the owner of all of the above

pub mod config;
pub mod dispatcher;
pub mod normalize;
pub mod pipeline;
pub mod retry;
pub mod sink;
pub mod throttle;
pub mod wire;

pub use config::{ConfigError, DispatcherConfig, RetryConfig, TelemetryConfig, ThrottleConfig};
pub use dispatcher::{BatchDispatcher, OutboundBatch};
pub use normalize::MessageNormalizer;
pub use pipeline::{PipelineStats, TelemetryPipeline};
pub use retry::{DeliveryKind, RetryQueue};
pub use sink::{ConsoleSink, Delivered, MemorySink, Sink, SinkError, CONSOLE_TARGET};
pub use throttle::{Admission, RollUp, ThrottleGate, ROLLUP_TAG};
pub use wire::WireRecord;
