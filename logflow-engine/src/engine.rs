//! The log engine: one context object owning every component.
//!
//! ```text
//!   log(draft) ──► severity ──► ThrottleGate ──► seal ──┬──► TelemetryPipeline
//!                                                      │
//!   ingest(batch) ──► severity ──► normalize ──────────┤
//!                                                      ▼
//!                       ExecutionPathSelector + MemoryGuard + OperationBlacklist
//!                                   │                        │
//!                           accelerated merge          reference merge
//!                                   └──────────┬─────────────┘
//!                                              ▼
//!                          RingLogStore ──► listeners(snapshot)
//! ```
//!
//! Everything runs on the caller's thread. Timers (operation timeout,
//! memory check, threshold tuning, metrics persistence, and the pipeline's
//! own flush/retry/sweep) fire from [`LogEngine::tick`].
//!
//! `ingest` never fails: backend errors are classified, acted on and
//! answered with a reference merge of the same input.

use std::time::Instant;

use indexmap::IndexMap;
use logflow_accel::AcceleratedBackend;
use logflow_core::{
    merge_insert, new_session_id, normalize_batch, AccelerationBackend, BackendError,
    Capabilities, Clock, ContextMap, DynValue, EntryDraft, Level, LogEntry, MemorySnapshot,
    MergeStrategy, RingLogStore, Sanitizer, Scheduler, Sequencer,
};
use logflow_telemetry::{Admission, ConsoleSink, PipelineStats, RollUp, Sink, TelemetryPipeline};
use serde::Serialize;

use crate::blacklist::{BlacklistEntry, OperationBlacklist};
use crate::config::{AccelerationMode, EngineConfig};
use crate::error::EngineError;
use crate::memory_guard::{GuardAction, GuardStats, MemoryGuard};
use crate::metrics::{ExecutionPath, MetricsSnapshot, PerformanceMetricsTracker};
use crate::operation::{ActiveOperation, OperationOutcome, OperationSummary};
use crate::selector::{decide, DecisionReason, ExecutionPathSelector, PathDecision, SelectionInput};

/// Operation name under which merges are measured, tuned and blacklisted.
pub const MERGE_OPERATION: &str = "merge_insert";

/// Component name of entries the engine writes about itself.
pub const ENGINE_COMPONENT: &str = "log-engine";

/// Sequence carried by forward-only engine records. The sequencer starts
/// at 1, so stored entries never use it.
pub const UNSTORED_SEQUENCE: u64 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum EngineTimer {
    OperationTimeout,
    MemoryCheck,
    ThresholdTuning,
    MetricsPersist,
}

/// Lifecycle of the acceleration backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum BackendState {
    /// No backend was supplied.
    Absent,
    Ready { capabilities: Capabilities },
    /// Unusable for the rest of the session.
    Disabled { reason: String },
}

impl BackendState {
    pub fn is_ready(&self) -> bool {
        matches!(self, BackendState::Ready { .. })
    }
}

/// Result of one [`LogEngine::ingest`] call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReport {
    pub accepted: usize,
    /// Dropped for being below the minimum severity.
    pub filtered: usize,
    /// Entries in the store afterwards.
    pub stored: usize,
    /// Oldest entries pushed out by capacity.
    pub evicted: usize,
    /// `None` when nothing was accepted.
    pub path: Option<ExecutionPath>,
    pub reason: Option<DecisionReason>,
    /// The accelerated merge failed and the reference merge answered.
    pub fell_back: bool,
    pub duration_ms: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStats {
    pub ingests: u64,
    pub entries_ingested: u64,
    pub entries_filtered: u64,
    pub entries_logged: u64,
    pub entries_suppressed: u64,
    pub accelerated_merges: u64,
    pub reference_merges: u64,
    pub fallbacks: u64,
    pub memory_denials: u64,
    pub backend_failures: u64,
    pub evicted: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreDiagnostics {
    pub len: usize,
    pub capacity: usize,
    pub first_sequence: Option<u64>,
    pub last_sequence: Option<u64>,
    pub total_evicted: u64,
}

/// Everything a crash report or debug panel needs.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineDiagnostics {
    pub session_id: String,
    pub acceleration: AccelerationMode,
    pub backend: BackendState,
    pub backend_memory: MemorySnapshot,
    pub backend_report: serde_json::Value,
    pub last_guard_action: Option<GuardAction>,
    pub guard: GuardStats,
    pub store: StoreDiagnostics,
    pub next_sequence: u64,
    pub min_severity: Level,
    pub active_operation: Option<String>,
    pub stats: EngineStats,
    pub pipeline: PipelineStats,
    pub blacklist: Vec<(String, BlacklistEntry)>,
    pub thresholds: Vec<(String, usize)>,
    pub metrics: MetricsSnapshot,
    pub last_error: Option<String>,
}

pub type SubscriptionId = u64;
type Listener = Box<dyn FnMut(&[LogEntry])>;

struct MergeOutcome {
    path: ExecutionPath,
    reason: DecisionReason,
    fell_back: bool,
    evicted: usize,
    duration_ms: f64,
}

pub struct LogEngine<C: Clock> {
    config: EngineConfig,
    clock: C,
    session_id: String,
    sequencer: Sequencer,
    store: RingLogStore,
    sanitizer: Sanitizer,
    min_severity: Level,

    backend: Option<Box<dyn AccelerationBackend>>,
    backend_state: BackendState,
    selector: ExecutionPathSelector,
    guard: MemoryGuard,
    last_guard_action: Option<GuardAction>,
    metrics: PerformanceMetricsTracker,
    blacklist: OperationBlacklist,
    pipeline: TelemetryPipeline,

    timers: Scheduler<EngineTimer>,
    active_operation: Option<ActiveOperation>,
    listeners: Vec<(SubscriptionId, Listener)>,
    next_subscription: SubscriptionId,
    stats: EngineStats,
    last_error: Option<String>,
}

impl<C: Clock> LogEngine<C> {
    /// Build an engine around an optional backend and a telemetry sink.
    ///
    /// Backend initialization failure is not an error here: the backend is
    /// disabled and every merge uses the reference path.
    pub fn new(
        config: EngineConfig,
        clock: C,
        backend: Option<Box<dyn AccelerationBackend>>,
        sink: Box<dyn Sink>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let now = clock.now_ms();
        let session_id = config.session_id.clone().unwrap_or_else(new_session_id);
        let pipeline =
            TelemetryPipeline::new(config.telemetry.clone(), sink, Box::new(ConsoleSink::new()))?;

        let mut metrics = PerformanceMetricsTracker::new(config.metrics.clone());
        if let Some(path) = config.metrics.seed_path.as_deref() {
            if path.exists() {
                match metrics.load_seed(path) {
                    Ok(count) => log::info!("Loaded {count} performance seeds from {}", path.display()),
                    Err(e) => log::warn!("Ignoring performance seed {}: {e}", path.display()),
                }
            }
        }

        let mut last_error = None;
        let (backend, backend_state) = match backend {
            None => (None, BackendState::Absent),
            Some(_) if config.acceleration == AccelerationMode::ForcedOff => (
                None,
                BackendState::Disabled {
                    reason: "acceleration forced off".to_string(),
                },
            ),
            Some(mut backend) => match backend.initialize() {
                Ok(capabilities) => {
                    log::info!(
                        "Acceleration backend '{}' ready ({} threads, vectorized: {})",
                        backend.name(),
                        capabilities.hardware_threads,
                        capabilities.vectorized
                    );
                    (Some(backend), BackendState::Ready { capabilities })
                }
                Err(e) => {
                    let error = EngineError::Initialization(e);
                    log::warn!("Acceleration disabled: {error}");
                    let reason = error.to_string();
                    last_error = Some(reason.clone());
                    (None, BackendState::Disabled { reason })
                }
            },
        };

        let mut timers = Scheduler::new();
        if backend_state.is_ready() {
            timers.schedule_at(EngineTimer::MemoryCheck, now + config.memory.check_interval_ms);
        }
        timers.schedule_at(
            EngineTimer::ThresholdTuning,
            now + config.selector.tuning_interval_ms,
        );
        if config.metrics.seed_path.is_some() {
            timers.schedule_at(
                EngineTimer::MetricsPersist,
                now + config.metrics.persist_interval_ms,
            );
        }

        log::info!(
            "Log engine started: session {session_id}, capacity {}, acceleration {:?}",
            config.ring_capacity,
            config.acceleration
        );

        Ok(Self {
            clock,
            session_id,
            sequencer: Sequencer::new(),
            store: RingLogStore::new(config.ring_capacity),
            sanitizer: Sanitizer::default(),
            min_severity: config.min_severity,
            backend,
            backend_state,
            selector: ExecutionPathSelector::new(config.selector.clone(), config.acceleration),
            guard: MemoryGuard::new(config.memory.clone()),
            last_guard_action: None,
            metrics,
            blacklist: OperationBlacklist::new(config.blacklist.clone()),
            pipeline,
            timers,
            active_operation: None,
            listeners: Vec::new(),
            next_subscription: 1,
            stats: EngineStats::default(),
            last_error,
            config,
        })
    }

    /// Engine with the built-in [`AcceleratedBackend`] sized by `config.accel`.
    pub fn with_accelerated_backend(
        config: EngineConfig,
        clock: C,
        sink: Box<dyn Sink>,
    ) -> Result<Self, EngineError> {
        let backend = AcceleratedBackend::new(config.accel.clone());
        Self::new(config, clock, Some(Box::new(backend)), sink)
    }

    // ───────────────────────────────────────────────────────────────
    // Ingestion
    // ───────────────────────────────────────────────────────────────

    /// Merge an externally produced batch into the store.
    ///
    /// Entries keep their sequence numbers; the sequencer advances past
    /// them. Re-ingesting entries already stored is a no-op beyond the
    /// merge cost.
    pub fn ingest(&mut self, batch: Vec<LogEntry>) -> IngestReport {
        let now = self.clock.now_ms();
        let total = batch.len();
        let min = self.min_severity;
        let accepted: Vec<LogEntry> = batch.into_iter().filter(|e| e.level() >= min).collect();
        let filtered = total - accepted.len();
        self.stats.ingests += 1;
        self.stats.entries_filtered += filtered as u64;

        if accepted.is_empty() {
            return IngestReport {
                accepted: 0,
                filtered,
                stored: self.store.len(),
                evicted: 0,
                path: None,
                reason: None,
                fell_back: false,
                duration_ms: 0.0,
            };
        }

        for entry in &accepted {
            self.sequencer.observe(entry.sequence());
        }
        let count = accepted.len();
        self.stats.entries_ingested += count as u64;
        let outcome = self.store_entries(accepted, now);

        let level = if outcome.fell_back { Level::Warn } else { Level::Debug };
        let draft = EntryDraft::new(
            level,
            ENGINE_COMPONENT,
            format!(
                "Merged {count} entries via {} path ({})",
                outcome.path.as_str(),
                outcome.reason.as_str()
            ),
        )
        .with_operation(MERGE_OPERATION)
        .with_field("entries", count)
        .with_field("durationMs", outcome.duration_ms)
        .with_field("evicted", outcome.evicted)
        .with_field("fellBack", outcome.fell_back);
        self.emit(draft, now);

        IngestReport {
            accepted: count,
            filtered,
            stored: self.store.len(),
            evicted: outcome.evicted,
            path: Some(outcome.path),
            reason: Some(outcome.reason),
            fell_back: outcome.fell_back,
            duration_ms: outcome.duration_ms,
        }
    }

    /// Record one entry produced by this process. Returns its sequence
    /// number, or `None` if it was filtered or throttled.
    pub fn log(&mut self, draft: EntryDraft) -> Option<u64> {
        if draft.level() < self.min_severity {
            self.stats.entries_filtered += 1;
            return None;
        }
        let now = self.clock.now_ms();
        if self
            .pipeline
            .admit(draft.level(), draft.component(), draft.message(), now)
            == Admission::Suppressed
        {
            self.stats.entries_suppressed += 1;
            return None;
        }

        let active = self.active_operation.as_ref().map(|op| op.name.clone());
        let entry = self.seal(draft.or_operation(active.as_deref()), now);
        let sequence = entry.sequence();
        self.stats.entries_logged += 1;
        self.pipeline.forward(&entry, now);
        self.append(entry, now);
        Some(sequence)
    }

    /// [`log`](Self::log) with loosely typed fields, sanitized first.
    pub fn log_fields(
        &mut self,
        level: Level,
        component: &str,
        message: &str,
        fields: &IndexMap<String, DynValue>,
    ) -> Option<u64> {
        let context = self.sanitizer.sanitize_fields(fields);
        self.log(EntryDraft::new(level, component, message).with_context(context))
    }

    /// Whether `operation` on `n` entries would take the accelerated path
    /// right now. May run the memory guard.
    pub fn should_accelerate(&mut self, operation: &str, n: usize) -> bool {
        let now = self.clock.now_ms();
        self.select_path(operation, n, now).accelerate
    }

    fn seal(&mut self, draft: EntryDraft, now: u64) -> LogEntry {
        let sequence = self.sequencer.next_sequence();
        draft.seal(sequence, now as i64, &self.session_id)
    }

    /// Forward an internal record without storing it. It never enters the
    /// store, so it takes [`UNSTORED_SEQUENCE`] instead of a live number.
    fn emit(&mut self, draft: EntryDraft, now: u64) {
        if self
            .pipeline
            .admit(draft.level(), draft.component(), draft.message(), now)
            == Admission::Suppressed
        {
            return;
        }
        let entry = draft.seal(UNSTORED_SEQUENCE, now as i64, &self.session_id);
        self.pipeline.forward(&entry, now);
    }

    /// Store one entry. Anything newer than the tail is an O(1) push;
    /// older entries go through the full merge.
    fn append(&mut self, entry: LogEntry, now: u64) {
        let in_order = self
            .store
            .last_sequence()
            .map_or(true, |last| entry.sequence() > last);
        if !in_order {
            self.store_entries(vec![entry], now);
            return;
        }
        if self.store.push(entry).is_some() {
            self.stats.evicted += 1;
        }
        self.notify();
    }

    fn store_entries(&mut self, incoming: Vec<LogEntry>, now: u64) -> MergeOutcome {
        let incoming = normalize_batch(incoming);
        let existing = self.store.take_all();
        let n = existing.len() + incoming.len();
        let decision = self.select_path(MERGE_OPERATION, n, now);

        let started = Instant::now();
        let attempt = if decision.accelerate {
            self.backend
                .as_deref_mut()
                .map(|backend| backend.merge_insert(&existing, &incoming))
        } else {
            None
        };
        let (merged, path, fell_back) = match attempt {
            Some(Ok(merged)) => (merged, ExecutionPath::Accelerated, false),
            Some(Err(e)) => {
                self.on_backend_failure(e, now);
                (merge_insert(&existing, &incoming), ExecutionPath::Reference, true)
            }
            None => (merge_insert(&existing, &incoming), ExecutionPath::Reference, false),
        };
        let duration_ms = started.elapsed().as_secs_f64() * 1_000.0;

        match path {
            ExecutionPath::Accelerated => {
                self.stats.accelerated_merges += 1;
                self.blacklist.clear(MERGE_OPERATION);
            }
            ExecutionPath::Reference => self.stats.reference_merges += 1,
        }
        if !fell_back {
            self.metrics.record(MERGE_OPERATION, path, n, duration_ms);
        }

        let evicted = self.store.replace_with(merged);
        self.stats.evicted += evicted as u64;
        self.notify();

        MergeOutcome {
            path,
            reason: decision.reason,
            fell_back,
            evicted,
            duration_ms,
        }
    }

    fn select_path(&mut self, operation: &str, n: usize, now: u64) -> PathDecision {
        let (backend_ready, high_end) = match &self.backend_state {
            BackendState::Ready { capabilities } => {
                (self.backend.is_some(), capabilities.is_high_end())
            }
            _ => (false, false),
        };
        let blacklisted = backend_ready && self.blacklist.is_blacklisted(operation, now);
        let memory_pressure = self.memory_pressure();

        let input = SelectionInput {
            input_size: n,
            mode: self.selector.mode(),
            backend_ready,
            blacklisted,
            has_samples: self.metrics.has_samples(operation),
            estimated_gain: self.metrics.estimate_gain(operation, n),
            memory_pressure,
            high_end,
            threshold: self.selector.threshold(operation),
        };
        let mut decision = decide(&input, self.selector.config());

        if decision.accelerate {
            if let Some(backend) = self.backend.as_deref_mut() {
                let verdict = self.guard.can_proceed(backend, n);
                self.last_guard_action = Some(verdict.action);
                if !verdict.ok {
                    self.stats.memory_denials += 1;
                    decision.accelerate = false;
                    decision.reason = DecisionReason::MemoryGuard;
                }
            }
        }
        log::trace!(
            "'{operation}' on {n} entries: accelerate={} ({})",
            decision.accelerate,
            decision.reason.as_str()
        );
        decision
    }

    fn memory_pressure(&self) -> bool {
        self.backend
            .as_deref()
            .is_some_and(|backend| self.guard.is_under_pressure(&backend.memory_usage()))
    }

    fn on_backend_failure(&mut self, err: BackendError, now: u64) {
        self.stats.backend_failures += 1;
        self.stats.fallbacks += 1;
        let reason = err.to_string();
        let error = EngineError::from_backend(MERGE_OPERATION, err);

        match &error {
            EngineError::Initialization(_) => {
                log::error!("Acceleration backend failed, disabling: {error}");
                self.backend = None;
                self.backend_state = BackendState::Disabled {
                    reason: reason.clone(),
                };
                self.timers.cancel(&EngineTimer::MemoryCheck);
            }
            EngineError::Memory { .. } => {
                log::warn!("{error}; reclaiming and using the reference merge");
                if let Some(backend) = self.backend.as_deref_mut() {
                    backend.reclaim();
                }
            }
            _ => {
                self.blacklist.add_failure(MERGE_OPERATION, &reason, now);
            }
        }
        self.last_error = Some(error.to_string());

        let draft = EntryDraft::new(
            Level::Warn,
            ENGINE_COMPONENT,
            format!("Accelerated merge failed ({}), used reference merge", error.kind()),
        )
        .with_operation(MERGE_OPERATION)
        .with_field("error", reason);
        self.emit(draft, now);
    }

    // ───────────────────────────────────────────────────────────────
    // Store access
    // ───────────────────────────────────────────────────────────────

    /// Stored entries, oldest first.
    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.store.get_all()
    }

    pub fn clear(&mut self) {
        let dropped = self.store.len();
        self.store.clear();
        log::info!("Log store cleared ({dropped} entries)");
        self.notify();
    }

    pub fn set_min_severity(&mut self, level: Level) {
        self.min_severity = level;
    }

    pub fn min_severity(&self) -> Level {
        self.min_severity
    }

    /// Resize the store. Returns how many of the oldest entries were dropped.
    pub fn set_max_entries(&mut self, capacity: usize) -> usize {
        let dropped = self.store.set_capacity(capacity);
        self.stats.evicted += dropped as u64;
        if dropped > 0 {
            self.notify();
        }
        dropped
    }

    pub fn set_acceleration_mode(&mut self, mode: AccelerationMode) {
        self.selector.set_mode(mode);
    }

    pub fn set_trace_forwarding(&mut self, enabled: bool) {
        self.pipeline.set_trace_forwarding(enabled);
    }

    /// Call `listener` with the full snapshot after every change.
    pub fn subscribe(&mut self, listener: impl FnMut(&[LogEntry]) + 'static) -> SubscriptionId {
        let id = self.next_subscription;
        self.next_subscription += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(existing, _)| *existing != id);
        self.listeners.len() != before
    }

    fn notify(&mut self) {
        if self.listeners.is_empty() {
            return;
        }
        let entries = self.store.get_all();
        for (_, listener) in &mut self.listeners {
            listener(&entries);
        }
    }

    // ───────────────────────────────────────────────────────────────
    // Operations
    // ───────────────────────────────────────────────────────────────

    /// Open an operation scope. A still-active operation is closed as
    /// superseded first.
    pub fn start_operation(
        &mut self,
        name: &str,
        context: Option<ContextMap>,
        timeout_ms: Option<u64>,
    ) {
        if let Some(previous) = self.active_operation.take() {
            log::debug!("Operation '{}' superseded by '{name}'", previous.name);
            self.finish_operation(previous, OperationOutcome::Superseded);
        }
        let now = self.clock.now_ms();
        let deadline = now + timeout_ms.unwrap_or(self.config.default_operation_timeout_ms);
        let operation = ActiveOperation {
            name: name.to_string(),
            context,
            started_at: now,
            deadline,
        };
        let draft = operation.start_draft(ENGINE_COMPONENT);
        self.active_operation = Some(operation);
        self.timers.schedule_at(EngineTimer::OperationTimeout, deadline);
        self.log(draft);
    }

    /// Close the active operation. `None` if there was none.
    pub fn end_operation(&mut self, outcome: OperationOutcome) -> Option<OperationSummary> {
        let operation = self.active_operation.take()?;
        Some(self.finish_operation(operation, outcome))
    }

    pub fn active_operation(&self) -> Option<&str> {
        self.active_operation.as_ref().map(|op| op.name.as_str())
    }

    fn finish_operation(
        &mut self,
        operation: ActiveOperation,
        outcome: OperationOutcome,
    ) -> OperationSummary {
        self.timers.cancel(&EngineTimer::OperationTimeout);
        let now = self.clock.now_ms();
        let (summary, draft) = operation.finish(outcome, now, ENGINE_COMPONENT);
        self.log(draft);
        summary
    }

    // ───────────────────────────────────────────────────────────────
    // Timers
    // ───────────────────────────────────────────────────────────────

    /// Run every due timer, the pipeline's included.
    pub fn tick(&mut self) {
        let now = self.clock.now_ms();
        for rollup in self.pipeline.poll(now) {
            self.record_rollup(rollup, now);
        }

        for timer in self.timers.take_due(now) {
            match timer {
                EngineTimer::OperationTimeout => {
                    if let Some(operation) = self.active_operation.take() {
                        log::warn!("Operation '{}' timed out", operation.name);
                        self.finish_operation(operation, OperationOutcome::TimedOut);
                    }
                }
                EngineTimer::MemoryCheck => {
                    if let Some(backend) = self.backend.as_deref_mut() {
                        self.guard.periodic_check(backend);
                        self.timers.schedule_at(
                            EngineTimer::MemoryCheck,
                            now + self.config.memory.check_interval_ms,
                        );
                    }
                }
                EngineTimer::ThresholdTuning => {
                    let high_end = matches!(
                        &self.backend_state,
                        BackendState::Ready { capabilities } if capabilities.is_high_end()
                    );
                    let pressure = self.memory_pressure();
                    self.selector.tune_all(&self.metrics, pressure, high_end);
                    self.timers.schedule_at(
                        EngineTimer::ThresholdTuning,
                        now + self.config.selector.tuning_interval_ms,
                    );
                }
                EngineTimer::MetricsPersist => {
                    self.persist_metrics();
                    self.timers.schedule_at(
                        EngineTimer::MetricsPersist,
                        now + self.config.metrics.persist_interval_ms,
                    );
                }
            }
        }
    }

    /// Earliest pending deadline across the engine and the pipeline.
    pub fn next_deadline(&self) -> Option<u64> {
        match (self.timers.next_deadline(), self.pipeline.next_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn record_rollup(&mut self, rollup: RollUp, now: u64) {
        let draft = rollup.to_draft();
        if draft.level() < self.min_severity {
            self.stats.entries_filtered += 1;
            return;
        }
        let entry = self.seal(draft, now);
        self.pipeline.forward(&entry, now);
        self.append(entry, now);
    }

    fn persist_metrics(&mut self) {
        let Some(path) = self.config.metrics.seed_path.clone() else {
            return;
        };
        if !self.metrics.is_dirty() {
            return;
        }
        if let Err(e) = self.metrics.save(&path) {
            log::warn!("Could not persist performance metrics: {e}");
            self.last_error = Some(e.to_string());
        }
    }

    /// Close throttle windows, flush telemetry and persist metrics.
    pub fn shutdown(&mut self) {
        let now = self.clock.now_ms();
        if let Some(operation) = self.active_operation.take() {
            self.finish_operation(operation, OperationOutcome::Failure("engine shutdown".into()));
        }
        for rollup in self.pipeline.close_windows() {
            self.record_rollup(rollup, now);
        }
        self.pipeline.shutdown(now);
        self.persist_metrics();
        self.timers.clear();
        log::info!(
            "Log engine stopped: {} ingested, {} logged, {} accelerated merges",
            self.stats.entries_ingested,
            self.stats.entries_logged,
            self.stats.accelerated_merges
        );
    }

    // ───────────────────────────────────────────────────────────────
    // Introspection
    // ───────────────────────────────────────────────────────────────

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    pub fn backend_state(&self) -> &BackendState {
        &self.backend_state
    }

    pub fn blacklist(&self) -> &OperationBlacklist {
        &self.blacklist
    }

    pub fn metrics(&self) -> &PerformanceMetricsTracker {
        &self.metrics
    }

    pub fn selector(&self) -> &ExecutionPathSelector {
        &self.selector
    }

    pub fn pipeline_stats(&self) -> PipelineStats {
        self.pipeline.stats()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn diagnostics(&self) -> EngineDiagnostics {
        let (backend_memory, backend_report) = match self.backend.as_deref() {
            Some(backend) => (backend.memory_usage(), backend.diagnostics()),
            None => (MemorySnapshot::unavailable(), serde_json::Value::Null),
        };
        EngineDiagnostics {
            session_id: self.session_id.clone(),
            acceleration: self.selector.mode(),
            backend: self.backend_state.clone(),
            backend_memory,
            backend_report,
            last_guard_action: self.last_guard_action,
            guard: self.guard.stats(),
            store: StoreDiagnostics {
                len: self.store.len(),
                capacity: self.store.capacity(),
                first_sequence: self.store.first_sequence(),
                last_sequence: self.store.last_sequence(),
                total_evicted: self.store.total_evicted(),
            },
            next_sequence: self.sequencer.peek(),
            min_severity: self.min_severity,
            active_operation: self.active_operation.as_ref().map(|op| op.name.clone()),
            stats: self.stats,
            pipeline: self.pipeline.stats(),
            blacklist: self.blacklist.entries(),
            thresholds: self.selector.thresholds(),
            metrics: self.metrics.snapshot(),
            last_error: self.last_error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logflow_core::{is_strictly_ordered, ManualClock};
    use logflow_telemetry::{MemorySink, ROLLUP_TAG};

    fn entry(seq: u64, level: Level) -> LogEntry {
        EntryDraft::new(level, "app", format!("message {seq}")).seal(seq, seq as i64, "ext")
    }

    fn engine(config: EngineConfig) -> (LogEngine<ManualClock>, ManualClock, MemorySink) {
        let clock = ManualClock::new(1_000);
        let sink = MemorySink::new();
        let engine =
            LogEngine::with_accelerated_backend(config, clock.clone(), Box::new(sink.clone()))
                .unwrap();
        (engine, clock, sink)
    }

    #[test]
    fn test_ingest_orders_and_advances_sequencer() {
        let (mut engine, _, _) = engine(EngineConfig::for_testing());
        let report = engine.ingest(vec![entry(7, Level::Info), entry(3, Level::Info)]);
        assert_eq!(report.accepted, 2);
        assert_eq!(report.stored, 2);

        let seqs: Vec<u64> = engine.snapshot().iter().map(LogEntry::sequence).collect();
        assert_eq!(seqs, vec![3, 7]);

        let next = engine.log(EntryDraft::new(Level::Info, "app", "local")).unwrap();
        assert!(next > 7);
    }

    #[test]
    fn test_min_severity_filters() {
        let (mut engine, _, _) = engine(EngineConfig::for_testing());
        engine.set_min_severity(Level::Warn);
        let report = engine.ingest(vec![entry(1, Level::Info), entry(2, Level::Error)]);
        assert_eq!(report.accepted, 1);
        assert_eq!(report.filtered, 1);
        assert!(engine.log(EntryDraft::new(Level::Debug, "app", "quiet")).is_none());

        let empty = engine.ingest(vec![entry(3, Level::Debug)]);
        assert_eq!(empty.path, None);
    }

    #[test]
    fn test_operation_scope_tags_entries() {
        let (mut engine, clock, _) = engine(EngineConfig::for_testing());
        engine.start_operation("checkout", None, None);
        let seq = engine.log(EntryDraft::new(Level::Info, "cart", "added")).unwrap();
        clock.advance(40);
        let summary = engine.end_operation(OperationOutcome::Success).unwrap();
        assert_eq!(summary.duration_ms, 40);
        assert!(engine.end_operation(OperationOutcome::Success).is_none());

        let tagged = engine
            .snapshot()
            .into_iter()
            .find(|e| e.sequence() == seq)
            .unwrap();
        assert_eq!(tagged.operation(), Some("checkout"));
    }

    #[test]
    fn test_new_operation_supersedes() {
        let (mut engine, _, _) = engine(EngineConfig::for_testing());
        engine.start_operation("first", None, None);
        engine.start_operation("second", None, None);
        assert_eq!(engine.active_operation(), Some("second"));
        assert!(engine
            .snapshot()
            .iter()
            .any(|e| e.message().contains("'first' superseded")));
    }

    #[test]
    fn test_operation_timeout() {
        let (mut engine, clock, _) = engine(EngineConfig::for_testing());
        engine.start_operation("slow", None, Some(200));
        clock.advance(199);
        engine.tick();
        assert_eq!(engine.active_operation(), Some("slow"));
        clock.advance(1);
        engine.tick();
        assert_eq!(engine.active_operation(), None);
        let last = engine.snapshot().pop().unwrap();
        assert_eq!(last.level(), Level::Warn);
        assert!(last.message().contains("timed out"));
    }

    #[test]
    fn test_listeners() {
        use std::cell::RefCell;
        use std::rc::Rc;

        let (mut engine, _, _) = engine(EngineConfig::for_testing());
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let id = engine.subscribe(move |entries| sink.borrow_mut().push(entries.len()));

        engine.ingest(vec![entry(1, Level::Info)]);
        engine.clear();
        assert_eq!(*seen.borrow(), vec![1, 0]);

        assert!(engine.unsubscribe(id));
        assert!(!engine.unsubscribe(id));
        engine.ingest(vec![entry(2, Level::Info)]);
        assert_eq!(seen.borrow().len(), 2);
    }

    #[test]
    fn test_forced_off_drops_backend() {
        let config = EngineConfig {
            acceleration: AccelerationMode::ForcedOff,
            ..EngineConfig::for_testing()
        };
        let (mut engine, _, _) = engine(config);
        assert!(matches!(engine.backend_state(), BackendState::Disabled { .. }));
        assert!(!engine.should_accelerate(MERGE_OPERATION, 10_000));
    }

    #[test]
    fn test_init_failure_disables() {
        let mut config = EngineConfig::for_testing();
        config.accel.initial_pages = 0;
        let (mut engine, _, _) = engine(config);
        assert!(matches!(engine.backend_state(), BackendState::Disabled { .. }));
        assert!(engine.last_error().is_some());

        let report = engine.ingest((1..=200).map(|s| entry(s, Level::Info)).collect());
        assert_eq!(report.path, Some(ExecutionPath::Reference));
        assert_eq!(report.reason, Some(DecisionReason::BackendUnavailable));
    }

    #[test]
    fn test_set_max_entries() {
        let (mut engine, _, _) = engine(EngineConfig::for_testing());
        engine.ingest((1..=50).map(|s| entry(s, Level::Info)).collect());
        assert_eq!(engine.set_max_entries(10), 40);
        let seqs: Vec<u64> = engine.snapshot().iter().map(LogEntry::sequence).collect();
        assert_eq!(seqs, (41..=50).collect::<Vec<_>>());
    }

    #[test]
    fn test_in_order_log_appends_without_merging() {
        let mut config = EngineConfig::for_testing();
        config.telemetry.throttle.max_similar = 1_000;
        let (mut engine, _, _) = engine(config);
        engine.ingest((1..=100).map(|s| entry(s, Level::Info)).collect());
        let merges_before = engine.stats().reference_merges + engine.stats().accelerated_merges;
        let samples_before = engine
            .metrics()
            .sample(MERGE_OPERATION)
            .map(|s| s.operations_count);

        for i in 0..250 {
            engine.log(EntryDraft::new(Level::Info, "app", format!("line {i}")));
        }

        let stats = engine.stats();
        assert_eq!(stats.reference_merges + stats.accelerated_merges, merges_before);
        assert_eq!(
            engine.metrics().sample(MERGE_OPERATION).map(|s| s.operations_count),
            samples_before
        );
        assert_eq!(stats.evicted, 250);
        let stored = engine.snapshot();
        assert_eq!(stored.len(), 100);
        assert!(is_strictly_ordered(&stored));
        assert_eq!(stored[0].sequence(), 251);
        assert_eq!(stored[99].sequence(), 350);
    }

    #[test]
    fn test_rollup_below_min_severity_dropped() {
        let (mut engine, clock, _) = engine(EngineConfig::for_testing());
        for i in 0..10 {
            engine.log(EntryDraft::new(Level::Info, "db", format!("query took {i} ms")));
        }
        assert_eq!(engine.stats().entries_suppressed, 5);
        engine.set_min_severity(Level::Warn);

        clock.advance(1_001);
        engine.tick();
        assert!(!engine.snapshot().iter().any(|e| e.has_tag(ROLLUP_TAG)));
        assert_eq!(engine.stats().entries_filtered, 1);
    }

    #[test]
    fn test_diagnostics_serialize() {
        let (mut engine, _, _) = engine(EngineConfig::for_testing());
        engine.ingest(vec![entry(1, Level::Info)]);
        let json = serde_json::to_value(engine.diagnostics()).unwrap();
        assert_eq!(json["sessionId"], "test-session");
        assert_eq!(json["backend"]["state"], "ready");
        assert_eq!(json["store"]["len"], 1);
    }
}
