//! The outbound telemetry pipeline.
//!
//! ```text
//!            admit()                       forward()
//!  draft ──► ThrottleGate ──pass──► store ──► level filter
//!                │                              │
//!           suppressed                 ERROR+   │   below ERROR
//!                ▼                      ▼       ▼
//!            RollUp at            sink.send   BatchDispatcher ──► sink.send_batch
//!            window close             │                               │
//!                                     └──────── failure ──────────────┘
//!                                                  │
//!                                   single ──► RetryQueue ──► fallback sink
//!                                    batch ─────────────────► fallback sink (once)
//! ```
//!
//! Nothing here returns an error to the caller. Delivery problems are
//! reported on the `logflow::console` log target and counted in
//! [`PipelineStats`]. Timers (flush, retry, throttle sweep) run from
//! [`TelemetryPipeline::poll`].

use logflow_core::{Level, LogEntry, Scheduler};
use serde::Serialize;

use crate::config::{ConfigError, TelemetryConfig};
use crate::dispatcher::{BatchDispatcher, OutboundBatch};
use crate::retry::{CaptureOutcome, DeliveryKind, PendingDelivery, RetryQueue};
use crate::sink::{Sink, CONSOLE_TARGET};
use crate::throttle::{Admission, RollUp, ThrottleGate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum PipelineTimer {
    Flush,
    Retry,
    Sweep,
}

/// Delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub forwarded: u64,
    pub filtered: u64,
    pub suppressed: u64,
    pub sent_immediate: u64,
    pub batches_sent: u64,
    pub send_failures: u64,
    pub retries_succeeded: u64,
    pub fallback_deliveries: u64,
    pub dropped: u64,
    pub pending_retries: usize,
    pub buffered: usize,
}

pub struct TelemetryPipeline {
    gate: ThrottleGate,
    dispatcher: BatchDispatcher,
    retry: RetryQueue,
    sink: Box<dyn Sink>,
    fallback: Box<dyn Sink>,
    min_level: Level,
    trace_forwarding: bool,
    timers: Scheduler<PipelineTimer>,
    stats: PipelineStats,
}

impl std::fmt::Debug for TelemetryPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryPipeline")
            .field("sink", &self.sink.name())
            .field("fallback", &self.fallback.name())
            .field("min_level", &self.min_level)
            .field("trace_forwarding", &self.trace_forwarding)
            .field("stats", &self.stats)
            .finish()
    }
}

impl TelemetryPipeline {
    pub fn new(
        config: TelemetryConfig,
        sink: Box<dyn Sink>,
        fallback: Box<dyn Sink>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            gate: ThrottleGate::new(config.throttle)?,
            dispatcher: BatchDispatcher::new(config.dispatcher),
            retry: RetryQueue::new(config.retry),
            sink,
            fallback,
            min_level: config.min_outbound_level,
            trace_forwarding: config.trace_forwarding,
            timers: Scheduler::new(),
            stats: PipelineStats::default(),
        })
    }

    // ───────────────────────────────────────────────────────────────
    // Throttling
    // ───────────────────────────────────────────────────────────────

    /// Decide whether a new message may be stored and forwarded.
    pub fn admit(&mut self, level: Level, component: &str, message: &str, now_ms: u64) -> Admission {
        let admission = self.gate.admit(level, component, message, now_ms);
        if admission == Admission::Suppressed {
            self.stats.suppressed += 1;
        }
        self.arm_sweep();
        admission
    }

    fn arm_sweep(&mut self) {
        if let Some(at) = self.gate.next_window_close() {
            self.timers.schedule_at(PipelineTimer::Sweep, at);
        }
    }

    /// Close every open window now, e.g. at shutdown.
    pub fn close_windows(&mut self) -> Vec<RollUp> {
        self.timers.cancel(&PipelineTimer::Sweep);
        self.gate.sweep(u64::MAX)
    }

    pub fn gate(&self) -> &ThrottleGate {
        &self.gate
    }

    // ───────────────────────────────────────────────────────────────
    // Outbound
    // ───────────────────────────────────────────────────────────────

    pub fn set_min_level(&mut self, level: Level) {
        self.min_level = level;
    }

    pub fn set_trace_forwarding(&mut self, enabled: bool) {
        self.trace_forwarding = enabled;
        log::info!("Trace forwarding {}", if enabled { "enabled" } else { "disabled" });
    }

    pub fn trace_forwarding(&self) -> bool {
        self.trace_forwarding
    }

    pub fn should_forward(&self, level: Level) -> bool {
        if level == Level::Trace {
            self.trace_forwarding
        } else {
            level >= self.min_level
        }
    }

    /// Send `entry` to the sink: ERROR+ immediately, the rest batched.
    pub fn forward(&mut self, entry: &LogEntry, now_ms: u64) {
        if !self.should_forward(entry.level()) {
            self.stats.filtered += 1;
            return;
        }
        self.stats.forwarded += 1;

        if entry.level().is_error_or_above() {
            match self.dispatcher.encode_single(entry) {
                Ok(payload) => self.send_single(entry.component(), payload, now_ms),
                Err(e) => {
                    self.stats.dropped += 1;
                    log::warn!(target: CONSOLE_TARGET, "Dropping record {}: {e}", entry.sequence());
                }
            }
            return;
        }

        match self.dispatcher.enqueue(entry, now_ms) {
            Ok(true) => self.flush_now(now_ms),
            Ok(false) => {
                if let Some(deadline) = self.dispatcher.flush_deadline() {
                    self.timers.schedule_at(PipelineTimer::Flush, deadline);
                }
            }
            Err(e) => {
                self.stats.dropped += 1;
                log::warn!(target: CONSOLE_TARGET, "Dropping record {}: {e}", entry.sequence());
            }
        }
    }

    /// Send whatever is buffered right away.
    pub fn flush_now(&mut self, now_ms: u64) {
        self.timers.cancel(&PipelineTimer::Flush);
        let batches = self.dispatcher.drain();
        self.send_batches(batches, now_ms);
    }

    fn send_single(&mut self, component: &str, payload: String, now_ms: u64) {
        match self.sink.send(component, &payload) {
            Ok(()) => self.stats.sent_immediate += 1,
            Err(e) => {
                self.stats.send_failures += 1;
                log::warn!(target: CONSOLE_TARGET, "Send to '{component}' failed: {e}");
                self.queue_retry(component, payload, DeliveryKind::Single, now_ms);
            }
        }
    }

    fn send_batches(&mut self, batches: Vec<OutboundBatch>, now_ms: u64) {
        for batch in batches {
            match self.sink.send_batch(&batch.component, &batch.payload) {
                Ok(()) => self.stats.batches_sent += 1,
                Err(e) => {
                    self.stats.send_failures += 1;
                    log::warn!(
                        target: CONSOLE_TARGET,
                        "Batch of {} records to '{}' failed: {e}",
                        batch.records,
                        batch.component
                    );
                    self.deliver_fallback(&batch.component, &batch.payload, DeliveryKind::Batch);
                }
            }
        }
    }

    fn queue_retry(&mut self, component: &str, payload: String, kind: DeliveryKind, now_ms: u64) {
        match self.retry.capture(component, payload, kind, now_ms) {
            CaptureOutcome::Queued => {
                if let Some(due) = self.retry.next_due() {
                    self.timers.schedule_at(PipelineTimer::Retry, due);
                }
            }
            CaptureOutcome::Full(pending) => {
                log::warn!(target: CONSOLE_TARGET, "Retry queue full, using fallback transport");
                self.deliver_fallback(&pending.component, &pending.payload, pending.kind);
            }
        }
    }

    fn deliver_fallback(&mut self, component: &str, payload: &str, kind: DeliveryKind) -> bool {
        let result = match kind {
            DeliveryKind::Single => self.fallback.send(component, payload),
            DeliveryKind::Batch => self.fallback.send_batch(component, payload),
        };
        match result {
            Ok(()) => {
                self.stats.fallback_deliveries += 1;
                true
            }
            Err(e) => {
                self.stats.dropped += 1;
                log::error!(
                    target: CONSOLE_TARGET,
                    "Fallback '{}' failed for '{component}', payload dropped: {e}",
                    self.fallback.name()
                );
                false
            }
        }
    }

    fn retry_one(&mut self, pending: PendingDelivery, now_ms: u64) {
        let result = match pending.kind {
            DeliveryKind::Single => self.sink.send(&pending.component, &pending.payload),
            DeliveryKind::Batch => self.sink.send_batch(&pending.component, &pending.payload),
        };
        match result {
            Ok(()) => {
                self.stats.retries_succeeded += 1;
                log::debug!("Redelivered payload for '{}'", pending.component);
            }
            Err(e) => {
                self.stats.send_failures += 1;
                if let Some(exhausted) = self.retry.reschedule(pending, now_ms) {
                    log::warn!(
                        target: CONSOLE_TARGET,
                        "Giving up on '{}' after {} attempts: {e}",
                        exhausted.component,
                        exhausted.failures
                    );
                    self.deliver_fallback(&exhausted.component, &exhausted.payload, exhausted.kind);
                }
            }
        }
    }

    // ───────────────────────────────────────────────────────────────
    // Timers
    // ───────────────────────────────────────────────────────────────

    /// Run every due timer. Returns the roll-ups of closed throttle
    /// windows; the caller records them as entries.
    pub fn poll(&mut self, now_ms: u64) -> Vec<RollUp> {
        let mut rollups = Vec::new();
        for timer in self.timers.take_due(now_ms) {
            match timer {
                PipelineTimer::Flush => {
                    let batches = self.dispatcher.drain_due(now_ms);
                    self.send_batches(batches, now_ms);
                    if let Some(deadline) = self.dispatcher.flush_deadline() {
                        self.timers.schedule_at(PipelineTimer::Flush, deadline);
                    }
                }
                PipelineTimer::Retry => {
                    for pending in self.retry.take_due(now_ms) {
                        self.retry_one(pending, now_ms);
                    }
                    if let Some(due) = self.retry.next_due() {
                        self.timers.schedule_at(PipelineTimer::Retry, due);
                    }
                }
                PipelineTimer::Sweep => {
                    rollups.extend(self.gate.sweep(now_ms));
                    self.arm_sweep();
                }
            }
        }
        rollups
    }

    pub fn next_deadline(&self) -> Option<u64> {
        self.timers.next_deadline()
    }

    /// Flush buffers and give every pending retry one last attempt,
    /// falling back on failure.
    pub fn shutdown(&mut self, now_ms: u64) {
        self.flush_now(now_ms);
        self.timers.cancel(&PipelineTimer::Retry);
        for pending in self.retry.drain() {
            let result = match pending.kind {
                DeliveryKind::Single => self.sink.send(&pending.component, &pending.payload),
                DeliveryKind::Batch => self.sink.send_batch(&pending.component, &pending.payload),
            };
            match result {
                Ok(()) => self.stats.retries_succeeded += 1,
                Err(_) => {
                    self.deliver_fallback(&pending.component, &pending.payload, pending.kind);
                }
            }
        }
        log::info!(
            "Telemetry pipeline shut down: {} forwarded, {} suppressed, {} dropped",
            self.stats.forwarded,
            self.stats.suppressed,
            self.stats.dropped
        );
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            pending_retries: self.retry.len(),
            buffered: self.dispatcher.len(),
            ..self.stats
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;
    use logflow_core::EntryDraft;

    fn pipeline() -> (TelemetryPipeline, MemorySink, MemorySink) {
        let sink = MemorySink::new();
        let fallback = MemorySink::new();
        let pipeline = TelemetryPipeline::new(
            TelemetryConfig::for_testing(),
            Box::new(sink.clone()),
            Box::new(fallback.clone()),
        )
        .unwrap();
        (pipeline, sink, fallback)
    }

    fn entry(seq: u64, level: Level) -> LogEntry {
        EntryDraft::new(level, "net", format!("event {seq}")).seal(seq, 0, "s")
    }

    #[test]
    fn test_error_sent_immediately() {
        let (mut p, sink, _) = pipeline();
        p.forward(&entry(1, Level::Error), 0);
        let delivered = sink.delivered();
        assert_eq!(delivered.len(), 1);
        assert!(!delivered[0].batch);
        assert_eq!(p.stats().sent_immediate, 1);
    }

    #[test]
    fn test_batch_on_size_and_timer() {
        let (mut p, sink, _) = pipeline();
        for seq in 1..=4 {
            p.forward(&entry(seq, Level::Info), 0);
        }
        // max_batch_size = 4
        assert_eq!(sink.delivered().len(), 1);
        assert_eq!(sink.record_count(), 4);

        p.forward(&entry(5, Level::Info), 10);
        assert_eq!(p.next_deadline(), Some(110));
        p.poll(109);
        assert_eq!(sink.record_count(), 4);
        p.poll(110);
        assert_eq!(sink.record_count(), 5);
    }

    #[test]
    fn test_trace_needs_forwarding_toggle() {
        let (mut p, sink, _) = pipeline();
        p.forward(&entry(1, Level::Trace), 0);
        assert_eq!(p.stats().filtered, 1);
        p.set_trace_forwarding(true);
        p.forward(&entry(2, Level::Trace), 0);
        p.flush_now(0);
        assert_eq!(sink.record_count(), 1);
    }

    #[test]
    fn test_critical_failure_retried_then_fallback() {
        let (mut p, sink, fallback) = pipeline();
        sink.set_failing(true);
        p.forward(&entry(1, Level::Critical), 0);
        assert_eq!(p.stats().pending_retries, 1);

        // for_testing: 50 ms delay, 2 retries.
        p.poll(50);
        assert_eq!(p.stats().pending_retries, 1);
        p.poll(100);
        assert_eq!(p.stats().pending_retries, 0);
        assert_eq!(sink.attempts(), 3);
        assert_eq!(fallback.delivered().len(), 1);
        assert_eq!(p.stats().fallback_deliveries, 1);
    }

    #[test]
    fn test_retry_recovers() {
        let (mut p, sink, fallback) = pipeline();
        sink.fail_next(1);
        p.forward(&entry(1, Level::Error), 0);
        p.poll(50);
        assert_eq!(sink.delivered().len(), 1);
        assert_eq!(p.stats().retries_succeeded, 1);
        assert!(fallback.delivered().is_empty());
    }

    #[test]
    fn test_non_critical_failure_falls_back_once() {
        let (mut p, sink, fallback) = pipeline();
        sink.set_failing(true);
        fallback.set_failing(true);
        for seq in 1..=4 {
            p.forward(&entry(seq, Level::Info), 0);
        }
        assert_eq!(p.stats().pending_retries, 0);
        assert_eq!(fallback.attempts(), 1);
        assert_eq!(p.stats().dropped, 1);
    }

    #[test]
    fn test_throttle_sweep_timer() {
        let (mut p, _, _) = pipeline();
        for _ in 0..8 {
            p.admit(Level::Info, "net", "poll tick", 0);
        }
        assert_eq!(p.stats().suppressed, 3);
        assert!(p.poll(999).is_empty());
        let rollups = p.poll(1_000);
        assert_eq!(rollups.len(), 1);
        assert_eq!(rollups[0].count, 8);
    }

    #[test]
    fn test_shutdown_flushes_everything() {
        let (mut p, sink, fallback) = pipeline();
        p.forward(&entry(1, Level::Info), 0);
        sink.fail_next(1);
        p.forward(&entry(2, Level::Error), 0);
        sink.set_failing(true);
        p.shutdown(1);
        assert_eq!(p.stats().buffered, 0);
        assert_eq!(p.stats().pending_retries, 0);
        // Batch and the pending error both went to the fallback.
        assert_eq!(fallback.delivered().len(), 2);
    }
}
