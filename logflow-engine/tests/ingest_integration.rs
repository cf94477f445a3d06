//! End-to-end ingestion through `LogEngine`.

use std::cell::Cell;
use std::rc::Rc;

use logflow_accel::{AccelConfig, AcceleratedBackend};
use logflow_core::{
    is_strictly_ordered, AccelerationBackend, BackendError, Capabilities, EntryDraft, Level,
    LogEntry, ManualClock, MemoryEstimate, MemorySnapshot, MergeStrategy,
};
use logflow_engine::{
    AccelerationMode, DecisionReason, EngineConfig, ExecutionPath, LogEngine, MERGE_OPERATION,
};
use logflow_telemetry::{MemorySink, ROLLUP_TAG};

fn entry(seq: u64) -> LogEntry {
    EntryDraft::new(Level::Info, "ingest", format!("record {seq}")).seal(seq, seq as i64, "remote")
}

fn roomy_accel() -> AccelConfig {
    AccelConfig {
        initial_pages: 64,
        max_pages: 256,
        ..AccelConfig::for_testing()
    }
}

fn engine(config: EngineConfig) -> (LogEngine<ManualClock>, ManualClock, MemorySink) {
    let clock = ManualClock::new(10_000);
    let sink = MemorySink::new();
    let engine =
        LogEngine::with_accelerated_backend(config, clock.clone(), Box::new(sink.clone())).unwrap();
    (engine, clock, sink)
}

/// Delegates to the real backend but fails merges while `failing` is set.
struct FlakyBackend {
    inner: AcceleratedBackend,
    failing: Rc<Cell<bool>>,
}

impl MergeStrategy for FlakyBackend {
    fn name(&self) -> &'static str {
        "flaky"
    }

    fn merge_insert(
        &mut self,
        existing: &[LogEntry],
        incoming: &[LogEntry],
    ) -> Result<Vec<LogEntry>, BackendError> {
        if self.failing.get() {
            return Err(BackendError::Operation {
                operation: MERGE_OPERATION.to_string(),
                reason: "injected fault".to_string(),
            });
        }
        self.inner.merge_insert(existing, incoming)
    }
}

impl AccelerationBackend for FlakyBackend {
    fn initialize(&mut self) -> Result<Capabilities, BackendError> {
        self.inner.initialize()
    }

    fn memory_usage(&self) -> MemorySnapshot {
        self.inner.memory_usage()
    }

    fn estimate_memory_for(&self, entries: usize) -> MemoryEstimate {
        self.inner.estimate_memory_for(entries)
    }

    fn reclaim(&mut self) {
        self.inner.reclaim();
    }

    fn grow_capacity(&mut self, bytes: usize) -> bool {
        self.inner.grow_capacity(bytes)
    }
}

#[test]
fn test_overflow_keeps_newest_in_order() {
    let config = EngineConfig {
        ring_capacity: 5_000,
        accel: roomy_accel(),
        ..EngineConfig::for_testing()
    };
    let (mut engine, _, _) = engine(config);

    // Newest batch first, each batch internally reversed.
    let mut evicted = 0;
    for chunk in (0..10).rev() {
        let batch: Vec<LogEntry> = (chunk * 1_000 + 1..=chunk * 1_000 + 1_000)
            .rev()
            .map(entry)
            .collect();
        evicted += engine.ingest(batch).evicted;
    }

    let stored = engine.snapshot();
    assert_eq!(stored.len(), 5_000);
    assert!(is_strictly_ordered(&stored));
    assert_eq!(stored[0].sequence(), 5_001);
    assert_eq!(stored[4_999].sequence(), 10_000);
    assert_eq!(evicted, 5_000);
}

#[test]
fn test_single_batch_overflow_keeps_newest() {
    for mode in [AccelerationMode::Auto, AccelerationMode::ForcedOn] {
        let config = EngineConfig {
            acceleration: mode,
            ring_capacity: 5_000,
            accel: roomy_accel(),
            ..EngineConfig::for_testing()
        };
        let (mut engine, _, _) = engine(config);

        let report = engine.ingest((1..=10_000).rev().map(entry).collect());
        assert_eq!(report.accepted, 10_000);
        assert_eq!(report.stored, 5_000);
        assert_eq!(report.evicted, 5_000);

        let stored = engine.snapshot();
        assert_eq!(stored.len(), 5_000);
        assert!(is_strictly_ordered(&stored));
        assert_eq!(stored[0].sequence(), 5_001);
        assert_eq!(stored[4_999].sequence(), 10_000);
    }
}

fn assert_contiguous(stored: &[LogEntry]) {
    let seqs: Vec<u64> = stored.iter().map(LogEntry::sequence).collect();
    assert!(
        seqs.windows(2).all(|w| w[1] == w[0] + 1),
        "gap in store: {seqs:?}"
    );
}

#[test]
fn test_local_and_remote_sequences_stay_contiguous() {
    let (mut engine, _, sink) = engine(EngineConfig::for_testing());
    for round in 0..4 {
        let local = engine
            .log(EntryDraft::new(Level::Info, "app", format!("local {round}")))
            .unwrap();
        engine.ingest(vec![entry(local + 1)]);
    }
    let last = engine.log(EntryDraft::new(Level::Warn, "app", "done")).unwrap();
    assert_eq!(last, 9);
    let stored = engine.snapshot();
    assert_eq!(stored.len(), 9);
    assert_contiguous(&stored);

    // Merge records are forwarded but never stored.
    engine.shutdown();
    assert!(sink
        .delivered()
        .iter()
        .any(|d| d.payload.contains("Merged 1 entries") && d.payload.contains(r#""seq":0"#)));
}

#[test]
fn test_backend_failure_leaves_no_sequence_gap() {
    let backend = FlakyBackend {
        inner: AcceleratedBackend::new(roomy_accel()),
        failing: Rc::new(Cell::new(true)),
    };
    let config = EngineConfig {
        acceleration: AccelerationMode::ForcedOn,
        ..EngineConfig::for_testing()
    };
    let mut engine = LogEngine::new(
        config,
        ManualClock::new(1_000),
        Some(Box::new(backend)),
        Box::new(MemorySink::new()),
    )
    .unwrap();

    let first = engine.log(EntryDraft::new(Level::Info, "app", "before")).unwrap();
    let report = engine.ingest(vec![entry(first + 1)]);
    assert!(report.fell_back);
    let after = engine.log(EntryDraft::new(Level::Info, "app", "after")).unwrap();
    assert_eq!(after, first + 2);
    assert_contiguous(&engine.snapshot());
}

#[test]
fn test_reingest_is_idempotent() {
    let (mut engine, _, _) = engine(EngineConfig::for_testing());
    let batch: Vec<LogEntry> = (1..=30).map(entry).collect();
    engine.ingest(batch.clone());
    let first = engine.snapshot();

    let report = engine.ingest(batch);
    assert_eq!(report.stored, 30);
    assert_eq!(engine.snapshot(), first);
}

#[test]
fn test_accelerated_matches_reference() {
    let accelerated_config = EngineConfig {
        acceleration: AccelerationMode::ForcedOn,
        ring_capacity: 400,
        accel: roomy_accel(),
        ..EngineConfig::for_testing()
    };
    let reference_config = EngineConfig {
        acceleration: AccelerationMode::ForcedOff,
        ..accelerated_config.clone()
    };
    let (mut fast, _, _) = engine(accelerated_config);
    let (mut slow, _, _) = engine(reference_config);

    let batches: Vec<Vec<LogEntry>> = vec![
        (1..=100).map(entry).collect(),
        (50..=150).step_by(2).map(entry).collect(),
        (300..=400).rev().map(entry).collect(),
        (151..=299).map(entry).collect(),
        (900..=1_000).chain(1..=5).map(entry).collect(),
    ];
    for batch in batches {
        let a = fast.ingest(batch.clone());
        let b = slow.ingest(batch);
        assert_eq!(b.path, Some(ExecutionPath::Reference));
        assert_eq!(a.stored, b.stored);
        assert_eq!(fast.snapshot(), slow.snapshot());
    }
    assert!(fast.stats().accelerated_merges > 0);
    assert_eq!(slow.stats().accelerated_merges, 0);
}

#[test]
fn test_forced_off_never_accelerates() {
    let config = EngineConfig {
        acceleration: AccelerationMode::ForcedOff,
        accel: roomy_accel(),
        ..EngineConfig::for_testing()
    };
    let (mut engine, _, _) = engine(config);
    for start in (0..5).map(|i| i * 3_000) {
        let report = engine.ingest((start + 1..=start + 3_000).map(entry).collect());
        assert_eq!(report.path, Some(ExecutionPath::Reference));
    }
    assert!(!engine.should_accelerate(MERGE_OPERATION, 1_000_000));
    assert_eq!(engine.stats().accelerated_merges, 0);
}

#[test]
fn test_failures_blacklist_with_backoff() {
    let clock = ManualClock::new(1_000);
    let failing = Rc::new(Cell::new(true));
    let backend = FlakyBackend {
        inner: AcceleratedBackend::new(roomy_accel()),
        failing: failing.clone(),
    };
    let config = EngineConfig {
        acceleration: AccelerationMode::ForcedOn,
        ..EngineConfig::for_testing()
    };
    let mut engine = LogEngine::new(
        config,
        clock.clone(),
        Some(Box::new(backend)),
        Box::new(MemorySink::new()),
    )
    .unwrap();

    let mut next_seq = 1;
    let mut batch = || {
        let out: Vec<LogEntry> = (next_seq..next_seq + 10).map(entry).collect();
        next_seq += 10;
        out
    };

    let report = engine.ingest(batch());
    assert!(report.fell_back);
    assert_eq!(report.path, Some(ExecutionPath::Reference));
    assert_eq!(engine.snapshot().len(), 10);

    let mut backoffs = Vec::new();
    for _ in 0..2 {
        let current = engine.blacklist().entry(MERGE_OPERATION).unwrap().clone();
        backoffs.push(current.backoff_ms);

        let blocked = engine.ingest(batch());
        assert_eq!(blocked.reason, Some(DecisionReason::Blacklisted));
        assert!(!blocked.fell_back);

        clock.set(current.next_retry_time + 1);
        let retried = engine.ingest(batch());
        assert!(retried.fell_back);
    }
    backoffs.push(engine.blacklist().entry(MERGE_OPERATION).unwrap().backoff_ms);
    assert_eq!(backoffs, vec![5_000, 15_000, 45_000]);

    failing.set(false);
    let next_retry = engine.blacklist().entry(MERGE_OPERATION).unwrap().next_retry_time;
    clock.set(next_retry + 1);
    let recovered = engine.ingest(batch());
    assert_eq!(recovered.path, Some(ExecutionPath::Accelerated));
    assert!(engine.blacklist().is_empty());
    assert_eq!(engine.stats().backend_failures, 3);
    assert!(is_strictly_ordered(&engine.snapshot()));
    assert_eq!(engine.snapshot().len(), 60);
}

#[test]
fn test_throttled_log_rolls_up() {
    let (mut engine, clock, _) = engine(EngineConfig::for_testing());
    let mut passed = 0;
    for i in 0..10 {
        if engine
            .log(EntryDraft::new(Level::Info, "db", format!("query took {i} ms")))
            .is_some()
        {
            passed += 1;
        }
    }
    assert_eq!(passed, 5);
    assert_eq!(engine.stats().entries_suppressed, 5);

    clock.advance(1_001);
    engine.tick();
    let rollup = engine
        .snapshot()
        .into_iter()
        .find(|e| e.has_tag(ROLLUP_TAG))
        .expect("roll-up entry stored");
    assert_eq!(rollup.component(), "db");
    let count = rollup.context().and_then(|c| c.get("count")).and_then(|v| v.as_i64());
    assert_eq!(count, Some(10));
}

#[test]
fn test_metrics_persist_across_sessions() {
    let dir = tempfile::tempdir().unwrap();
    let seed = dir.path().join("perf.json");
    let mut config = EngineConfig::for_testing();
    config.metrics.seed_path = Some(seed.clone());

    let (mut first, _, _) = engine(config.clone());
    for start in [0u64, 100, 200] {
        first.ingest((start + 1..=start + 100).map(entry).collect());
    }
    first.shutdown();
    assert!(seed.exists());

    let (restarted, _, _) = engine(config);
    assert!(restarted.metrics().has_samples(MERGE_OPERATION));
    let sample = restarted.metrics().sample(MERGE_OPERATION).unwrap();
    assert!(sample.operations_count <= 5);
}

#[test]
fn test_error_entries_reach_sink_immediately() {
    let (mut engine, _, sink) = engine(EngineConfig::for_testing());
    engine.log(EntryDraft::new(Level::Error, "payments", "card declined"));
    let delivered = sink.delivered();
    assert_eq!(delivered.len(), 1);
    assert!(!delivered[0].batch);
    assert!(delivered[0].payload.contains("card declined"));
}
