//! End-to-end pipeline behaviour against scripted sinks.

use logflow_core::{EntryDraft, Level, LogEntry, Sequencer};
use logflow_telemetry::{
    Admission, MemorySink, TelemetryConfig, TelemetryPipeline, WireRecord, ROLLUP_TAG,
};

fn pipeline(config: TelemetryConfig) -> (TelemetryPipeline, MemorySink, MemorySink) {
    let sink = MemorySink::new();
    let fallback = MemorySink::new();
    let pipeline =
        TelemetryPipeline::new(config, Box::new(sink.clone()), Box::new(fallback.clone()))
            .unwrap();
    (pipeline, sink, fallback)
}

/// Admit, seal and forward, the way the engine's `log` path does.
fn emit(
    pipeline: &mut TelemetryPipeline,
    seq: &mut Sequencer,
    draft: EntryDraft,
    now: u64,
) -> Option<LogEntry> {
    if pipeline.admit(draft.level(), draft.component(), draft.message(), now)
        == Admission::Suppressed
    {
        return None;
    }
    let entry = draft.seal(seq.next_sequence(), now as i64, "session");
    pipeline.forward(&entry, now);
    Some(entry)
}

#[test]
fn test_throttle_boundary_five_pass_and_rollup_cites_ten() {
    let mut config = TelemetryConfig::for_testing();
    config.dispatcher.max_batch_size = 100;
    let (mut p, sink, _) = pipeline(config);
    let mut seq = Sequencer::new();

    let stored: Vec<LogEntry> = (0..10)
        .filter_map(|i| {
            emit(
                &mut p,
                &mut seq,
                EntryDraft::new(Level::Info, "sync", format!("chunk {i} uploaded")),
                10,
            )
        })
        .collect();
    assert_eq!(stored.len(), 5);

    let rollups = p.poll(1_010);
    assert_eq!(rollups.len(), 1);
    assert_eq!(rollups[0].count, 10);
    assert_eq!(rollups[0].samples.len(), 3);

    let rollup = rollups[0].to_draft().seal(seq.next_sequence(), 1_010, "session");
    assert!(rollup.has_tag(ROLLUP_TAG));
    p.forward(&rollup, 1_010);
    p.flush_now(1_010);

    let records: Vec<WireRecord> = sink
        .delivered()
        .iter()
        .flat_map(|d| serde_json::from_str::<Vec<WireRecord>>(&d.payload).unwrap())
        .collect();
    assert_eq!(records.len(), 6);
    assert!(records.last().unwrap().msg.starts_with("10 similar messages"));
}

#[test]
fn test_error_retry_then_last_resort() {
    let (mut p, sink, fallback) = pipeline(TelemetryConfig::for_testing());
    let mut seq = Sequencer::new();
    sink.set_failing(true);

    emit(
        &mut p,
        &mut seq,
        EntryDraft::new(Level::Error, "db", "write failed").with_stack_trace("at db::write"),
        0,
    );
    let mut now = 0;
    while p.stats().pending_retries > 0 {
        now = p.next_deadline().unwrap();
        p.poll(now);
    }
    assert_eq!(now, 100);

    let delivered = fallback.delivered();
    assert_eq!(delivered.len(), 1);
    let record: WireRecord = serde_json::from_str(&delivered[0].payload).unwrap();
    assert_eq!(record.lvl, 3);
    assert_eq!(record.stack.as_deref(), Some("at db::write"));
}

#[test]
fn test_warn_never_throttled_and_batched() {
    let (mut p, sink, _) = pipeline(TelemetryConfig::for_testing());
    let mut seq = Sequencer::new();
    for _ in 0..8 {
        assert!(emit(
            &mut p,
            &mut seq,
            EntryDraft::new(Level::Warn, "ui", "slow frame"),
            0
        )
        .is_some());
    }
    assert_eq!(sink.record_count(), 8);
    assert!(sink.delivered().iter().all(|d| d.batch));
    assert_eq!(p.stats().suppressed, 0);
}

#[test]
fn test_min_outbound_level() {
    let (mut p, sink, _) = pipeline(TelemetryConfig::for_testing());
    let mut seq = Sequencer::new();
    p.set_min_level(Level::Warn);
    emit(&mut p, &mut seq, EntryDraft::new(Level::Info, "ui", "hidden"), 0);
    emit(&mut p, &mut seq, EntryDraft::new(Level::Warn, "ui", "shown"), 0);
    p.flush_now(0);
    assert_eq!(sink.record_count(), 1);
    assert_eq!(p.stats().filtered, 1);
}
