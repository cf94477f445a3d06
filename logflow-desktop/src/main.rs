//! logflow demo host.
//!
//! Drives a `LogEngine` through a simulated session on a manual clock:
//! remote batches of growing size, a throttled burst, a flaky sink and an
//! operation scope. Prints the final diagnostics as JSON.
//!
//! ```text
//! RUST_LOG=debug cargo run -p logflow-desktop -- [engine.json]
//! ```

use std::cell::Cell;
use std::rc::Rc;

use log::info;
use logflow_core::{Clock, ContextMap, ContextValue, EntryDraft, Level, LogEntry, ManualClock};
use logflow_engine::{EngineConfig, LogEngine, OperationOutcome};
use logflow_telemetry::MemorySink;

/// Simulated wall-clock step between host events.
const STEP_MS: u64 = 250;

/// Produces entries the way another process would, with its own sequences.
struct RemoteProducer {
    next_sequence: u64,
}

impl RemoteProducer {
    fn batch(&mut self, size: usize, now_ms: u64) -> Vec<LogEntry> {
        let mut batch: Vec<LogEntry> = (0..size)
            .map(|i| {
                let sequence = self.next_sequence + i as u64;
                let level = if i % 97 == 0 { Level::Warn } else { Level::Info };
                EntryDraft::new(level, "renderer", format!("frame {sequence} composed"))
                    .with_field("layer", (i % 8) as u64)
                    .seal(sequence, now_ms as i64, "renderer-process")
            })
            .collect();
        self.next_sequence += size as u64;
        // Arrives slightly out of order.
        batch.reverse();
        batch
    }
}

fn load_config() -> Result<EngineConfig, Box<dyn std::error::Error>> {
    match std::env::args().nth(1) {
        Some(path) => {
            info!("Loading engine config from {path}");
            Ok(EngineConfig::from_json_file(&path)?)
        }
        None => Ok(EngineConfig {
            ring_capacity: 2_000,
            ..EngineConfig::default()
        }),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    info!("Starting logflow demo...");

    let config = load_config()?;
    let clock = ManualClock::new(1_700_000_000_000);
    let sink = MemorySink::new();
    // The first few deliveries fail to exercise retry and fallback.
    sink.fail_next(3);

    let mut engine =
        LogEngine::with_accelerated_backend(config, clock.clone(), Box::new(sink.clone()))?;

    let updates = Rc::new(Cell::new(0u64));
    let counter = updates.clone();
    engine.subscribe(move |_entries| counter.set(counter.get() + 1));

    let mut context = ContextMap::new();
    context.insert("source".into(), ContextValue::Str("demo".into()));
    engine.start_operation("session-replay", Some(context), Some(60_000));

    let mut remote = RemoteProducer {
        next_sequence: 1_000_000,
    };
    for size in [10, 100, 500, 1_500, 3_000] {
        let report = engine.ingest(remote.batch(size, clock.now_ms()));
        info!(
            "Ingested {} entries via {:?} ({:?}) in {:.3} ms, {} evicted",
            report.accepted, report.path, report.reason, report.duration_ms, report.evicted
        );
        clock.advance(STEP_MS);
        engine.tick();
    }

    // A noisy loop: only the first few get through, then a roll-up.
    for attempt in 0..25 {
        engine.log(EntryDraft::new(
            Level::Info,
            "network",
            format!("retrying connection to 10.0.0.{} (attempt {attempt})", attempt % 4),
        ));
    }
    engine.log(
        EntryDraft::new(Level::Error, "network", "connection pool exhausted")
            .with_stack_trace("at pool::acquire\nat client::send"),
    );

    for _ in 0..40 {
        clock.advance(STEP_MS);
        engine.tick();
    }

    if let Some(summary) = engine.end_operation(OperationOutcome::Success) {
        info!("Operation '{}' finished in {} ms", summary.name, summary.duration_ms);
    }
    engine.shutdown();

    info!(
        "Delivered {} records in {} sink calls, {} store updates",
        sink.record_count(),
        sink.attempts(),
        updates.get()
    );
    println!("{}", serde_json::to_string_pretty(&engine.diagnostics())?);
    Ok(())
}

