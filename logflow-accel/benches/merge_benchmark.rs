//! Reference vs accelerated merge throughput.

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use logflow_accel::{AccelConfig, AcceleratedBackend};
use logflow_core::{AccelerationBackend, EntryDraft, Level, LogEntry, MergeStrategy, ReferenceMerge};

fn make_entries(seqs: impl Iterator<Item = u64>) -> Vec<LogEntry> {
    seqs.map(|seq| {
        EntryDraft::new(Level::Info, "bench", format!("request {seq} completed"))
            .with_field("latency_ms", (seq % 97) as i64)
            .seal(seq, seq as i64, "bench-session")
    })
    .collect()
}

fn backend() -> AcceleratedBackend {
    let mut backend = AcceleratedBackend::new(AccelConfig {
        initial_pages: 1024,
        ..AccelConfig::default()
    });
    backend.initialize().expect("bench backend");
    backend
}

fn bench_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge_append");
    for &count in &[100u64, 1_000, 5_000] {
        let existing = make_entries(1..=count);
        let incoming = make_entries(count + 1..=count + count / 10);
        let input = (existing, incoming);

        group.bench_with_input(BenchmarkId::new("reference", count), &input, |b, (e, i)| {
            let mut strategy = ReferenceMerge;
            b.iter(|| black_box(strategy.merge_insert(black_box(e), black_box(i))));
        });
        group.bench_with_input(BenchmarkId::new("accelerated", count), &input, |b, (e, i)| {
            let mut strategy = backend();
            b.iter(|| {
                let out = strategy.merge_insert(black_box(e), black_box(i));
                strategy.reclaim();
                black_box(out)
            });
        });
    }
    group.finish();
}

fn bench_interleaved(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge_interleaved");
    for &count in &[100u64, 1_000, 5_000] {
        let existing = make_entries((1..=count).map(|s| s * 2));
        let incoming = make_entries((1..=count / 4).map(|s| s * 8 + 1));
        let input = (existing, incoming);

        group.bench_with_input(BenchmarkId::new("reference", count), &input, |b, (e, i)| {
            let mut strategy = ReferenceMerge;
            b.iter(|| black_box(strategy.merge_insert(black_box(e), black_box(i))));
        });
        group.bench_with_input(BenchmarkId::new("accelerated", count), &input, |b, (e, i)| {
            let mut strategy = backend();
            b.iter(|| {
                let out = strategy.merge_insert(black_box(e), black_box(i));
                strategy.reclaim();
                black_box(out)
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_append, bench_interleaved);
criterion_main!(benches);
