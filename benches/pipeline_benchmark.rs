use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use claim_engine::core::config::{EngineConfig, GpsConfig};
use claim_engine::gps::trace::TraceSummary;
use claim_engine::pipeline::engine::ProcessOptions;
use claim_engine::simulation::fleet::{generate_fleet, FleetConfig};

fn bench_trace_summary(c: &mut Criterion) {
    let fleet = generate_fleet(&FleetConfig {
        consignment_count: 1,
        seed: Some(1),
        ..Default::default()
    });
    let points = &fleet.traces[0].points;
    let config = GpsConfig::default();

    c.bench_function("trace_summary", |b| {
        b.iter(|| TraceSummary::from_points(black_box(points), &config))
    });
}

/// A fresh engine per iteration, since processing is idempotent.
fn bench_batch(c: &mut Criterion, name: &str, consignments: usize) {
    let fleet = generate_fleet(&FleetConfig {
        consignment_count: consignments,
        seed: Some(42),
        ..Default::default()
    });
    let ids = fleet.consignment_ids();

    c.bench_function(name, |b| {
        b.iter_batched(
            || fleet.builder(EngineConfig::default()).build().unwrap(),
            |engine| engine.process_batch(black_box(&ids), ProcessOptions::default()),
            BatchSize::SmallInput,
        )
    });
}

fn bench_batch_10_consignments(c: &mut Criterion) {
    bench_batch(c, "batch_10_consignments", 10);
}

fn bench_batch_100_consignments(c: &mut Criterion) {
    bench_batch(c, "batch_100_consignments", 100);
}

fn bench_batch_1000_consignments(c: &mut Criterion) {
    bench_batch(c, "batch_1000_consignments", 1000);
}

criterion_group!(
    benches,
    bench_trace_summary,
    bench_batch_10_consignments,
    bench_batch_100_consignments,
    bench_batch_1000_consignments
);
criterion_main!(benches);
