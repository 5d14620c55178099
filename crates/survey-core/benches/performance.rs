//! Performance benchmarks for survey-core
//!
//! Run with: cargo bench --package survey-core

use chrono::{DateTime, TimeDelta, Utc};
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;
use survey_core::{
    EventMatcher, GpsPoint, GpsTrajectory, LaneCode, LanePeriodManager, SpanRecord,
    ViewportMapper,
};

fn ts(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
}

/// Generate a realistic 1 Hz trajectory, inserted slightly out of order
fn generate_trajectory(num_points: usize) -> GpsTrajectory {
    let mut trajectory = GpsTrajectory::new();
    for i in 0..num_points {
        // Swap neighbour pairs every 7 points to exercise the sort
        let j = match i % 7 {
            0 if i + 1 < num_points => i + 1,
            1 => i - 1,
            _ => i,
        };
        let t = j as f64 / num_points as f64;
        let lat = 51.5 + t * 0.1 + (t * 50.0).sin() * 0.001;
        let lon = -0.1 + t * 0.1 + (t * 30.0).cos() * 0.001;
        trajectory.add_point(GpsPoint::new(ts(j as i64), lat, lon, j as f64 * 12.5));
    }
    trajectory
}

/// Interleaved span records over a handful of event types
fn generate_spans(num_events: usize) -> Vec<SpanRecord> {
    const NAMES: [&str; 4] = ["Bridge", "Pavers", "Road Works", "Speed Hump"];
    let mut records = Vec::with_capacity(num_events * 2);
    for i in 0..num_events {
        let name = NAMES[i % NAMES.len()];
        let start = i as i64 * 30;
        records.push(SpanRecord::start(ts(start), start as f64 * 12.5, name));
        if i % 50 != 0 {
            records.push(SpanRecord::end(ts(start + 20), (start + 20) as f64 * 12.5, name));
        }
    }
    records.sort_by_key(|r| r.timestamp);
    records
}

// ============================================================================
// Core Benchmarks - Key performance indicators
// ============================================================================

fn bench_trajectory(c: &mut Criterion) {
    let mut group = c.benchmark_group("trajectory");

    for size in [10_000usize, 100_000] {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("build_index", size), &size, |b, &size| {
            b.iter_batched(
                || generate_trajectory(size),
                |mut trajectory| trajectory.build_index(),
                criterion::BatchSize::LargeInput,
            );
        });
    }

    let mut trajectory = generate_trajectory(100_000);
    trajectory.build_index();
    group.throughput(Throughput::Elements(1_000));
    group.bench_function("interpolate_1k_queries_100k", |b| {
        b.iter(|| {
            for i in 0..1_000i64 {
                black_box(trajectory.interpolate_position(ts(i * 97) + TimeDelta::milliseconds(500)));
            }
        });
    });

    group.finish();
}

fn bench_matching(c: &mut Criterion) {
    let mut group = c.benchmark_group("matching");
    group.sample_size(20);

    let mut trajectory = generate_trajectory(100_000);
    trajectory.build_index();
    let records = generate_spans(2_000);
    let matcher = EventMatcher::new();

    group.throughput(Throughput::Elements(records.len() as u64));
    group.bench_function("match_2k_events", |b| {
        b.iter(|| matcher.match_spans(&records, None));
    });
    group.bench_function("match_2k_events_enriched", |b| {
        b.iter(|| matcher.match_spans(&records, Some(&trajectory)));
    });

    group.finish();
}

fn bench_lanes(c: &mut Criterion) {
    let mut group = c.benchmark_group("lanes");
    let codes: Vec<LaneCode> = ["1", "2", "3", "SK", "-1"]
        .iter()
        .filter_map(|raw| raw.parse().ok())
        .collect();

    group.bench_function("assign_10k", |b| {
        b.iter(|| {
            let mut manager = LanePeriodManager::new("BENCH", "bench-file");
            for i in 0..10_000i64 {
                let code = codes[(i as usize / 3) % codes.len()];
                let _ = manager.assign_lane(code, ts(i * 5));
            }
            manager
        });
    });

    let mut manager = LanePeriodManager::new("BENCH", "bench-file");
    for i in 0..10_000i64 {
        let _ = manager.assign_lane(codes[i as usize % codes.len()], ts(i * 5));
    }
    manager.set_scope_end(ts(60_000));
    group.bench_function("change_lane_smart_10k_periods", |b| {
        b.iter_batched(
            || manager.clone(),
            |mut manager| manager.change_lane_smart(codes[0], ts(25_002), ts(25_004)),
            criterion::BatchSize::LargeInput,
        );
    });

    group.finish();
}

fn bench_viewport(c: &mut Criterion) {
    let mut group = c.benchmark_group("viewport");

    let mut trajectory = generate_trajectory(100_000);
    trajectory.build_index();
    let events = EventMatcher::new().match_spans(&generate_spans(2_000), None);
    let mut viewport = ViewportMapper::new(ts(0), ts(100_000), 1920.0, 1.0).unwrap();
    viewport.zoom(20.0, ts(50_000));

    group.bench_function("visible_events_2k", |b| {
        b.iter(|| viewport.visible_events(&events).len());
    });
    group.bench_function("bucket_counts_2k", |b| {
        b.iter(|| viewport.bucket_counts(&events, 96));
    });
    group.bench_function("chainage_scale_100k", |b| {
        b.iter(|| viewport.chainage_scale(&trajectory, 16));
    });

    group.finish();
}

// ============================================================================
// Criterion Configuration
// ============================================================================

criterion_group!(
    benches,
    bench_trajectory,
    bench_matching,
    bench_lanes,
    bench_viewport,
);

criterion_main!(benches);
