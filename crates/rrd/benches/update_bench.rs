//! Benchmarks for the update engine.
//!
//! Run with: cargo bench --package alopex-rrd
//!
//! ## Benchmark Categories
//!
//! - **In-memory updates**: Sample application without I/O
//! - **Holt-Winters**: Forecasting archive overhead
//! - **File updates**: Full lock, decode, write-back transaction
//! - **Decode**: File parsing

use alopex_rrd::fetch::open_for_read;
use alopex_rrd::{CreateConfig, Creator, Rrd, Sample, SyncMode, UpdateConfig, Updater};
use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use tempfile::TempDir;

const START: i64 = 1_000_000_200;

fn creator(defs: &[&str]) -> Creator {
    let mut creator = Creator::new(300)
        .start(START)
        .config(CreateConfig::default().with_sync_mode(SyncMode::None));
    for def in defs {
        creator = creator.definition(def).unwrap();
    }
    creator
}

const BASIC_DEFS: [&str; 6] = [
    "DS:in:COUNTER:600:0:U",
    "DS:out:COUNTER:600:0:U",
    "RRA:AVERAGE:0.5:1:2016",
    "RRA:AVERAGE:0.5:6:1344",
    "RRA:MAX:0.5:24:732",
    "RRA:MIN:0.5:288:797",
];

const HW_DEFS: [&str; 3] = [
    "DS:load:GAUGE:600:0:U",
    "RRA:AVERAGE:0.5:1:2016",
    "RRA:HWPREDICT:2016:0.1:0.0035:288",
];

/// One sample per step with slowly increasing counters.
fn counter_samples(count: usize) -> Vec<Sample> {
    (1..=count as i64)
        .map(|k| Sample::at(START + k * 300, [k * 30_000, k * 12_000]))
        .collect()
}

fn gauge_samples(count: usize) -> Vec<Sample> {
    (1..=count as i64)
        .map(|k| {
            let value = 1.0 + (k as f64 * 0.02).sin();
            Sample::at(START + k * 300, [value])
        })
        .collect()
}

fn bench_apply_basic(c: &mut Criterion) {
    let rrd = creator(&BASIC_DEFS).build().unwrap();
    let mut group = c.benchmark_group("apply_basic");
    for count in [1usize, 100, 1000] {
        let samples = counter_samples(count);
        group.bench_with_input(BenchmarkId::from_parameter(count), &samples, |b, samples| {
            b.iter_batched(
                || rrd.clone(),
                |mut rrd: Rrd| {
                    Updater::default()
                        .apply(&mut rrd, None, black_box(samples))
                        .unwrap()
                },
                BatchSize::SmallInput,
            )
        });
    }
    group.finish();
}

fn bench_apply_holt_winters(c: &mut Criterion) {
    let rrd = creator(&HW_DEFS).build().unwrap();
    let samples = gauge_samples(1000);
    c.bench_function("apply_holt_winters_1k", |b| {
        b.iter_batched(
            || rrd.clone(),
            |mut rrd: Rrd| {
                Updater::default()
                    .apply(&mut rrd, None, black_box(&samples))
                    .unwrap()
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_file_update(c: &mut Criterion) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("bench.rrd");
    creator(&BASIC_DEFS).create(&path).unwrap();
    let updater = Updater::new(UpdateConfig::default().with_sync_mode(SyncMode::None));

    let mut k = 0i64;
    c.bench_function("file_update_single_sample", |b| {
        b.iter(|| {
            k += 1;
            let sample = Sample::at(START + k * 300, [k * 30_000, k * 12_000]);
            updater.run(&path, None, &[sample]).unwrap()
        })
    });
}

fn bench_decode(c: &mut Criterion) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("decode.rrd");
    creator(&BASIC_DEFS).create(&path).unwrap();

    c.bench_function("decode_file", |b| {
        b.iter(|| black_box(open_for_read(&path).unwrap()))
    });
}

criterion_group!(
    benches,
    bench_apply_basic,
    bench_apply_holt_winters,
    bench_file_update,
    bench_decode
);
criterion_main!(benches);
