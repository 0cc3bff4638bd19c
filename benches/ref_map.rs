//! Benchmarks for reference map and use tracker updates

use blockmeta::{BlobUseTracker, ExtentRefMap};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

/// Map with `records` alternating 1/2-ref records of 4 KiB
fn fragmented_map(records: u64) -> ExtentRefMap {
    let mut map = ExtentRefMap::new();
    map.get(0, (records * 4096) as u32);
    for i in (0..records).step_by(2) {
        map.get(i * 4096, 4096);
    }
    map
}

fn benchmark_get_put_clone(c: &mut Criterion) {
    let mut group = c.benchmark_group("ref_map_get_put");

    for records in [16u64, 256, 4096].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(records), records, |b, &records| {
            let mut map = fragmented_map(records);
            let span = (records * 4096) as u32;
            b.iter(|| {
                // clone the whole region, then drop the clone
                map.get(black_box(0), span);
                let mut release = Vec::new();
                map.put(black_box(0), span, &mut release);
                black_box(release);
            });
        });
    }

    group.finish();
}

fn benchmark_contains(c: &mut Criterion) {
    let mut group = c.benchmark_group("ref_map_contains");

    for records in [16u64, 256, 4096].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(records), records, |b, &records| {
            let map = fragmented_map(records);
            b.iter(|| black_box(map.contains(black_box(4096), (records as u32 - 2) * 4096)));
        });
    }

    group.finish();
}

fn benchmark_tracker_put(c: &mut Criterion) {
    let mut group = c.benchmark_group("use_tracker_put");

    for num_au in [4u32, 64, 1024].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(num_au), num_au, |b, &num_au| {
            let au = 0x10000;
            b.iter(|| {
                let mut tracker = BlobUseTracker::with_length(num_au * au, au);
                tracker.get(0, num_au * au);
                let mut release = Vec::new();
                // drop every other AU, then the rest
                for i in (0..num_au).step_by(2) {
                    tracker.put(i * au, au, &mut release);
                }
                for i in (1..num_au).step_by(2) {
                    tracker.put(i * au, au, &mut release);
                }
                black_box(tracker.is_empty());
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    benchmark_get_put_clone,
    benchmark_contains,
    benchmark_tracker_put
);
criterion_main!(benches);
