//! Benchmarks for measurement formulas and frame handling
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use touch_rig::config::NodeCounts;
use touch_rig::measurement::{accuracy, jitter, linearity, snr};
use touch_rig::sensor::frame::decode_delta;
use touch_rig::sensor::{NeighborhoodRead, ObpRequest, PageMap};
use touch_rig::types::{Line, NodeAddress, NodeDelta, Point};

/// Samples scattered a little around a horizontal line at y = 30
fn traced_samples(count: usize) -> Vec<Point> {
    (0..count)
        .map(|i| {
            let wobble = ((i * 7919) % 17) as f64 / 100.0 - 0.08;
            Point::new(20.0 + i as f64 * 120.0 / count as f64, 30.0 + wobble)
        })
        .collect()
}

fn bench_point_measurements(c: &mut Criterion) {
    let mut group = c.benchmark_group("point_measurements");
    let target = Point::new(52.0, 79.0);

    for size in [10, 100, 1000].iter() {
        let samples: Vec<Point> = traced_samples(*size)
            .into_iter()
            .map(|p| Point::new(target.x + p.y - 30.0, target.y - p.y + 30.0))
            .collect();
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::new("accuracy", size), &samples, |b, samples| {
            b.iter(|| accuracy(black_box(target), black_box(samples)));
        });
        group.bench_with_input(BenchmarkId::new("jitter", size), &samples, |b, samples| {
            b.iter(|| jitter(black_box(target), black_box(samples)));
        });
    }

    group.finish();
}

fn bench_linearity(c: &mut Criterion) {
    let mut group = c.benchmark_group("linearity");
    let lines = [
        ("horizontal", Line::new(Point::new(20.0, 30.0), Point::new(140.0, 30.0))),
        ("diagonal", Line::new(Point::new(20.0, 10.0), Point::new(140.0, 50.0))),
    ];

    for size in [100, 1000, 10_000].iter() {
        let samples = traced_samples(*size);
        group.throughput(Throughput::Elements(*size as u64));
        for (name, line) in &lines {
            group.bench_with_input(BenchmarkId::new(*name, size), &samples, |b, samples| {
                b.iter(|| linearity(black_box(*line), black_box(samples), 50.0));
            });
        }
    }

    group.finish();
}

fn bench_snr(c: &mut Criterion) {
    let mut group = c.benchmark_group("snr");
    let center = NodeAddress::new(16, 10);

    for iterations in [16, 64, 256].iter() {
        let nodes: Vec<NodeAddress> = (9..=11)
            .flat_map(|y| (15..=17).map(move |x| NodeAddress::new(x, y)))
            .collect();
        let series = |base: i16| -> Vec<Vec<NodeDelta>> {
            nodes
                .iter()
                .enumerate()
                .map(|(n, _)| {
                    (0..*iterations)
                        .map(|i| NodeDelta(base + ((i * 31 + n * 7) % 9) as i16 - 4))
                        .collect()
                })
                .collect()
        };
        let idle = NeighborhoodRead {
            nodes: nodes.clone(),
            deltas: series(0),
        };
        let touching = NeighborhoodRead {
            nodes: nodes.clone(),
            deltas: series(400),
        };
        group.bench_with_input(
            BenchmarkId::new("coarse", iterations),
            &(idle, touching),
            |b, (idle, touching)| {
                b.iter(|| snr(Point::new(81.0, 52.0), center, black_box(idle), black_box(touching)));
            },
        );
    }

    group.finish();
}

fn bench_frames(c: &mut Criterion) {
    let mut group = c.benchmark_group("frames");

    group.bench_function("encode_read", |b| {
        let request = ObpRequest::read(0x0189, 0x0A);
        b.iter(|| black_box(&request).encode(0x06));
    });

    group.bench_function("page_location", |b| {
        let map = PageMap::new(NodeCounts::new(32, 20), 128);
        b.iter(|| {
            for x in 0..32 {
                for y in 0..20 {
                    black_box(map.location(NodeAddress::new(x, y)));
                }
            }
        });
    });

    group.bench_function("decode_delta", |b| {
        let page: Vec<u8> = (0..128u8).collect();
        b.iter(|| {
            page.chunks_exact(2)
                .map(|pair| decode_delta(pair[0], pair[1]).value() as i32)
                .sum::<i32>()
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_point_measurements,
    bench_linearity,
    bench_snr,
    bench_frames,
);
criterion_main!(benches);
