#![allow(missing_docs, clippy::cast_possible_truncation)]

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use plexus::{Performance, Queue, queue, queue_with_priority};
use std::{collections::VecDeque, time::Duration};

#[derive(Debug, Clone, Copy, PartialEq, Default)]
struct SmallData {
    value: u32,
}

#[derive(Debug, Clone, PartialEq)]
struct LargeData {
    id: u64,
    data: Vec<u8>,
}

impl LargeData {
    fn new(id: u64, size: usize) -> Self {
        Self {
            id,
            data: vec![0u8; size],
        }
    }
}

/// Single push followed by a single pop - measures ns per operation
fn bench_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("latency_ns_per_op");
    group.measurement_time(Duration::from_secs(5));
    group.warm_up_time(Duration::from_secs(2));

    group.bench_function("memory_use_small", |b| {
        let mut queue = Queue::<SmallData>::new();
        b.iter(|| {
            queue.push(black_box(SmallData { value: 42 }));
            black_box(queue.pop());
        });
    });

    group.bench_function("performance_small", |b| {
        let mut queue = queue_with_priority::<SmallData, Performance>().build().unwrap();
        b.iter(|| {
            queue.push(black_box(SmallData { value: 42 }));
            black_box(queue.pop());
        });
    });

    group.bench_function("large_1kb", |b| {
        let mut queue = Queue::<LargeData>::new();
        let data = LargeData::new(1, 1024);
        b.iter(|| {
            queue.push(black_box(data.clone()));
            black_box(queue.pop());
        });
    });

    group.bench_function("vecdeque_small", |b| {
        let mut queue = VecDeque::<SmallData>::new();
        b.iter(|| {
            queue.push_back(black_box(SmallData { value: 42 }));
            black_box(queue.pop_front());
        });
    });

    group.finish();
}

/// Fill to `n` elements, then drain
fn bench_fill_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("fill_then_drain");

    for n in [1_000_usize, 100_000, 1_000_000] {
        group.throughput(Throughput::Elements(n as u64));

        group.bench_with_input(BenchmarkId::new("memory_use", n), &n, |b, &n| {
            b.iter(|| {
                let mut queue = Queue::<u64>::new();
                for i in 0..n {
                    queue.push(i as u64);
                }
                while let Some(value) = queue.pop() {
                    black_box(value);
                }
            });
        });

        group.bench_with_input(BenchmarkId::new("performance", n), &n, |b, &n| {
            b.iter(|| {
                let mut queue = queue_with_priority::<u64, Performance>().build().unwrap();
                for i in 0..n {
                    queue.push(i as u64);
                }
                while let Some(value) = queue.pop() {
                    black_box(value);
                }
            });
        });

        group.bench_with_input(BenchmarkId::new("reserved", n), &n, |b, &n| {
            b.iter(|| {
                let mut queue = queue::<u64>().reserve(n).build().unwrap();
                for i in 0..n {
                    queue.push(i as u64);
                }
                while let Some(value) = queue.pop() {
                    black_box(value);
                }
            });
        });

        group.bench_with_input(BenchmarkId::new("vecdeque", n), &n, |b, &n| {
            b.iter(|| {
                let mut queue = VecDeque::new();
                for i in 0..n {
                    queue.push_back(i as u64);
                }
                while let Some(value) = queue.pop_front() {
                    black_box(value);
                }
            });
        });
    }

    group.finish();
}

/// Steady load: a fixed backlog with one pop per push, where emptied front
/// blocks are recycled behind the back block
fn bench_churn(c: &mut Criterion) {
    let mut group = c.benchmark_group("steady_churn");
    let ops = 100_000_usize;
    group.throughput(Throughput::Elements(ops as u64));

    for backlog in [64_usize, 4_096, 65_536] {
        group.bench_with_input(BenchmarkId::new("plexus", backlog), &backlog, |b, &backlog| {
            let mut queue = Queue::<u32>::new();
            queue.extend(0..backlog as u32);
            b.iter(|| {
                for i in 0..ops {
                    queue.push(i as u32);
                    black_box(queue.pop());
                }
            });
        });

        group.bench_with_input(BenchmarkId::new("vecdeque", backlog), &backlog, |b, &backlog| {
            let mut queue: VecDeque<u32> = (0..backlog as u32).collect();
            b.iter(|| {
                for i in 0..ops {
                    queue.push_back(i as u32);
                    black_box(queue.pop_front());
                }
            });
        });
    }

    group.finish();
}

/// Iteration over a multi-block queue
fn bench_iterate(c: &mut Criterion) {
    let mut group = c.benchmark_group("iterate");
    let n = 1_000_000_u64;
    group.throughput(Throughput::Elements(n));

    let queue: Queue<u64> = (0..n).collect();
    group.bench_function("plexus", |b| {
        b.iter(|| black_box(queue.iter().sum::<u64>()));
    });

    let deque: VecDeque<u64> = (0..n).collect();
    group.bench_function("vecdeque", |b| {
        b.iter(|| black_box(deque.iter().sum::<u64>()));
    });

    group.finish();
}

/// Consolidation after a partial drain
fn bench_shrink(c: &mut Criterion) {
    let mut group = c.benchmark_group("shrink_to_fit");

    group.bench_function("plexus_large_backlog", |b| {
        b.iter_batched(
            || {
                let mut queue: Queue<LargeData> =
                    (0..10_000).map(|i| LargeData::new(i, 16)).collect();
                for _ in 0..7_500 {
                    queue.pop();
                }
                queue
            },
            |mut queue| {
                queue.shrink_to_fit();
                black_box(queue.front().map(|data| (data.id, data.data.len())));
                queue
            },
            criterion::BatchSize::SmallInput,
        );
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_latency,
    bench_fill_drain,
    bench_churn,
    bench_iterate,
    bench_shrink
);
criterion_main!(benches);
