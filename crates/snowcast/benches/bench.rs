use core::hint::black_box;
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use snowcast::{
    BitLayout, InMemoryLeaseStore, LeaseTable, LesseeId, MonotonicClock, SequencerDefinition,
    Snowcast, SnowcastEpoch, SnowcastSequencer, TimeSource,
};
use std::{
    sync::{Arc, Barrier},
    thread::scope,
    time::Instant,
};

// Number of IDs generated per benchmark iteration (per-thread for
// multi-threaded).
const TOTAL_IDS: usize = 4096;

fn sequencer<T>(time: T) -> SnowcastSequencer<T>
where
    T: TimeSource + Clone + Send + Sync + 'static,
{
    let table = LeaseTable::new(Arc::new(InMemoryLeaseStore::new(1)));
    let snowcast = Snowcast::new(table, time);
    snowcast
        .create_sequencer_with("bench", SnowcastEpoch::DEFAULT, 1024)
        .unwrap()
}

fn bench_layout(c: &mut Criterion) {
    let mut group = c.benchmark_group("layout");
    group.throughput(Throughput::Elements(TOTAL_IDS as u64));

    let layout = BitLayout::new(8192).unwrap();
    group.bench_function(format!("encode_decode/elems/{TOTAL_IDS}"), |b| {
        b.iter(|| {
            for i in 0..TOTAL_IDS as u64 {
                let id = layout.encode(black_box(i), black_box(5), black_box(i & 511));
                black_box(layout.decode(id));
            }
        });
    });

    group.finish();
}

/// Single handle, single thread, spinning on counter exhaustion.
fn bench_sequential(c: &mut Criterion) {
    let mut group = c.benchmark_group("mono/sequential");
    group.throughput(Throughput::Elements(TOTAL_IDS as u64));

    let clock = MonotonicClock::default();
    group.bench_function(format!("elems/{TOTAL_IDS}"), |b| {
        b.iter_custom(|iters| {
            let start = Instant::now();
            for _ in 0..iters {
                let sequencer = sequencer(clock.clone());
                for _ in 0..TOTAL_IDS {
                    black_box(sequencer.next_id().unwrap());
                }
            }
            start.elapsed()
        });
    });

    group.finish();
}

/// One handle shared across threads; contention on the state word.
fn bench_contended(c: &mut Criterion) {
    let mut group = c.benchmark_group("mono/contended");
    let clock = MonotonicClock::default();

    for thread_count in [1, 2, 4, 8] {
        let ids_per_thread = TOTAL_IDS / thread_count;
        group.throughput(Throughput::Elements(TOTAL_IDS as u64));
        group.bench_function(
            format!("elems/{TOTAL_IDS}/threads/{thread_count}"),
            |b| {
                b.iter_custom(|iters| {
                    let start = Instant::now();
                    for _ in 0..iters {
                        let sequencer = sequencer(clock.clone());
                        let barrier = Arc::new(Barrier::new(thread_count + 1));
                        scope(|s| {
                            for _ in 0..thread_count {
                                let sequencer = sequencer.clone();
                                let barrier = Arc::clone(&barrier);
                                s.spawn(move || {
                                    barrier.wait();
                                    for _ in 0..ids_per_thread {
                                        black_box(sequencer.next_id().unwrap());
                                    }
                                });
                            }
                            barrier.wait();
                        });
                    }
                    start.elapsed()
                });
            },
        );
    }

    group.finish();
}

/// Attach then release through the in-memory store.
fn bench_lease_churn(c: &mut Criterion) {
    let mut group = c.benchmark_group("lease");
    group.throughput(Throughput::Elements(1));

    let table = LeaseTable::new(Arc::new(InMemoryLeaseStore::new(1)));
    let definition =
        SequencerDefinition::new("bench", SnowcastEpoch::DEFAULT, 8192, 1).unwrap();
    // Half full, so the first-fit scan has work to do.
    for _ in 0..4096 {
        table.attach(&definition, LesseeId::new(0)).unwrap();
    }

    let lessee = LesseeId::new(1);
    group.bench_function("attach_release", |b| {
        b.iter(|| {
            let (_, id) = table.attach(&definition, lessee).unwrap();
            black_box(table.release("bench", id, lessee).unwrap());
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_layout,
    bench_sequential,
    bench_contended,
    bench_lease_churn,
);
criterion_main!(benches);
