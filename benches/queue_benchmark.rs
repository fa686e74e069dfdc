use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use paged_hqueue::{Multi, Queue, Single};
use std::sync::Arc;
use std::thread;

fn spsc_push_pop(c: &mut Criterion) {
    let mut group = c.benchmark_group("SPSC push/pop");

    group.bench_function("single thread, push then pop u64", |b| {
        let queue: Queue<Single, Single> = Queue::new();
        b.iter(|| {
            queue.push(black_box(42u64)).unwrap();
            black_box(queue.try_consume_as::<u64>().unwrap());
        });
    });

    group.bench_function("two threads, producer/consumer handoff", |b| {
        b.iter_batched(
            || Arc::new(Queue::<Single, Single>::new()),
            |queue| {
                const N: u64 = 1_000;
                thread::scope(|scope| {
                    let producer_queue = queue.clone();
                    scope.spawn(move || {
                        for i in 0..N {
                            while producer_queue.push(i).is_err() {
                                thread::yield_now();
                            }
                        }
                    });
                    let mut consumed = 0u64;
                    while consumed < N {
                        if queue.try_consume_as::<u64>().is_some() {
                            consumed += 1;
                        } else {
                            thread::yield_now();
                        }
                    }
                });
            },
            BatchSize::SmallInput,
        );
    });

    group.finish();
}

fn mpmc_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("MPMC throughput");

    for producers in [1usize, 4, 8] {
        group.bench_function(format!("{producers} producers, 1 consumer"), |b| {
            b.iter_batched(
                || Arc::new(Queue::<Multi, Multi>::new()),
                |queue| {
                    const PER_PRODUCER: u64 = 2_000;
                    thread::scope(|scope| {
                        for _ in 0..producers {
                            let queue = queue.clone();
                            scope.spawn(move || {
                                for i in 0..PER_PRODUCER {
                                    while queue.push(i).is_err() {
                                        thread::yield_now();
                                    }
                                }
                            });
                        }
                        let mut consumed = 0u64;
                        let target = producers as u64 * PER_PRODUCER;
                        while consumed < target {
                            if queue.try_consume_as::<u64>().is_some() {
                                consumed += 1;
                            } else {
                                thread::yield_now();
                            }
                        }
                    });
                },
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

criterion_group!(benches, spsc_push_pop, mpmc_throughput);
criterion_main!(benches);
