//! Multi-producer / multi-consumer scenarios (`spec.md` §8, scenarios 4, 5).
//!
//! Uses `std::thread::scope`, following
//! `examples/ryancinsight-halo/tests/concurrent_slab_test.rs`'s idiom.

use paged_hqueue::{Multi, Queue};
use std::collections::HashMap;
use std::sync::Mutex;

#[test]
fn multi_producer_fifo_per_thread() {
    const PRODUCERS: usize = 4;
    const PER_PRODUCER: u32 = 10_000;

    let queue: Queue<Multi, Multi> = Queue::new();
    let consumed: Mutex<Vec<(u32, u32)>> = Mutex::new(Vec::with_capacity(PRODUCERS * PER_PRODUCER as usize));

    std::thread::scope(|scope| {
        for tid in 0..PRODUCERS as u32 {
            let queue = &queue;
            scope.spawn(move || {
                for i in 0..PER_PRODUCER {
                    while queue.push((tid, i)).is_err() {
                        std::thread::yield_now();
                    }
                }
            });
        }

        let consumed = &consumed;
        let queue = &queue;
        scope.spawn(move || {
            let mut remaining = PRODUCERS * PER_PRODUCER as usize;
            while remaining > 0 {
                if let Some(pair) = queue.try_consume_as::<(u32, u32)>() {
                    consumed.lock().unwrap().push(pair);
                    remaining -= 1;
                } else {
                    std::thread::yield_now();
                }
            }
        });
    });

    let consumed = consumed.into_inner().unwrap();
    let mut last_seen: HashMap<u32, i64> = HashMap::new();
    for (tid, i) in consumed {
        let last = last_seen.entry(tid).or_insert(-1);
        assert!(i as i64 > *last, "producer {tid} out of order: {i} after {last}");
        *last = i as i64;
    }
    for tid in 0..PRODUCERS as u32 {
        assert_eq!(last_seen[&tid], (PER_PRODUCER - 1) as i64);
    }
}

#[test]
fn multi_producer_multi_consumer_completeness() {
    const PRODUCERS: usize = 8;
    const CONSUMERS: usize = 8;
    const PER_PRODUCER: u64 = 12_500; // 8 * 12_500 = 100_000

    let queue: Queue<Multi, Multi> = Queue::new();
    let total: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);
    let consumed_count: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);

    std::thread::scope(|scope| {
        for tid in 0..PRODUCERS as u64 {
            let queue = &queue;
            scope.spawn(move || {
                for i in 0..PER_PRODUCER {
                    let value = tid * PER_PRODUCER + i;
                    while queue.push(value).is_err() {
                        std::thread::yield_now();
                    }
                }
            });
        }

        for _ in 0..CONSUMERS {
            let queue = &queue;
            let total = &total;
            let consumed_count = &consumed_count;
            scope.spawn(move || {
                while consumed_count.load(std::sync::atomic::Ordering::Relaxed)
                    < (PRODUCERS as u64 * PER_PRODUCER)
                {
                    if let Some(value) = queue.try_consume_as::<u64>() {
                        total.fetch_add(value, std::sync::atomic::Ordering::Relaxed);
                        consumed_count.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    } else {
                        std::thread::yield_now();
                    }
                }
            });
        }
    });

    let n = PRODUCERS as u64 * PER_PRODUCER;
    assert_eq!(total.load(std::sync::atomic::Ordering::Relaxed), n * (n - 1) / 2);
}
