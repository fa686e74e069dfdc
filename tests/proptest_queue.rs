//! Property-based invariants (`spec.md` §8, invariants 1, 2, 6, 7): model a
//! sequence of single-threaded operations and replay it against a plain
//! `VecDeque` reference model.
//!
//! Follows the "model the operations, replay against a reference, assert
//! equality" structure of
//! `examples/ryancinsight-halo/tests/bplus_tree_proptest.rs`.
#![cfg(feature = "proptest")]

use paged_hqueue::Queue;
use proptest::prelude::*;
use std::collections::VecDeque;

#[derive(Clone, Debug)]
enum Op {
    Push(u32),
    Consume,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        any::<u32>().prop_map(Op::Push),
        Just(Op::Consume),
    ]
}

proptest! {
    /// Invariant 1 (FIFO) + invariant 2 (no loss/duplicate), single producer
    /// and single consumer interleaved on one thread.
    #[test]
    fn replay_matches_reference_model(ops in prop::collection::vec(op_strategy(), 0..500)) {
        const PAGE_SIZE: usize = 4096;
        let queue: Queue<paged_hqueue::Single, paged_hqueue::Single, PAGE_SIZE> = Queue::new();
        let mut reference: VecDeque<u32> = VecDeque::new();

        for op in ops {
            match op {
                Op::Push(v) => {
                    queue.push(v).unwrap();
                    reference.push_back(v);
                }
                Op::Consume => {
                    let got = queue.try_consume_as::<u32>();
                    let expected = reference.pop_front();
                    prop_assert_eq!(got, expected);
                }
            }
        }

        while let Some(expected) = reference.pop_front() {
            prop_assert_eq!(queue.try_consume_as::<u32>(), Some(expected));
        }
        prop_assert!(queue.try_consume_as::<u32>().is_none());
    }

    /// Invariant 7: raw sub-allocations between reservation and commit never
    /// affect consume order or count.
    #[test]
    fn raw_sub_allocations_never_change_order(values in prop::collection::vec(any::<u32>(), 0..200), k in 0usize..8) {
        let queue: Queue = Queue::new();
        for &v in &values {
            let mut txn = queue.start_push::<u32>().unwrap();
            for i in 0..k {
                txn.raw_allocate_copy(&[i as u8]).unwrap();
            }
            txn.write(v);
        }

        let mut consumed = Vec::with_capacity(values.len());
        while let Some(v) = queue.try_consume_as::<u32>() {
            consumed.push(v);
        }
        prop_assert_eq!(consumed, values);
    }
}
