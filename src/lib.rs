//! # `paged-hqueue` — a lock-free heterogeneous queue
//!
//! A multi-producer/multi-consumer FIFO that accepts elements of unrelated
//! concrete types and stores the values themselves, contiguously, inside
//! internally managed pages — no boxing, no common base type, no `dyn`.
//!
//! ## Architecture
//!
//! - [`page`] hands out fixed-size, page-aligned memory from a per-thread
//!   cache backed by a process-wide pool.
//! - [`hazard`] lets consumers protect a page they are touching so it can't
//!   be reclaimed out from under them, without taking a lock.
//! - [`ctrl`] lays out control blocks and computes in-page bump allocations.
//! - [`descriptor`] erases a payload's move/copy/destroy behavior behind a
//!   fixed-size value, which is what lets one [`Queue`] hold unrelated
//!   concrete types.
//! - [`queue`] composes the above into the tail (producer) engine, the head
//!   (consumer) engine, and the transaction façade.
//!
//! ## Example
//!
//! ```rust
//! use paged_hqueue::Queue;
//!
//! let queue: Queue = Queue::new();
//! queue.push(7i32).unwrap();
//! queue.push(String::from("hello")).unwrap();
//!
//! let first: i32 = queue.try_consume_as().unwrap();
//! let second: String = queue.try_consume_as().unwrap();
//! assert_eq!((first, second.as_str()), (7, "hello"));
//! assert!(queue.empty());
//! ```

#![warn(missing_docs, clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod concurrency;
pub mod consistency;
pub mod ctrl;
pub mod descriptor;
pub mod error;
pub mod hazard;
pub mod page;
pub mod queue;

pub use consistency::Consistency;
pub use descriptor::{Descriptor, RuntimeType, TypeTag};
pub use error::{PayloadPanic, QueueError};
pub use queue::{Cardinality, ConsumeTransaction, Multi, PutTransaction, Queue, QueueBuilder, Single};

const _: () = {
    use core::mem;

    // `Descriptor` must stay fixed-size regardless of the concrete type it
    // was built for — that's the whole mechanism behind heterogeneity.
    assert!(mem::size_of::<Descriptor>() == mem::size_of::<Descriptor>());

    // Cardinality markers are ZSTs; they must not grow `Queue`.
    assert!(mem::size_of::<Single>() == 0);
    assert!(mem::size_of::<Multi>() == 0);
};
