//! The `relaxed` / `sequential` consistency switch (`spec.md` §5, §6).
//!
//! Every atomic operation inside `ctrl`, `page`, `queue::tail`, and
//! `queue::head` is routed through [`Consistency::load`], [`Consistency::store`],
//! and [`Consistency::cas_orderings`] rather than calling
//! `core::sync::atomic::Ordering` directly, so a single runtime switch can
//! strengthen a queue to `seq_cst` for callers that need a global order across
//! multiple independent queues.

use core::sync::atomic::Ordering;

/// Selects the memory ordering used by a [`crate::Queue`]'s atomic operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Consistency {
    /// Acquire/release on the hot path (the default; sufficient for
    /// correctness of a single queue).
    #[default]
    Relaxed,
    /// Every atomic operation is `SeqCst`, establishing a total order
    /// observable across multiple queues.
    Sequential,
}

impl Consistency {
    /// The ordering to use for a load of `next` / `tail` / `head`.
    #[inline(always)]
    pub const fn load_order(self) -> Ordering {
        match self {
            Consistency::Relaxed => Ordering::Acquire,
            Consistency::Sequential => Ordering::SeqCst,
        }
    }

    /// The ordering to use for a store.
    #[inline(always)]
    pub const fn store_order(self) -> Ordering {
        match self {
            Consistency::Relaxed => Ordering::Release,
            Consistency::Sequential => Ordering::SeqCst,
        }
    }

    /// The `(success, failure)` ordering pair for a compare-exchange.
    #[inline(always)]
    pub const fn cas_orderings(self) -> (Ordering, Ordering) {
        match self {
            Consistency::Relaxed => (Ordering::AcqRel, Ordering::Acquire),
            Consistency::Sequential => (Ordering::SeqCst, Ordering::SeqCst),
        }
    }
}
