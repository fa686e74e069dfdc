//! Error kinds for the queue core (`spec.md` §7).
//!
//! `QueueEmpty` and the lock-free `Overflow` signal are deliberately *not*
//! variants here: they are not errors, they are the `None` case of
//! `Option<ConsumeResult>` / `Option<Allocation>` as the spec requires.
//! `DescriptorMismatch` is a debug assertion (an implementation bug, not a
//! reportable condition), so it never appears here either.

use core::any::Any;
use core::fmt;

/// A boxed panic payload captured from a payload constructor that unwound.
pub type PayloadPanic = Box<dyn Any + Send + 'static>;

/// Failure modes of a producer-side operation.
#[derive(Debug)]
pub enum QueueError {
    /// The page allocator, or the raw external allocator for an oversized
    /// element, could not satisfy the request. The queue is left unchanged:
    /// no control block was left dangling in the `BUSY` state.
    OutOfMemory,
    /// The user-supplied payload constructor unwound. The reserved block was
    /// cancelled (`cancel_nodestroy`) before this error was returned, so the
    /// queue is, again, left exactly as it was before the call.
    PayloadConstructionFailed(PayloadPanic),
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueError::OutOfMemory => f.write_str("paged-hqueue: allocation failed"),
            QueueError::PayloadConstructionFailed(_) => {
                f.write_str("paged-hqueue: payload constructor panicked")
            }
        }
    }
}

impl std::error::Error for QueueError {}
