//! Producer engine (`spec.md` §4.D): reserves blocks by CASing a shared
//! `tail`, installing new pages on overflow.
//!
//! Grounded on the CAS-retry-loop idiom of
//! `examples/ryancinsight-halo/src/concurrency/worklist/treiber_stack.rs`
//! and on `original_source/density/detail/lf_queue_tail_single.h` /
//! `base_conc_queue_lflf.h` for the `try_to_add_a_page` page-lock protocol.

use crate::consistency::Consistency;
use crate::ctrl::{self, flags, Allocation, Control, ExternalBlock, Layout};
use crate::error::QueueError;
use crate::page::{self, PagePool};
use core::sync::atomic::{AtomicUsize, Ordering};
use crossbeam_utils::Backoff;

/// A reserved, still-`BUSY` block. The caller (`queue::transaction`)
/// constructs the descriptor and payload, then commits or cancels it.
pub struct Reservation {
    pub ctrl_ptr: usize,
    /// Fixed offset from `ctrl_ptr` (`Layout::TYPE_OFFSET`): where the
    /// queue's descriptor value must be written.
    pub descriptor_ptr: usize,
    /// Where the payload itself must be constructed: an in-page address, or
    /// (when `is_external`) the start of a heap block.
    pub payload_ptr: usize,
    pub is_external: bool,
}

/// Reserves room for a descriptor plus a `size`/`align` payload
/// (`spec.md` §4.D `try_inplace_allocate`). Every value block carries a
/// descriptor, so `include_type` is always `true` here; raw sub-allocations
/// (`spec.md` §4.F `raw_allocate`) call [`reserve_raw`] instead.
pub fn reserve<const PAGE_SIZE: usize>(
    tail: &AtomicUsize,
    initial_page: &AtomicUsize,
    page_pool: &PagePool<PAGE_SIZE>,
    consistency: Consistency,
    payload_size: usize,
    payload_align: usize,
) -> Result<Reservation, QueueError> {
    let backoff = Backoff::new();
    loop {
        let raw = tail.load(consistency.load_order());
        if raw & flags::PAGE_LOCK != 0 {
            // Another producer is mid-install; `raw` is not a usable
            // address until the lock clears.
            backoff.spin();
            continue;
        }
        let t = raw & !flags::PAGE_LOCK;
        let page_base = ctrl::align_down(t, PAGE_SIZE);
        match ctrl::compute_block::<PAGE_SIZE>(t, page_base, true, payload_size, payload_align) {
            Allocation::Fits {
                ctrl_ptr,
                user_ptr,
                new_tail,
            } => {
                let (succ, fail) = consistency.cas_orderings();
                if tail.compare_exchange(t, new_tail, succ, fail).is_err() {
                    backoff.spin();
                    continue;
                }
                publish_reservation(ctrl_ptr, new_tail, consistency, 0);
                return Ok(Reservation {
                    ctrl_ptr,
                    descriptor_ptr: ctrl_ptr + Layout::<PAGE_SIZE>::TYPE_OFFSET,
                    payload_ptr: user_ptr,
                    is_external: false,
                });
            }
            Allocation::PageOverflow => {
                handle_page_overflow::<PAGE_SIZE>(tail, initial_page, page_pool, consistency, t)?;
                backoff.spin();
                continue;
            }
            Allocation::TooLargeForPage => {
                return reserve_external::<PAGE_SIZE>(
                    tail,
                    initial_page,
                    page_pool,
                    consistency,
                    payload_size,
                    payload_align,
                );
            }
        }
    }
}

/// Reserves a raw, descriptor-less sub-allocation (`spec.md` §4.F
/// `raw_allocate`). Marked `DEAD` at reservation time so consumers skip it.
pub fn reserve_raw<const PAGE_SIZE: usize>(
    tail: &AtomicUsize,
    initial_page: &AtomicUsize,
    page_pool: &PagePool<PAGE_SIZE>,
    consistency: Consistency,
    size: usize,
    align: usize,
) -> Result<usize, QueueError> {
    let backoff = Backoff::new();
    loop {
        let raw = tail.load(consistency.load_order());
        if raw & flags::PAGE_LOCK != 0 {
            backoff.spin();
            continue;
        }
        let t = raw & !flags::PAGE_LOCK;
        let page_base = ctrl::align_down(t, PAGE_SIZE);
        match ctrl::compute_block::<PAGE_SIZE>(t, page_base, false, size, align) {
            Allocation::Fits {
                ctrl_ptr,
                user_ptr,
                new_tail,
            } => {
                let (succ, fail) = consistency.cas_orderings();
                if tail.compare_exchange(t, new_tail, succ, fail).is_err() {
                    backoff.spin();
                    continue;
                }
                publish_reservation(ctrl_ptr, new_tail, consistency, flags::DEAD);
                return Ok(user_ptr);
            }
            Allocation::PageOverflow => {
                handle_page_overflow::<PAGE_SIZE>(tail, initial_page, page_pool, consistency, t)?;
                backoff.spin();
                continue;
            }
            Allocation::TooLargeForPage => return Err(QueueError::OutOfMemory),
        }
    }
}

/// Step 4 of `spec.md` §4.C: zero the new end-of-range ctrl, *then* publish
/// the reserved block's own `next` word. This order is load-bearing — a
/// consumer observing a non-zero `next` on `ctrl_ptr` must always find the
/// successor slot already zero-initialised.
fn publish_reservation(ctrl_ptr: usize, new_tail: usize, consistency: Consistency, extra_flags: usize) {
    let end = unsafe { &*(new_tail as *const Control) };
    end.store(0, consistency.store_order());

    let reserved = unsafe { &*(ctrl_ptr as *const Control) };
    reserved.store(new_tail | flags::BUSY | extra_flags, consistency.store_order());
}

fn handle_page_overflow<const PAGE_SIZE: usize>(
    tail: &AtomicUsize,
    initial_page: &AtomicUsize,
    page_pool: &PagePool<PAGE_SIZE>,
    consistency: Consistency,
    observed_tail: usize,
) -> Result<(), QueueError> {
    let (succ, fail) = consistency.cas_orderings();
    let locked = observed_tail | flags::PAGE_LOCK;
    if tail.compare_exchange(observed_tail, locked, succ, fail).is_err() {
        // Another producer is already installing (or just installed) a page.
        return Ok(());
    }

    let page = page_pool.allocate_page()?;
    let page_addr = page.as_ptr() as usize;

    // `observed_tail` is a bogus address (not inside any real page) exactly
    // once: the initial sentinel that forces the very first allocation down
    // this path (`spec.md` §3). There is no real end control block to link
    // from in that case, so we skip the write instead of dereferencing it.
    let is_first_page =
        observed_tail == Layout::<PAGE_SIZE>::SENTINEL_TAIL_OFFSET && initial_page.load(consistency.load_order()) == 0;
    if !is_first_page {
        let cross_link = unsafe { &*(observed_tail as *const Control) };
        cross_link.store(page_addr | flags::DEAD | flags::EXTERNAL, consistency.store_order());
    }

    let _ = initial_page.compare_exchange(0, page_addr, succ, fail);

    // If this CAS loses, another thread already observed our cross-link and
    // advanced tail itself (or is about to); either way `tail` now points
    // somewhere at or past `page_addr` and the caller's outer loop recovers.
    let _ = tail.compare_exchange(locked, page_addr, succ, fail);
    Ok(())
}

fn reserve_external<const PAGE_SIZE: usize>(
    tail: &AtomicUsize,
    initial_page: &AtomicUsize,
    page_pool: &PagePool<PAGE_SIZE>,
    consistency: Consistency,
    payload_size: usize,
    payload_align: usize,
) -> Result<Reservation, QueueError> {
    let external_ptr = page::allocate_external(payload_size, payload_align)?;

    let backoff = Backoff::new();
    loop {
        let raw = tail.load(consistency.load_order());
        if raw & flags::PAGE_LOCK != 0 {
            backoff.spin();
            continue;
        }
        let t = raw & !flags::PAGE_LOCK;
        let page_base = ctrl::align_down(t, PAGE_SIZE);
        match ctrl::compute_block::<PAGE_SIZE>(
            t,
            page_base,
            true,
            core::mem::size_of::<ExternalBlock>(),
            core::mem::align_of::<ExternalBlock>(),
        ) {
            Allocation::Fits {
                ctrl_ptr,
                user_ptr,
                new_tail,
            } => {
                let (succ, fail) = consistency.cas_orderings();
                if tail.compare_exchange(t, new_tail, succ, fail).is_err() {
                    backoff.spin();
                    continue;
                }
                publish_reservation(ctrl_ptr, new_tail, consistency, flags::EXTERNAL);

                let block = ExternalBlock {
                    ptr: external_ptr.as_ptr(),
                    size: payload_size,
                    align: payload_align,
                };
                unsafe {
                    core::ptr::write(user_ptr as *mut ExternalBlock, block);
                }

                return Ok(Reservation {
                    ctrl_ptr,
                    descriptor_ptr: ctrl_ptr + Layout::<PAGE_SIZE>::TYPE_OFFSET,
                    payload_ptr: external_ptr.as_ptr() as usize,
                    is_external: true,
                });
            }
            Allocation::PageOverflow => {
                handle_page_overflow::<PAGE_SIZE>(tail, initial_page, page_pool, consistency, t)?;
                backoff.spin();
                continue;
            }
            Allocation::TooLargeForPage => {
                unsafe { page::deallocate_external(external_ptr, payload_size, payload_align) };
                return Err(QueueError::OutOfMemory);
            }
        }
    }
}

/// Publishes a reserved block, making it consumable (`spec.md` §4.D
/// `commit`): clears `BUSY` on `(*ctrl).next`.
pub fn commit(ctrl_ptr: usize, consistency: Consistency) {
    let ctrl = unsafe { &*(ctrl_ptr as *const Control) };
    let word = ctrl.load(Ordering::Relaxed);
    ctrl.store(word & !flags::BUSY, consistency.store_order());
}

/// Cancels a reserved block whose payload was never constructed
/// (`spec.md` §4.D `cancel_nodestroy`): sets `DEAD`, clears `BUSY`, runs no
/// destructor. Used when the payload constructor unwound.
pub fn cancel_nodestroy(ctrl_ptr: usize, consistency: Consistency) {
    let ctrl = unsafe { &*(ctrl_ptr as *const Control) };
    let word = ctrl.load(Ordering::Relaxed);
    ctrl.store((word & !flags::BUSY) | flags::DEAD, consistency.store_order());
}
