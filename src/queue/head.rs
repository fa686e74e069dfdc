//! Consumer engine (`spec.md` §4.E): walks control blocks, claims them via
//! CAS, and advances `head` past dead blocks and retired pages.
//!
//! Grounded on the same CAS-retry idiom as
//! `examples/ryancinsight-halo/src/concurrency/worklist/treiber_stack.rs`
//! and on `original_source/density/detail/base_conc_queue_lflf.h`'s
//! `try_consume` / `try_to_delete_first`.

use crate::consistency::Consistency;
use crate::ctrl::{self, flags, Control, Layout};
use crate::descriptor::{Descriptor, RuntimeType};
use crate::hazard::{self, Guard};
use crate::page::PagePool;
use core::sync::atomic::AtomicUsize;

/// A claimed block (`BUSY` now set by this consumer), ready to be read and
/// then committed or cancelled.
pub struct Claim {
    pub ctrl_ptr: usize,
    pub descriptor: Descriptor,
    pub payload_ptr: usize,
    pub is_external: bool,
    /// Keeps the owning page alive for the lifetime of the claim.
    _guard: Guard,
}

/// Attempts to claim the next consumable block (`spec.md` §4.E
/// `try_start_consume`). Returns `None` on an empty queue, a
/// reserved-but-unlinked tail, or a block currently `BUSY`.
pub fn try_start_consume<const PAGE_SIZE: usize>(
    head: &AtomicUsize,
    initial_page: &AtomicUsize,
    page_pool: &PagePool<PAGE_SIZE>,
    consistency: Consistency,
) -> Option<Claim> {
    loop {
        let mut h = head.load(consistency.load_order());
        if h == 0 {
            h = initial_page.load(consistency.load_order());
            if h == 0 {
                return None;
            }
        }

        let guard = Guard::protect(h as *mut u8);
        let reconfirm = {
            let cur = head.load(consistency.load_order());
            if cur == 0 {
                initial_page.load(consistency.load_order())
            } else {
                cur
            }
        };
        if reconfirm != h {
            continue;
        }

        let ctrl = unsafe { &*(h as *const Control) };
        let next = ctrl.load(consistency.load_order());
        if next == 0 {
            return None;
        }
        let fl = next & flags::ALL_FLAGS;

        if fl & flags::BUSY != 0 {
            return None;
        }

        if fl & flags::DEAD != 0 {
            // `guard` still protects `h`, which lies inside the very page
            // `advance_head_past` may need to retire. Drop it first so this
            // thread's own hazard slot doesn't make `spin_until_clear` wait
            // on itself forever.
            drop(guard);
            advance_head_past::<PAGE_SIZE>(head, page_pool, h, next, consistency);
            continue;
        }

        let desired = (next & !flags::ALL_FLAGS) | flags::BUSY | (fl & flags::EXTERNAL);
        let (succ, fail) = consistency.cas_orderings();
        if ctrl.compare_exchange(next, desired, succ, fail).is_err() {
            continue;
        }

        let is_external = fl & flags::EXTERNAL != 0;
        let descriptor_ptr = (h + Layout::<PAGE_SIZE>::TYPE_OFFSET) as *const Descriptor;
        let descriptor = unsafe { *descriptor_ptr };
        let payload_ptr = derive_payload_ptr::<PAGE_SIZE>(h, &descriptor, is_external);

        return Some(Claim {
            ctrl_ptr: h,
            descriptor,
            payload_ptr,
            is_external,
            _guard: guard,
        });
    }
}

fn derive_payload_ptr<const PAGE_SIZE: usize>(
    ctrl_ptr: usize,
    descriptor: &Descriptor,
    is_external: bool,
) -> usize {
    if is_external {
        let block_slot = ctrl::align_up(
            ctrl_ptr + Layout::<PAGE_SIZE>::ELEMENT_MIN_OFFSET,
            core::mem::align_of::<ctrl::ExternalBlock>(),
        );
        let external = unsafe { &*(block_slot as *const ctrl::ExternalBlock) };
        external.ptr as usize
    } else {
        let align = descriptor.align().max(Layout::<PAGE_SIZE>::MIN_ALIGNMENT);
        ctrl::align_up(ctrl_ptr + Layout::<PAGE_SIZE>::ELEMENT_MIN_OFFSET, align)
    }
}

/// Non-reentrant commit (`spec.md` §4.E `commit_consume`): destroys the
/// payload, marks the block `DEAD`, then opportunistically advances `head`.
/// `DEAD` is written *before* the user destructor runs, per `spec.md` §9's
/// non-reentrant discipline.
pub fn commit_consume<const PAGE_SIZE: usize>(
    claim: Claim,
    head: &AtomicUsize,
    page_pool: &PagePool<PAGE_SIZE>,
    consistency: Consistency,
) {
    mark_dead(claim.ctrl_ptr, consistency);
    destroy_payload(&claim);
    try_advance_from::<PAGE_SIZE>(head, page_pool, claim.ctrl_ptr, consistency);
}

/// Reentrant commit (`spec.md` §4.F): destroys the payload *then* marks the
/// block `DEAD`, so a destructor that pushes back into this queue never
/// observes its own still-claimed predecessor as the current head.
pub fn commit_reentrant_consume<const PAGE_SIZE: usize>(
    claim: Claim,
    head: &AtomicUsize,
    page_pool: &PagePool<PAGE_SIZE>,
    consistency: Consistency,
) {
    destroy_payload(&claim);
    mark_dead(claim.ctrl_ptr, consistency);
    try_advance_from::<PAGE_SIZE>(head, page_pool, claim.ctrl_ptr, consistency);
}

/// Cancels a claim without destroying the payload (`spec.md` §4.E
/// `cancel_consume`): restores the original `next` word so some other
/// consumer may claim the block again.
pub fn cancel_consume(claim: Claim, consistency: Consistency) {
    let ctrl = unsafe { &*(claim.ctrl_ptr as *const Control) };
    let current = ctrl.load(consistency.load_order());
    ctrl.store(current & !flags::BUSY, consistency.store_order());
}

fn destroy_payload(claim: &Claim) {
    unsafe {
        claim.descriptor.destroy(claim.payload_ptr as *mut u8);
        if claim.is_external {
            let ptr = core::ptr::NonNull::new_unchecked(claim.payload_ptr as *mut u8);
            crate::page::deallocate_external(ptr, claim.descriptor.size(), claim.descriptor.align());
        }
    }
}

fn mark_dead(ctrl_ptr: usize, consistency: Consistency) {
    let ctrl = unsafe { &*(ctrl_ptr as *const Control) };
    let current = ctrl.load(consistency.load_order());
    let word = (current & !flags::ALL_FLAGS) | flags::DEAD | (current & flags::EXTERNAL);
    ctrl.store(word, consistency.store_order());
}

/// `spec.md` §4.E `advance_head_past`: moves `head` from `h` to the block
/// `next` (stripped of flags) points at. If that crosses a page boundary,
/// the page behind `h` is now fully retired and is returned to the
/// allocator once no hazard slot still observes it.
fn advance_head_past<const PAGE_SIZE: usize>(
    head: &AtomicUsize,
    page_pool: &PagePool<PAGE_SIZE>,
    h: usize,
    next: usize,
    consistency: Consistency,
) {
    let target = next & !flags::ALL_FLAGS;
    let old_page_base = ctrl::align_down(h, PAGE_SIZE);
    let new_page_base = ctrl::align_down(target, PAGE_SIZE);
    let crosses_page = old_page_base != new_page_base;

    let (succ, fail) = consistency.cas_orderings();
    if head.compare_exchange(h, target, succ, fail).is_err() {
        return;
    }

    if crosses_page {
        hazard::domain().spin_until_clear(old_page_base, PAGE_SIZE);
        let page = unsafe { core::ptr::NonNull::new_unchecked(old_page_base as *mut u8) };
        page_pool.deallocate_page(page);
    }
}

fn try_advance_from<const PAGE_SIZE: usize>(
    head: &AtomicUsize,
    page_pool: &PagePool<PAGE_SIZE>,
    ctrl_ptr: usize,
    consistency: Consistency,
) {
    let ctrl = unsafe { &*(ctrl_ptr as *const Control) };
    let next = ctrl.load(consistency.load_order());
    if head.load(consistency.load_order()) == ctrl_ptr {
        advance_head_past::<PAGE_SIZE>(head, page_pool, ctrl_ptr, next, consistency);
    }
}
