//! The transaction façade (`spec.md` §4.F): RAII wrappers around a reserved
//! producer block or a claimed consumer block, so callers who need to
//! interleave raw sub-allocations with construction (or inspect a consumed
//! value before deciding to run its destructor) don't have to hand-roll the
//! commit/cancel bookkeeping themselves.
//!
//! Grounded on the construct-via-raw-pointer / `Drop`-releases-if-uncommitted
//! style of `examples/ryancinsight-halo/src/alloc/branded_box.rs`.

use super::{head, tail, Cardinality, Queue};
use crate::descriptor::{Descriptor, RuntimeType};
use crate::error::QueueError;
use core::marker::PhantomData;
use core::mem::MaybeUninit;

/// A reserved-but-not-yet-published producer block, typed for `T`.
///
/// Dropping the transaction without calling [`PutTransaction::commit`] runs
/// [`tail::cancel_nodestroy`] (`spec.md` §4.F: "Drop without commit ⇒
/// cancel_nodestroy") — callers that construct the payload and then abandon
/// the transaction are responsible for calling [`PutTransaction::cancel`]
/// instead, so the destructor actually runs.
pub struct PutTransaction<'q, Prod: Cardinality, Cons: Cardinality, const PAGE_SIZE: usize, T> {
    queue: &'q Queue<Prod, Cons, PAGE_SIZE>,
    ctrl_ptr: usize,
    payload_ptr: *mut T,
    finished: bool,
    _marker: PhantomData<T>,
}

impl<'q, Prod: Cardinality, Cons: Cardinality, const PAGE_SIZE: usize, T: Send + 'static>
    PutTransaction<'q, Prod, Cons, PAGE_SIZE, T>
{
    pub(super) fn start(queue: &'q Queue<Prod, Cons, PAGE_SIZE>) -> Result<Self, QueueError> {
        let reservation = tail::reserve::<PAGE_SIZE>(
            &queue.tail,
            &queue.initial_page,
            &queue.page_pool,
            queue.consistency,
            core::mem::size_of::<T>(),
            core::mem::align_of::<T>(),
        )?;
        unsafe {
            core::ptr::write(reservation.descriptor_ptr as *mut Descriptor, Descriptor::make::<T>());
        }
        Ok(Self {
            queue,
            ctrl_ptr: reservation.ctrl_ptr,
            payload_ptr: reservation.payload_ptr as *mut T,
            finished: false,
            _marker: PhantomData,
        })
    }

    /// Address at which the payload must be constructed exactly once before
    /// [`PutTransaction::commit`] is called.
    pub fn element_ptr(&self) -> *mut T {
        self.payload_ptr
    }

    /// Reserves `size` additional, descriptor-less bytes in the same page,
    /// marked `DEAD` so consumers skip them (`spec.md` §4.F `raw_allocate`).
    /// Must be called between reservation and [`PutTransaction::commit`].
    pub fn raw_allocate(&mut self, size: usize, align: usize) -> Result<*mut u8, QueueError> {
        let ptr = tail::reserve_raw::<PAGE_SIZE>(
            &self.queue.tail,
            &self.queue.initial_page,
            &self.queue.page_pool,
            self.queue.consistency,
            size,
            align,
        )?;
        Ok(ptr as *mut u8)
    }

    /// [`PutTransaction::raw_allocate`] followed by a copy of `bytes` into
    /// the reserved region.
    pub fn raw_allocate_copy(&mut self, bytes: &[u8]) -> Result<*mut u8, QueueError> {
        let ptr = self.raw_allocate(bytes.len().max(1), 1)?;
        unsafe { core::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr, bytes.len()) };
        Ok(ptr)
    }

    /// Constructs `value` at [`PutTransaction::element_ptr`] and commits.
    pub fn write(mut self, value: T) {
        unsafe { core::ptr::write(self.payload_ptr, value) };
        tail::commit(self.ctrl_ptr, self.queue.consistency);
        self.finished = true;
    }

    /// Publishes a block the caller has already constructed via
    /// [`PutTransaction::element_ptr`] (`spec.md` §4.F `commit`).
    ///
    /// # Safety
    /// The payload must have been fully constructed at `element_ptr()`.
    pub unsafe fn commit(mut self) {
        tail::commit(self.ctrl_ptr, self.queue.consistency);
        self.finished = true;
    }

    /// Cancels a transaction whose payload was already constructed, running
    /// its destructor before marking the block `DEAD`.
    ///
    /// # Safety
    /// The payload must have been fully constructed at `element_ptr()`.
    pub unsafe fn cancel(mut self) {
        core::ptr::drop_in_place(self.payload_ptr);
        tail::cancel_nodestroy(self.ctrl_ptr, self.queue.consistency);
        self.finished = true;
    }
}

impl<'q, Prod: Cardinality, Cons: Cardinality, const PAGE_SIZE: usize, T> Drop
    for PutTransaction<'q, Prod, Cons, PAGE_SIZE, T>
{
    fn drop(&mut self) {
        if !self.finished {
            tail::cancel_nodestroy(self.ctrl_ptr, self.queue.consistency);
        }
    }
}

/// A claimed consumer block, holding the destructor discipline (reentrant vs
/// non-reentrant, `spec.md` §4.F/§9) as the choice of which commit method the
/// caller invokes.
pub struct ConsumeTransaction<'q, Prod: Cardinality, Cons: Cardinality, const PAGE_SIZE: usize> {
    queue: &'q Queue<Prod, Cons, PAGE_SIZE>,
    claim: MaybeUninit<head::Claim>,
    finished: bool,
}

impl<'q, Prod: Cardinality, Cons: Cardinality, const PAGE_SIZE: usize>
    ConsumeTransaction<'q, Prod, Cons, PAGE_SIZE>
{
    pub(super) fn new(queue: &'q Queue<Prod, Cons, PAGE_SIZE>, claim: head::Claim) -> Self {
        Self {
            queue,
            claim: MaybeUninit::new(claim),
            finished: false,
        }
    }

    /// The descriptor describing the claimed payload's concrete type.
    pub fn descriptor(&self) -> Descriptor {
        unsafe { (*self.claim.as_ptr()).descriptor }
    }

    /// Address of the claimed payload.
    pub fn element_ptr(&self) -> *mut u8 {
        unsafe { (*self.claim.as_ptr()).payload_ptr as *mut u8 }
    }

    /// Non-reentrant commit: `DEAD` is written before the destructor runs
    /// (`spec.md` §9).
    pub fn commit(mut self) {
        let claim = unsafe { self.claim.as_ptr().read() };
        head::commit_consume(claim, &self.queue.head, &self.queue.page_pool, self.queue.consistency);
        self.finished = true;
    }

    /// Reentrant commit: the destructor runs before `DEAD` is written, so it
    /// may safely push back into the same queue (`spec.md` §9).
    pub fn commit_reentrant(mut self) {
        let claim = unsafe { self.claim.as_ptr().read() };
        head::commit_reentrant_consume(claim, &self.queue.head, &self.queue.page_pool, self.queue.consistency);
        self.finished = true;
    }

    /// Restores the block for another consumer without destroying the
    /// payload (`spec.md` §4.E `cancel_consume`).
    pub fn cancel(mut self) {
        let claim = unsafe { self.claim.as_ptr().read() };
        head::cancel_consume(claim, self.queue.consistency);
        self.finished = true;
    }
}

impl<'q, Prod: Cardinality, Cons: Cardinality, const PAGE_SIZE: usize> Drop
    for ConsumeTransaction<'q, Prod, Cons, PAGE_SIZE>
{
    fn drop(&mut self) {
        if !self.finished {
            let claim = unsafe { self.claim.as_ptr().read() };
            head::cancel_consume(claim, self.queue.consistency);
        }
    }
}
