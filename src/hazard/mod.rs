//! The hazard-pointer domain (`spec.md` §4.B): lets consumers protect a page
//! they are touching so a concurrent `deallocate_page` cannot reclaim it out
//! from under them, without taking a lock on the hot path.
//!
//! Grounded on `original_source/density/page_allocator.h`'s
//! `hazard_pointer` RAII guard (thread-local registration of a slot into a
//! process-wide list) and on the release-then-reconfirm protocol described
//! in `examples/other_examples/.../debt-helping.rs.rs` (Michael 2004).

use crate::concurrency::CachePadded;
use core::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};
use std::sync::Mutex;

/// A slot a single thread may publish an address into. `addr` is `null`
/// when the thread is not currently protecting anything. `in_use` is `1`
/// while some thread owns the slot and `0` once that thread has exited and
/// released it back to the registry for reuse (`spec.md` §4.B: slots are
/// "released at thread exit").
struct Slot {
    addr: CachePadded<AtomicPtr<u8>>,
    in_use: AtomicUsize,
}

impl Slot {
    fn new() -> Self {
        Self {
            addr: CachePadded::new(AtomicPtr::new(core::ptr::null_mut())),
            in_use: AtomicUsize::new(1),
        }
    }
}

/// A process-wide registry of hazard slots, one per thread that has ever
/// protected a page through this domain.
///
/// Constructed lazily on first use and never torn down: queues must ensure
/// (via [`HazardDomain::spin_until_clear`]) that no page is freed while a
/// hazard into it is live, which makes an explicit domain shutdown
/// unnecessary (`spec.md` §9 "Global state").
pub struct HazardDomain {
    slots: Mutex<Vec<&'static Slot>>,
}

impl HazardDomain {
    const fn new() -> Self {
        Self {
            slots: Mutex::new(Vec::new()),
        }
    }

    /// Claims a slot for the calling thread: reuses one released by an
    /// exited thread if one is available, otherwise registers a fresh one.
    fn register(&self) -> &'static Slot {
        let mut slots = self.slots.lock().unwrap();
        for slot in slots.iter() {
            if slot
                .in_use
                .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                slot.addr.store(core::ptr::null_mut(), Ordering::Release);
                #[cfg(feature = "tracing")]
                tracing::debug!(slot = ?(*slot as *const Slot), "hazard slot reused");
                return *slot;
            }
        }

        let slot: &'static Slot = Box::leak(Box::new(Slot::new()));
        slots.push(slot);
        #[cfg(feature = "tracing")]
        tracing::debug!(slot = ?(slot as *const Slot), "hazard slot registered");
        slot
    }

    /// Returns whether any registered slot currently protects an address
    /// that falls inside `[page_start, page_start + page_size)`.
    pub fn is_hazard(&self, page_start: usize, page_size: usize) -> bool {
        let page_end = page_start + page_size;
        let slots = self.slots.lock().unwrap();
        slots.iter().any(|slot| {
            let addr = slot.addr.load(Ordering::Acquire) as usize;
            addr != 0 && addr >= page_start && addr < page_end
        })
    }

    /// Spins (with exponential backoff) until no slot protects any address
    /// inside the page starting at `page_start`. Called by the page
    /// allocator immediately before a page re-enters the shared pool where
    /// another thread could claim and overwrite it (`spec.md` §3 invariant 5
    /// and §4.A).
    pub fn spin_until_clear(&self, page_start: usize, page_size: usize) {
        let backoff = crossbeam_utils::Backoff::new();
        let mut spins: u64 = 0;
        while self.is_hazard(page_start, page_size) {
            backoff.snooze();
            spins += 1;
            #[cfg(feature = "tracing")]
            if spins == SPIN_WARN_THRESHOLD {
                tracing::warn!(page = page_start, "hazard spin exceeded warn threshold");
            }
            let _ = spins;
        }
    }
}

/// Number of spin iterations after which a reclamation wait logs a warning
/// (under the `tracing` feature) rather than silently blocking forever.
pub const SPIN_WARN_THRESHOLD: u64 = 10_000;

static DOMAIN: HazardDomain = HazardDomain::new();

/// Returns the process-wide hazard domain.
pub fn domain() -> &'static HazardDomain {
    &DOMAIN
}

/// Owns this thread's claim on its hazard slot for the thread's lifetime.
/// Releasing on drop (rather than leaking the claim forever) is what lets
/// [`HazardDomain::register`] hand the same slot to a later thread instead
/// of growing the registry without bound.
struct ThreadSlotHandle(&'static Slot);

impl Drop for ThreadSlotHandle {
    fn drop(&mut self) {
        self.0.addr.store(core::ptr::null_mut(), Ordering::Release);
        self.0.in_use.store(0, Ordering::Release);
    }
}

thread_local! {
    static LOCAL_SLOT: ThreadSlotHandle = ThreadSlotHandle(DOMAIN.register());
}

/// An RAII guard publishing `addr` as hazardous for the lifetime of the
/// guard, following the Michael (2004) protocol: publish with release
/// ordering, then the caller must re-validate the observed pointer is still
/// `addr` before trusting the protection held.
pub struct Guard {
    slot: &'static Slot,
}

impl Guard {
    /// Publishes `ptr` as currently observed by this thread.
    pub fn protect(ptr: *mut u8) -> Self {
        let slot = LOCAL_SLOT.with(|s| s.0);
        slot.addr.store(ptr, Ordering::Release);
        Self { slot }
    }

    /// Republishes a new address in the same slot (avoids a clear+set
    /// round trip when a loop retries with a different candidate).
    pub fn update(&self, ptr: *mut u8) {
        self.slot.addr.store(ptr, Ordering::Release);
    }
}

impl Drop for Guard {
    fn drop(&mut self) {
        self.slot.addr.store(core::ptr::null_mut(), Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unprotected_page_is_not_hazardous() {
        assert!(!domain().is_hazard(0x1000, 4096));
    }

    #[test]
    fn protecting_an_address_marks_its_page_hazardous() {
        let page = 0x4000usize;
        let inner = page + 16;
        let guard = Guard::protect(inner as *mut u8);
        assert!(domain().is_hazard(page, 4096));
        drop(guard);
        assert!(!domain().is_hazard(page, 4096));
    }

    #[test]
    fn spin_until_clear_returns_once_guard_drops() {
        let page = 0x8000usize;
        let guard = Guard::protect(page as *mut u8);
        let (tx, rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            domain().spin_until_clear(page, 4096);
            tx.send(()).unwrap();
        });
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert!(rx.try_recv().is_err(), "should still be spinning");
        drop(guard);
        rx.recv_timeout(std::time::Duration::from_secs(5)).unwrap();
    }
}
