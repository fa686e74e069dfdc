//! The paged allocator (`spec.md` §4.A): fixed-size, page-aligned regions
//! served from a per-thread free-list cache backed by a process-wide pool.
//!
//! Grounded on
//! `examples/ryancinsight-halo/src/allocator/core/page.rs`'s
//! `SyscallPageAlloc` (global `Mutex`-protected page heap carved from
//! chunked `mmap`/`VirtualAlloc` regions, threads never individually
//! `munmap`) and on `original_source/density/page_allocator.h`'s
//! thread-local free-page cache of capacity 4.

pub mod syscall;

use crate::error::QueueError;
use crate::hazard;
use std::cell::RefCell;
use std::ptr::NonNull;
use std::sync::Mutex;

/// Default page size (`spec.md` §6: "Configurable at compile time; default
/// 65 536 bytes").
pub const DEFAULT_PAGE_SIZE: usize = 65536;

/// Maximum number of free pages a single thread caches before handing
/// pages back to the process-wide pool.
pub const THREAD_CACHE_CAPACITY: usize = 4;

/// How many pages to carve out of a single OS mapping when the process-wide
/// pool runs dry, amortizing syscall overhead the way
/// `SyscallPageAlloc::alloc_page`'s 64-page chunking does.
const CHUNK_PAGES: usize = 64;

thread_local! {
    static LOCAL_CACHE: RefCell<Vec<usize>> = RefCell::new(Vec::with_capacity(THREAD_CACHE_CAPACITY));
}

struct GlobalPool {
    free: Mutex<Vec<usize>>,
}

static GLOBAL_POOL: GlobalPool = GlobalPool {
    free: Mutex::new(Vec::new()),
};

/// A paged allocator for pages of size `PAGE_SIZE` (must be a power of two,
/// `spec.md` §3). Stateless: all mutable state lives in thread-local and
/// process-wide statics, mirroring the teacher's `SyscallPageAlloc`
/// zero-sized-type-with-global-backing design.
#[derive(Default, Clone, Copy, Debug)]
pub struct PagePool<const PAGE_SIZE: usize = DEFAULT_PAGE_SIZE>;

impl<const PAGE_SIZE: usize> PagePool<PAGE_SIZE> {
    const _ASSERT_POWER_OF_TWO: () = assert!(PAGE_SIZE.is_power_of_two());

    /// Hands out a `PAGE_SIZE`-aligned page. Pops the thread-local cache
    /// first, then the process-wide pool, only reaching into the OS
    /// allocator when both are empty.
    pub fn allocate_page(&self) -> Result<NonNull<u8>, QueueError> {
        let _ = Self::_ASSERT_POWER_OF_TWO;

        if let Some(addr) = LOCAL_CACHE.with(|c| c.borrow_mut().pop()) {
            #[cfg(feature = "tracing")]
            tracing::trace!(addr, source = "thread-cache", "page allocated");
            return Ok(unsafe { NonNull::new_unchecked(addr as *mut u8) });
        }

        if let Some(addr) = GLOBAL_POOL.free.lock().unwrap().pop() {
            #[cfg(feature = "tracing")]
            tracing::trace!(addr, source = "global-pool", "page allocated");
            return Ok(unsafe { NonNull::new_unchecked(addr as *mut u8) });
        }

        self.refill_from_system()?;
        if let Some(addr) = GLOBAL_POOL.free.lock().unwrap().pop() {
            #[cfg(feature = "tracing")]
            tracing::trace!(addr, source = "fresh-mapping", "page allocated");
            return Ok(unsafe { NonNull::new_unchecked(addr as *mut u8) });
        }
        Err(QueueError::OutOfMemory)
    }

    /// Returns an emptied page. Pushes into the thread-local cache while it
    /// has room; otherwise spins until the hazard domain reports the page
    /// is unobserved, then hands it to the process-wide pool (`spec.md`
    /// §4.A: "Before releasing to the system, the allocator must spin until
    /// the hazard-pointer domain reports no hazard on the page address").
    pub fn deallocate_page(&self, page: NonNull<u8>) {
        let addr = page.as_ptr() as usize;
        let cached = LOCAL_CACHE.with(|c| {
            let mut c = c.borrow_mut();
            if c.len() < THREAD_CACHE_CAPACITY {
                c.push(addr);
                true
            } else {
                false
            }
        });
        if cached {
            return;
        }

        hazard::domain().spin_until_clear(addr, PAGE_SIZE);
        #[cfg(feature = "tracing")]
        tracing::trace!(addr, "page released to global pool");
        GLOBAL_POOL.free.lock().unwrap().push(addr);
    }

    fn refill_from_system(&self) -> Result<(), QueueError> {
        let chunk_size = CHUNK_PAGES * PAGE_SIZE;
        let base = unsafe { syscall::allocate_region_aligned(chunk_size, PAGE_SIZE) }
            .ok_or(QueueError::OutOfMemory)?;
        #[cfg(feature = "tracing")]
        tracing::trace!(base = base as usize, pages = CHUNK_PAGES, "mapped fresh chunk");
        let mut free = GLOBAL_POOL.free.lock().unwrap();
        for i in 0..CHUNK_PAGES {
            free.push(base as usize + i * PAGE_SIZE);
        }
        Ok(())
    }
}

/// Raw aligned allocation for elements too large to fit in a page
/// (`spec.md` §4.A: "a raw aligned allocator for oversized external
/// elements").
pub fn allocate_external(size: usize, align: usize) -> Result<NonNull<u8>, QueueError> {
    let layout = std::alloc::Layout::from_size_align(size, align).map_err(|_| QueueError::OutOfMemory)?;
    let ptr = unsafe { std::alloc::alloc(layout) };
    NonNull::new(ptr).ok_or(QueueError::OutOfMemory)
}

/// Frees a block obtained from [`allocate_external`].
///
/// # Safety
/// `ptr`, `size`, and `align` must match a prior successful
/// [`allocate_external`] call exactly.
pub unsafe fn deallocate_external(ptr: NonNull<u8>, size: usize, align: usize) {
    let layout = std::alloc::Layout::from_size_align_unchecked(size, align);
    std::alloc::dealloc(ptr.as_ptr(), layout);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_then_deallocate_roundtrips() {
        let pool: PagePool<4096> = PagePool;
        let page = pool.allocate_page().unwrap();
        assert_eq!(page.as_ptr() as usize % 4096, 0);
        pool.deallocate_page(page);
    }

    #[test]
    fn deallocated_page_is_reused() {
        let pool: PagePool<4096> = PagePool;
        let page = pool.allocate_page().unwrap();
        let addr = page.as_ptr() as usize;
        pool.deallocate_page(page);
        let page2 = pool.allocate_page().unwrap();
        assert_eq!(page2.as_ptr() as usize, addr);
        pool.deallocate_page(page2);
    }

    #[test]
    fn external_allocation_respects_alignment() {
        let block = allocate_external(8192, 64).unwrap();
        assert_eq!(block.as_ptr() as usize % 64, 0);
        unsafe { deallocate_external(block, 8192, 64) };
    }
}
