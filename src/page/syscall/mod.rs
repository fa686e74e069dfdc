//! Raw OS region mapping, one platform module per target
//! (`examples/ryancinsight-halo/src/allocator/syscall/{unix,windows}.rs`).

#[cfg(unix)]
pub mod unix;
#[cfg(windows)]
pub mod windows;

#[cfg(unix)]
use unix::{allocate_region, free_region};
#[cfg(windows)]
use windows::{allocate_region, free_region};

use crate::ctrl::align_up;

/// Maps a fresh region of at least `size` bytes, aligned to `align`
/// (`align` must be a power of two). Mmap/VirtualAlloc only guarantee OS
/// page alignment, so for `align` larger than that we over-map and trim the
/// slack, the standard "aligned mmap" trick.
///
/// # Safety
/// `size` and `align` must both be non-zero and `align` a power of two.
pub unsafe fn allocate_region_aligned(size: usize, align: usize) -> Option<*mut u8> {
    debug_assert!(align.is_power_of_two());

    let raw_size = size + align;
    let raw = allocate_region(raw_size)?;
    let raw_addr = raw as usize;
    let aligned_addr = align_up(raw_addr, align);

    #[cfg(unix)]
    {
        let head = aligned_addr - raw_addr;
        if head > 0 {
            free_region(raw, head);
        }
        let tail_start = aligned_addr + size;
        let tail_len = (raw_addr + raw_size) - tail_start;
        if tail_len > 0 {
            free_region(tail_start as *mut u8, tail_len);
        }
    }
    #[cfg(windows)]
    {
        // VirtualFree can only release an entire VirtualAlloc reservation at
        // once, so instead of trimming we release the whole over-mapping and
        // re-reserve exactly at the aligned address. This leaves a small
        // theoretical race window (another thread could steal the address);
        // on failure we simply retry the whole call.
        free_region(raw, raw_size);
        let retried = windows::allocate_region_at(aligned_addr as *mut u8, size)?;
        return Some(retried);
    }

    #[cfg(unix)]
    Some(aligned_addr as *mut u8)
}
