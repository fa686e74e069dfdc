//! Control-block layout and the in-page block allocator (`spec.md` §3, §4.C).
//!
//! Grounded on the offset arithmetic of
//! `examples/ryancinsight-halo/src/alloc/concurrent_slab.rs`'s `Page::alloc`
//! (compute an aligned offset from a page-relative base, CAS it in) and on
//! the exact constant definitions of
//! `examples/original_source/density/detail/lf_queue_common.h`.

use crate::descriptor::{Descriptor, RuntimeType};
use core::sync::atomic::{AtomicUsize, Ordering};

/// Bit flags carried in the low bits of [`Control::next`] (`spec.md` §3).
pub mod flags {
    /// Producer is still constructing, or a consumer is still running on,
    /// this block.
    pub const BUSY: usize = 0b0001;
    /// Block is not consumable: cancelled construction, completed
    /// consumption, or a page cross-link.
    pub const DEAD: usize = 0b0010;
    /// Payload lives in a heap block outside the page.
    pub const EXTERNAL: usize = 0b0100;
    /// Initial sentinel of the tail before any page exists.
    pub const INVALID_NEXT: usize = 0b1000;
    /// Union of all flag bits carried on a block's `next` word.
    pub const ALL_FLAGS: usize = BUSY | DEAD | EXTERNAL | INVALID_NEXT;

    /// Reserved bit, distinct from the block flags above, CASed onto `tail`
    /// itself while a producer is installing a new page (`spec.md` §4.D
    /// `handle_page_overflow`: "CAS `tail` from `t` to `t | BUSY_PAGE_LOCK`").
    pub const PAGE_LOCK: usize = 0b1_0000;
}

/// The next-power-of-two strictly greater than `ALL_FLAGS`, i.e. the number
/// of low bits a pointer-with-flags word must reserve.
const fn next_pow2(v: usize) -> usize {
    let mut p = 1usize;
    while p < v {
        p <<= 1;
    }
    p
}

const fn const_max(a: usize, b: usize) -> usize {
    if a > b {
        a
    } else {
        b
    }
}

/// Control block: the `next` word plus its flags. One precedes every block
/// and one terminates every page (the "end control block").
///
/// Deliberately has no `common_base_ptr` field (`spec.md` §3): the queue's
/// heterogeneity comes entirely from the [`Descriptor`] stored in-block, so
/// every flavour (heterogeneous or void-element) shares this one layout.
#[repr(C)]
pub struct Control {
    pub next: AtomicUsize,
}

impl Control {
    #[inline]
    pub fn new(raw: usize) -> Self {
        Self {
            next: AtomicUsize::new(raw),
        }
    }

    #[inline]
    pub fn load(&self, order: Ordering) -> usize {
        self.next.load(order)
    }

    #[inline]
    pub fn store(&self, value: usize, order: Ordering) {
        self.next.store(value, order)
    }

    #[inline]
    pub fn compare_exchange(
        &self,
        current: usize,
        new: usize,
        success: Ordering,
        failure: Ordering,
    ) -> Result<usize, usize> {
        self.next.compare_exchange(current, new, success, failure)
    }
}

/// `{ void* ptr; size_t size; size_t align; }` — describes a payload that
/// did not fit in a page and was allocated from the raw allocator instead.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct ExternalBlock {
    pub ptr: *mut u8,
    pub size: usize,
    pub align: usize,
}

#[inline]
pub const fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

#[inline]
pub const fn align_down(value: usize, align: usize) -> usize {
    value & !(align - 1)
}

/// Layout constants for a queue using descriptor type `D` and page size
/// `PAGE_SIZE`, computed once as associated consts so every engine shares
/// the same numbers without runtime recomputation.
pub struct Layout<const PAGE_SIZE: usize>;

impl<const PAGE_SIZE: usize> Layout<PAGE_SIZE> {
    /// There are no particular requirements on this choice; it just needs
    /// to be a very common alignment (mirrors `min_alignment` in the
    /// original: `alignof(void*)`).
    pub const MIN_ALIGNMENT: usize = core::mem::align_of::<usize>();

    /// Head/tail pointers are always a multiple of this. Raised to the
    /// largest alignment requirement in play so control-block and
    /// descriptor offsets never need extra rounding.
    pub const GRANULARITY: usize = const_max(
        const_max(
            crate::concurrency::CONCURRENT_ALIGNMENT,
            const_max(
                core::mem::align_of::<Control>(),
                core::mem::align_of::<Descriptor>(),
            ),
        ),
        const_max(
            const_max(core::mem::align_of::<ExternalBlock>(), Self::MIN_ALIGNMENT),
            next_pow2(flags::ALL_FLAGS + 1),
        ),
    );

    /// Offset of the descriptor in the layout of a value-carrying block.
    pub const TYPE_OFFSET: usize = align_up(core::mem::size_of::<Control>(), core::mem::align_of::<Descriptor>());

    /// Minimum offset of the payload in a value-carrying block (the actual
    /// offset also depends on the payload's own alignment).
    pub const ELEMENT_MIN_OFFSET: usize =
        align_up(Self::TYPE_OFFSET + core::mem::size_of::<Descriptor>(), Self::MIN_ALIGNMENT);

    /// Minimum offset of a raw sub-allocation (no descriptor).
    pub const RAWBLOCK_MIN_OFFSET: usize = align_up(
        core::mem::size_of::<Control>(),
        const_max(Self::MIN_ALIGNMENT, core::mem::align_of::<ExternalBlock>()),
    );

    /// Offset, from the page base, of the end control block.
    pub const END_CONTROL_OFFSET: usize =
        align_down(PAGE_SIZE - core::mem::size_of::<Control>(), Self::GRANULARITY);

    /// Largest size (in bytes) of an element or raw block that can ever fit
    /// in a page, regardless of alignment padding.
    pub const MAX_SIZE_INPAGE: usize = Self::END_CONTROL_OFFSET - Self::ELEMENT_MIN_OFFSET;

    /// Value used to initialize `tail`/`head` before any page exists. Chosen
    /// so the very first allocation always overflows into the slow path
    /// (`spec.md` §3: "a sentinel pointing inside a 'fake' offset that is
    /// guaranteed to trigger the page-overflow slow path on first use").
    pub const SENTINEL_TAIL_OFFSET: usize = Self::END_CONTROL_OFFSET;
}

/// Outcome of a layout computation (`spec.md` §4.C steps 4-6).
pub enum Allocation {
    /// The block fits in the current page.
    Fits {
        ctrl_ptr: usize,
        user_ptr: usize,
        new_tail: usize,
    },
    /// Does not fit in the *current* page, but would fit in a fresh one:
    /// the caller must install a new page and retry.
    PageOverflow,
    /// Too large ever to fit in a page: must be allocated externally.
    TooLargeForPage,
}

/// Computes where a block of `size`/`align` bytes would land if reserved at
/// `candidate_tail` (`spec.md` §4.C). `page_base` is `candidate_tail` rounded
/// down to the page boundary. Does not mutate anything; the caller performs
/// the actual CAS and, on success, the release-ordered writes the spec
/// mandates.
pub fn compute_block<const PAGE_SIZE: usize>(
    candidate_tail: usize,
    page_base: usize,
    include_type: bool,
    mut size: usize,
    mut align: usize,
) -> Allocation {
    type L<const P: usize> = Layout<P>;

    if align < L::<PAGE_SIZE>::MIN_ALIGNMENT {
        align = L::<PAGE_SIZE>::MIN_ALIGNMENT;
        size = align_up(size, L::<PAGE_SIZE>::MIN_ALIGNMENT);
    }

    let base_offset = if include_type {
        L::<PAGE_SIZE>::ELEMENT_MIN_OFFSET
    } else {
        L::<PAGE_SIZE>::RAWBLOCK_MIN_OFFSET
    };

    let mut new_tail = candidate_tail + base_offset;
    new_tail = align_up(new_tail, align);
    let user_ptr = new_tail;
    new_tail = align_up(new_tail + size, L::<PAGE_SIZE>::GRANULARITY);

    let offset_in_page = new_tail - page_base;
    if offset_in_page <= L::<PAGE_SIZE>::END_CONTROL_OFFSET {
        Allocation::Fits {
            ctrl_ptr: candidate_tail,
            user_ptr,
            new_tail,
        }
    } else if size + (align - L::<PAGE_SIZE>::MIN_ALIGNMENT) <= L::<PAGE_SIZE>::MAX_SIZE_INPAGE {
        Allocation::PageOverflow
    } else {
        Allocation::TooLargeForPage
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE_SIZE: usize = 4096;

    #[test]
    fn first_allocation_from_sentinel_overflows() {
        // The sentinel offset is crafted so that any in-page computation
        // from it immediately reports PageOverflow (or TooLargeForPage),
        // never Fits — that's what forces the very first push to take the
        // page-install slow path.
        let page_base = 0x10000;
        let candidate_tail = page_base + Layout::<PAGE_SIZE>::SENTINEL_TAIL_OFFSET;
        match compute_block::<PAGE_SIZE>(candidate_tail, page_base, true, 16, 8) {
            Allocation::Fits { .. } => panic!("sentinel must not admit a fit"),
            Allocation::PageOverflow | Allocation::TooLargeForPage => {}
        }
    }

    #[test]
    fn small_allocation_fits_fresh_page() {
        let page_base = 0x20000;
        let candidate_tail = page_base; // first real block of a fresh page
        match compute_block::<PAGE_SIZE>(candidate_tail, page_base, true, 16, 8) {
            Allocation::Fits {
                ctrl_ptr, user_ptr, ..
            } => {
                assert_eq!(ctrl_ptr, candidate_tail);
                assert!(user_ptr > ctrl_ptr);
                assert_eq!(user_ptr % 8, 0);
            }
            _ => panic!("expected a fit"),
        }
    }

    #[test]
    fn oversized_request_is_too_large_for_page() {
        let page_base = 0x30000;
        match compute_block::<PAGE_SIZE>(page_base, page_base, true, PAGE_SIZE * 2, 8) {
            Allocation::TooLargeForPage => {}
            _ => panic!("expected too-large-for-page"),
        }
    }
}
