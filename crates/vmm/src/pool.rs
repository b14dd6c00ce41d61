//! Physical page allocator contract.
//!
//! The virtual memory allocator acquires backing memory through the
//! [`PhysicalPageAllocator`] trait and must return every page it obtains but
//! does not end up owning. [`PageReservation`] makes that return automatic:
//! pages held by a reservation go back to the pool when it is dropped, so
//! every early-exit path of a multi-step allocation unwinds by construction.

use crate::address::PhysicalAddress;
use crate::page::PhysicalPage;
use alloc::vec::Vec;
use core::mem;

/// A physically contiguous run of pages obtained from the pool.
///
/// `pages` are ordered by ascending address starting at `base`. The run may
/// be shorter than requested when the pool could only partially satisfy the
/// request; callers decide whether a partial run is usable.
pub struct ContiguousRun {
    /// Physical address of the first page in the run.
    pub base: PhysicalAddress,
    /// The pages of the run, in address order.
    pub pages: Vec<PhysicalPage>,
}

/// The physical page allocator.
///
/// Supplies fixed-size physical pages and reclaims them. Accounting policy
/// (buddy orders, watermarks, zones) is entirely the implementation's
/// business; this crate only moves page handles in and out.
pub trait PhysicalPageAllocator {
    /// Allocates up to `count` individually-sourced pages, not necessarily
    /// contiguous. May return fewer than `count` when the pool runs short.
    fn alloc_pages(&mut self, count: usize) -> Vec<PhysicalPage>;

    /// Allocates a physically contiguous run of up to `count` pages whose
    /// base is aligned to `2^align_pow2` bytes. Returns None if not even a
    /// partial run could be found.
    fn alloc_contiguous(&mut self, count: usize, align_pow2: u8) -> Option<ContiguousRun>;

    /// Returns pages to the pool unconditionally.
    fn free(&mut self, pages: Vec<PhysicalPage>);
}

/// Pages borrowed from a pool that have not yet found an owner.
///
/// Dropping the reservation returns every remaining page to the pool.
/// [`commit`](Self::commit) takes the pages out for good, ending the pool
/// borrow; after that point the caller is responsible for them.
pub struct PageReservation<'a, P: PhysicalPageAllocator + ?Sized> {
    pool: &'a mut P,
    pages: Vec<PhysicalPage>,
}

impl<'a, P: PhysicalPageAllocator + ?Sized> PageReservation<'a, P> {
    /// Wraps pages freshly obtained from `pool`.
    pub fn new(pool: &'a mut P, pages: Vec<PhysicalPage>) -> Self {
        Self { pool, pages }
    }

    /// Returns the number of pages held.
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    /// Returns true if the reservation holds no pages.
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Takes ownership of the reserved pages, consuming the reservation
    /// without returning anything to the pool.
    pub fn commit(mut self) -> Vec<PhysicalPage> {
        mem::take(&mut self.pages)
    }
}

impl<P: PhysicalPageAllocator + ?Sized> Drop for PageReservation<'_, P> {
    fn drop(&mut self) {
        if !self.pages.is_empty() {
            self.pool.free(mem::take(&mut self.pages));
        }
    }
}

#[cfg(any(test, feature = "software-emulation"))]
mod emulation {
    //! A software page pool for testing and development.

    use super::{ContiguousRun, PhysicalPageAllocator};
    use crate::address::{PAGE_SIZE_SHIFT, PhysicalAddress};
    use crate::page::{FrameNumber, PhysicalPage};
    use alloc::collections::BTreeSet;
    use alloc::vec::Vec;

    /// A page pool backed by a sorted set of free frame numbers.
    ///
    /// Frames are handed out lowest-first, which makes test expectations
    /// deterministic.
    pub struct PagePool {
        free: BTreeSet<usize>,
    }

    impl PagePool {
        /// Creates an empty pool.
        pub fn new() -> Self {
            Self {
                free: BTreeSet::new(),
            }
        }

        /// Creates a pool owning `count` frames starting at `first`.
        pub fn with_frames(first: FrameNumber, count: usize) -> Self {
            let mut pool = Self::new();
            pool.add_frames(first, count);
            pool
        }

        /// Donates `count` frames starting at `first` to the pool.
        pub fn add_frames(&mut self, first: FrameNumber, count: usize) {
            for frame in first.as_usize()..first.as_usize() + count {
                let inserted = self.free.insert(frame);
                debug_assert!(inserted, "frame {frame} donated twice");
            }
        }

        /// Returns the number of free frames in the pool.
        pub fn free_pages(&self) -> usize {
            self.free.len()
        }
    }

    impl Default for PagePool {
        fn default() -> Self {
            Self::new()
        }
    }

    impl PhysicalPageAllocator for PagePool {
        fn alloc_pages(&mut self, count: usize) -> Vec<PhysicalPage> {
            let mut pages = Vec::new();
            for _ in 0..count {
                let Some(frame) = self.free.pop_first() else {
                    break;
                };
                pages.push(PhysicalPage::new(FrameNumber::new(frame)));
            }
            pages
        }

        fn alloc_contiguous(&mut self, count: usize, align_pow2: u8) -> Option<ContiguousRun> {
            if count == 0 {
                return None;
            }
            let align_pow2 = align_pow2.max(PAGE_SIZE_SHIFT);
            if u32::from(align_pow2 - PAGE_SIZE_SHIFT) >= usize::BITS {
                return None;
            }
            let frame_align = 1usize << (align_pow2 - PAGE_SIZE_SHIFT);

            // First-fit over aligned candidate bases.
            let candidate = self
                .free
                .iter()
                .copied()
                .filter(|frame| frame % frame_align == 0)
                .find(|&frame| (frame..frame + count).all(|f| self.free.contains(&f)))?;

            let mut pages = Vec::with_capacity(count);
            for frame in candidate..candidate + count {
                self.free.remove(&frame);
                pages.push(PhysicalPage::new(FrameNumber::new(frame)));
            }
            Some(ContiguousRun {
                base: FrameNumber::new(candidate).start(),
                pages,
            })
        }

        fn free(&mut self, pages: Vec<PhysicalPage>) {
            for page in pages {
                let inserted = self.free.insert(page.frame().as_usize());
                debug_assert!(inserted, "page {page:?} freed twice");
            }
        }
    }
}

#[cfg(any(test, feature = "software-emulation"))]
pub use emulation::PagePool;
