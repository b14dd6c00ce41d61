//! The public allocation operations.
//!
//! Four operations cover the ways a range enters an address space: reserving
//! it, mapping caller-owned physical memory at it, and allocating it backed
//! by a contiguous run or a scattered pile of pool pages. Each call is a
//! single-shot transaction: validate, place, acquire backing, install
//! mappings, commit. No intermediate state is observable outside the call,
//! and any failure after pages were acquired unwinds them before returning.

use crate::address::{PAGE_SIZE, PhysicalAddress, VirtualAddress, is_page_aligned, page_align_up};
use crate::aspace::AddressSpace;
use crate::error::VmError;
use crate::mmu::{Mmu, MmuFlags};
use crate::pool::{PageReservation, PhysicalPageAllocator};
use crate::region::{Region, RegionKind};

/// Where to put a new region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Let the allocator pick the lowest free gap whose base is aligned to
    /// `2^align_pow2` bytes. Alignments below the page size are promoted to
    /// page alignment.
    Any {
        /// Log2 of the required alignment in bytes.
        align_pow2: u8,
    },
    /// Place the region exactly at this page-aligned address.
    At(VirtualAddress),
}

impl Placement {
    /// Anywhere, with no alignment requirement beyond the page size.
    pub const ANY: Self = Self::Any { align_pow2: 0 };

    fn align_pow2(self) -> u8 {
        match self {
            Placement::Any { align_pow2 } => align_pow2,
            Placement::At(_) => 0,
        }
    }
}

impl AddressSpace {
    /// Reserves `[vaddr, vaddr + size - 1]` so nothing else is placed there.
    ///
    /// The range may already be mapped by firmware or bootstrap code; the
    /// current mapping attributes at `vaddr` are queried from the MMU and
    /// recorded on the region. The size is clamped to the end of the address
    /// space. `vaddr` and `size` must already be page-aligned.
    ///
    /// A zero `size` is a no-op success.
    pub fn reserve<M: Mmu + ?Sized>(
        &mut self,
        mmu: &M,
        name: &str,
        size: usize,
        vaddr: VirtualAddress,
    ) -> Result<(), VmError> {
        log::trace!(
            "reserve: aspace '{}' name '{name}' size {size:#x} vaddr {vaddr}",
            self.name()
        );

        if size == 0 {
            return Ok(());
        }
        if !vaddr.is_aligned(PAGE_SIZE) || !is_page_aligned(size) {
            return Err(VmError::InvalidArgs);
        }
        if !self.contains(vaddr) {
            return Err(VmError::OutOfRange);
        }

        let size = self.trim_to_aspace(vaddr, size);

        let mmu_flags = mmu
            .query(vaddr)
            .map(|(_, flags)| flags)
            .unwrap_or(MmuFlags::NONE);

        let region = Region::new(name, vaddr, size, RegionKind::Reserved, mmu_flags);
        self.insert_region(region).map(|_| ())
    }

    /// Maps `size` bytes of caller-owned physical memory starting at `paddr`.
    ///
    /// The physical pages stay owned by the caller; this only claims the
    /// virtual range and installs the mapping in one whole-run MMU call.
    /// `paddr` and `size` must already be page-aligned. Returns the chosen
    /// virtual base, or `Ok(None)` for a zero-size no-op.
    pub fn map_physical<M: Mmu + ?Sized>(
        &mut self,
        mmu: &mut M,
        name: &str,
        size: usize,
        placement: Placement,
        paddr: PhysicalAddress,
        mmu_flags: MmuFlags,
    ) -> Result<Option<VirtualAddress>, VmError> {
        log::trace!(
            "map_physical: aspace '{}' name '{name}' size {size:#x} placement {placement:?} \
             paddr {paddr} mmu_flags {mmu_flags}",
            self.name()
        );

        if size == 0 {
            return Ok(None);
        }
        if !paddr.is_aligned(PAGE_SIZE) || !is_page_aligned(size) {
            return Err(VmError::InvalidArgs);
        }

        let index = self.place_region(name, size, placement, mmu_flags)?;
        let vaddr = self.regions()[index].base();

        let count = size / PAGE_SIZE;
        if mmu.map(vaddr, paddr, count, mmu_flags).is_err() {
            mmu.unmap(vaddr, count);
            self.remove_region(index);
            return Err(VmError::Exhausted);
        }

        Ok(Some(vaddr))
    }

    /// Allocates `size` bytes (rounded up to a page multiple) backed by one
    /// physically contiguous run from the pool.
    ///
    /// The run is acquired up front; if the pool cannot supply it in full,
    /// everything obtained goes back and the call fails with no change to
    /// the address space. On success the region owns every acquired page and
    /// the mapping is installed in one whole-run MMU call. Returns the
    /// chosen virtual base, or `Ok(None)` for a zero-size no-op.
    pub fn alloc_contiguous<P, M>(
        &mut self,
        pool: &mut P,
        mmu: &mut M,
        name: &str,
        size: usize,
        placement: Placement,
        mmu_flags: MmuFlags,
    ) -> Result<Option<VirtualAddress>, VmError>
    where
        P: PhysicalPageAllocator + ?Sized,
        M: Mmu + ?Sized,
    {
        log::trace!(
            "alloc_contiguous: aspace '{}' name '{name}' size {size:#x} placement {placement:?} \
             mmu_flags {mmu_flags}",
            self.name()
        );

        let size = page_align_up(size).ok_or(VmError::InvalidArgs)?;
        if size == 0 {
            return Ok(None);
        }
        let count = size / PAGE_SIZE;

        // Acquire the physical memory up front, in case it can't be satisfied.
        let Some(run) = pool.alloc_contiguous(count, placement.align_pow2()) else {
            log::debug!("no contiguous run of {count} pages available");
            return Err(VmError::Exhausted);
        };
        let paddr = run.base;
        let reservation = PageReservation::new(&mut *pool, run.pages);
        if reservation.len() < count {
            log::debug!(
                "asked for {count} contiguous pages, got {}",
                reservation.len()
            );
            return Err(VmError::Exhausted);
        }

        let index = self.place_region(name, size, placement, mmu_flags)?;
        let vaddr = self.regions()[index].base();
        let pages = reservation.commit();

        if mmu.map(vaddr, paddr, count, mmu_flags).is_err() {
            mmu.unmap(vaddr, count);
            self.remove_region(index);
            pool.free(pages);
            return Err(VmError::Exhausted);
        }

        self.region_mut(index).extend_pages(pages);
        Ok(Some(vaddr))
    }

    /// Allocates `size` bytes (rounded up to a page multiple) backed by
    /// individually-sourced pages from the pool.
    ///
    /// Pages are acquired up front; a short supply is fully returned before
    /// the call fails. On success each page is mapped at the next sequential
    /// virtual page with its own MMU call and moved into the region's
    /// ownership. Returns the chosen virtual base, or `Ok(None)` for a
    /// zero-size no-op.
    pub fn alloc<P, M>(
        &mut self,
        pool: &mut P,
        mmu: &mut M,
        name: &str,
        size: usize,
        placement: Placement,
        mmu_flags: MmuFlags,
    ) -> Result<Option<VirtualAddress>, VmError>
    where
        P: PhysicalPageAllocator + ?Sized,
        M: Mmu + ?Sized,
    {
        log::trace!(
            "alloc: aspace '{}' name '{name}' size {size:#x} placement {placement:?} \
             mmu_flags {mmu_flags}",
            self.name()
        );

        let size = page_align_up(size).ok_or(VmError::InvalidArgs)?;
        if size == 0 {
            return Ok(None);
        }
        let count = size / PAGE_SIZE;

        // Acquire the physical memory up front, in case it can't be satisfied.
        let obtained = pool.alloc_pages(count);
        let reservation = PageReservation::new(&mut *pool, obtained);
        if reservation.len() < count {
            log::debug!("asked for {count} pages, got {}", reservation.len());
            return Err(VmError::Exhausted);
        }

        let index = self.place_region(name, size, placement, mmu_flags)?;
        let vaddr = self.regions()[index].base();
        let pages = reservation.commit();

        let mut va = vaddr;
        let mut pages = pages.into_iter();
        while let Some(page) = pages.next() {
            debug_assert!(va <= self.regions()[index].end_inclusive());

            if mmu.map(va, page.paddr(), 1, mmu_flags).is_err() {
                // Unwind the partially installed run: drop the mapped
                // prefix, pull the region back out, and return every page
                // to the pool.
                let mapped = (va - vaddr) / PAGE_SIZE;
                mmu.unmap(vaddr, mapped);
                let region = self.remove_region(index);
                let mut unwind = region.into_pages();
                unwind.push(page);
                unwind.extend(pages);
                pool.free(unwind);
                return Err(VmError::Exhausted);
            }

            self.region_mut(index).push_page(page);
            va = va + PAGE_SIZE;
        }

        Ok(Some(vaddr))
    }

    /// Builds a region for the requested placement and splices it into the
    /// list, returning its index.
    fn place_region(
        &mut self,
        name: &str,
        size: usize,
        placement: Placement,
        mmu_flags: MmuFlags,
    ) -> Result<usize, VmError> {
        match placement {
            Placement::At(vaddr) => {
                if !vaddr.is_aligned(PAGE_SIZE) {
                    return Err(VmError::InvalidArgs);
                }
                let region = Region::new(name, vaddr, size, RegionKind::Mapped, mmu_flags);
                self.insert_region(region)
            }
            Placement::Any { align_pow2 } => {
                let (spot, index) = self
                    .find_spot(size, align_pow2)
                    .ok_or(VmError::Exhausted)?;
                let region = Region::new(name, spot, size, RegionKind::Mapped, mmu_flags);
                self.splice_region_at(index, region);
                Ok(index)
            }
        }
    }
}
