//! Address spaces and their region lists.
//!
//! An [`AddressSpace`] owns an ordered collection of non-overlapping
//! [`Region`]s within a fixed virtual base and size. This module carries the
//! two invariant-bearing algorithms of the allocator: splicing a region into
//! the ordered list ([`insert_region`](AddressSpace::insert_region)) and the
//! first-fit gap search ([`find_spot`](AddressSpace::find_spot)). The public
//! allocation operations compose them from the `mapping` module.

use crate::address::{PAGE_SIZE, PAGE_SIZE_SHIFT, VirtualAddress, is_page_aligned};
use crate::error::VmError;
use crate::region::Region;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;
use core::ops::BitOr;

/// Flags describing an address space.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct AspaceFlags(u32);

impl AspaceFlags {
    /// No flags set.
    pub const NONE: Self = Self(0);

    /// The kernel's own address space.
    pub const KERNEL: Self = Self(1 << 0);

    /// Returns true if every bit of `other` is set in `self`.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns the raw flag bits.
    pub const fn bits(self) -> u32 {
        self.0
    }
}

impl BitOr for AspaceFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// A named virtual address range owning an ordered set of non-overlapping
/// regions.
///
/// The region list is kept strictly ascending by base, and every region lies
/// fully inside `[base, base + size - 1]`. Those invariants hold after every
/// public operation; the allocation operations in this crate rely on them.
pub struct AddressSpace {
    name: String,
    base: VirtualAddress,
    size: usize,
    flags: AspaceFlags,
    regions: Vec<Region>,
}

impl AddressSpace {
    /// Creates an empty address space covering `[base, base + size - 1]`.
    ///
    /// The base must be page-aligned and the size a positive page multiple;
    /// the range must not wrap the address width.
    pub fn new(
        name: &str,
        base: VirtualAddress,
        size: usize,
        flags: AspaceFlags,
    ) -> Result<Self, VmError> {
        if !base.is_aligned(PAGE_SIZE) || size == 0 || !is_page_aligned(size) {
            return Err(VmError::InvalidArgs);
        }
        if base.checked_add(size - 1).is_none() {
            return Err(VmError::OutOfRange);
        }

        Ok(Self {
            name: String::from(name),
            base,
            size,
            flags,
            regions: Vec::new(),
        })
    }

    /// Returns the address space's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the base address of the space.
    #[inline]
    pub fn base(&self) -> VirtualAddress {
        self.base
    }

    /// Returns the size of the space in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Returns the address space's flags.
    pub fn flags(&self) -> AspaceFlags {
        self.flags
    }

    /// Returns the last address covered by the space.
    #[inline]
    pub fn end_inclusive(&self) -> VirtualAddress {
        self.base + (self.size - 1)
    }

    /// Returns the regions of this space, ascending by base.
    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    /// Returns true if `vaddr` lies inside the space.
    #[inline]
    pub fn contains(&self, vaddr: VirtualAddress) -> bool {
        vaddr >= self.base && vaddr <= self.end_inclusive()
    }

    /// Returns true if the whole range `[vaddr, vaddr + size - 1]` lies
    /// inside the space. A range whose end would wrap is outside.
    pub fn contains_range(&self, vaddr: VirtualAddress, size: usize) -> bool {
        if !self.contains(vaddr) {
            return false;
        }
        if size == 0 {
            return true;
        }
        match vaddr.checked_add(size - 1) {
            Some(end) => end <= self.end_inclusive(),
            None => false,
        }
    }

    /// Clamps `size` so that the range starting at `vaddr` neither wraps nor
    /// extends past the end of the space.
    ///
    /// `vaddr` must lie inside the space.
    pub(crate) fn trim_to_aspace(&self, vaddr: VirtualAddress, size: usize) -> usize {
        debug_assert!(self.contains(vaddr));

        if size == 0 {
            return 0;
        }

        let offset = vaddr - self.base;

        // If vaddr + size would wrap, shrink to the largest representable
        // range first, then clamp to the space below.
        let size = if offset.checked_add(size).is_none() {
            usize::MAX - offset
        } else {
            size
        };

        if offset + size > self.size {
            self.size - offset
        } else {
            size
        }
    }

    /// Splices `region` into the ordered list, returning the index it was
    /// inserted at.
    ///
    /// Placement has already been decided by the caller; this only validates
    /// bounds and finds the splice point. Fails with `OutOfRange` if the
    /// region does not lie fully inside the space and `Exhausted` if the
    /// exact range collides with an existing region.
    pub(crate) fn insert_region(&mut self, region: Region) -> Result<usize, VmError> {
        if region.size() == 0 || !self.contains_range(region.base(), region.size()) {
            log::trace!(
                "region '{}' [{}, size {:#x}] out of range of aspace '{}'",
                region.name(),
                region.base(),
                region.size(),
                self.name
            );
            return Err(VmError::OutOfRange);
        }

        let r_end = region.end_inclusive();

        // Fits in front of the whole list?
        match self.regions.first() {
            None => {
                self.regions.push(region);
                return Ok(0);
            }
            Some(first) if r_end < first.base() => {
                self.regions.insert(0, region);
                return Ok(0);
            }
            Some(_) => {}
        }

        // Walk the list looking for a gap between current and next.
        for i in 0..self.regions.len() {
            if region.base() > self.regions[i].end_inclusive() {
                let fits_before_next = match self.regions.get(i + 1) {
                    None => true,
                    Some(next) => r_end < next.base(),
                };
                if fits_before_next {
                    self.regions.insert(i + 1, region);
                    return Ok(i + 1);
                }
            }
        }

        log::trace!(
            "no slot for region '{}' [{}, size {:#x}] in aspace '{}'",
            region.name(),
            region.base(),
            region.size(),
            self.name
        );
        Err(VmError::Exhausted)
    }

    /// Removes and returns the region at `index`. Used only to unwind a
    /// freshly spliced region when a later allocation step fails.
    pub(crate) fn remove_region(&mut self, index: usize) -> Region {
        self.regions.remove(index)
    }

    /// Returns the region at `index` mutably, for moving acquired pages into
    /// it after a successful mapping step.
    pub(crate) fn region_mut(&mut self, index: usize) -> &mut Region {
        &mut self.regions[index]
    }

    /// Splices `region` at a position already computed by
    /// [`find_spot`](Self::find_spot), skipping the gap scan.
    pub(crate) fn splice_region_at(&mut self, index: usize, region: Region) {
        debug_assert!(index <= self.regions.len());
        debug_assert!(self.contains_range(region.base(), region.size()));
        self.regions.insert(index, region);
    }

    /// First-fit search for the lowest free gap of `size` bytes aligned to
    /// `2^align_pow2`.
    ///
    /// `size` must be a positive page multiple. Alignments below the page
    /// size are promoted to page alignment. On success returns the spot and
    /// the index at which the new region must be spliced to keep the list
    /// ordered. Returns None when no such gap exists; that is a plain "no
    /// spot", not an address-space error.
    pub fn find_spot(&self, size: usize, align_pow2: u8) -> Option<(VirtualAddress, usize)> {
        debug_assert!(size > 0 && is_page_aligned(size));

        let align_pow2 = align_pow2.max(PAGE_SIZE_SHIFT);
        if u32::from(align_pow2) >= usize::BITS {
            // Alignment coarser than the address width; nothing can satisfy it.
            return None;
        }
        let align = 1usize << align_pow2;

        let spot = self.base.checked_align_up(align)?;
        if !self.contains(spot) {
            // The alignment is so big we cannot even start inside this space.
            return None;
        }

        match self.regions.first() {
            Some(first) => {
                // Does it fit before the first region?
                if spot < first.base() && first.base() - spot >= size {
                    return Some((spot, 0));
                }
            }
            None => {
                // Nothing in the list; does it fit in the space at all?
                if self.size - (spot - self.base) >= size {
                    return Some((spot, 0));
                }
                return None;
            }
        }

        // Search the gaps after each region.
        for i in 0..self.regions.len() {
            let r = &self.regions[i];

            let end = r.base().checked_add(r.size())?;
            let spot = end.checked_align_up(align)?;
            if !self.contains(spot) {
                return None;
            }

            match self.regions.get(i + 1) {
                Some(next) => {
                    // Aligned spot landed at or inside the next region; no
                    // gap here.
                    if spot >= next.base() {
                        continue;
                    }
                    if next.base() - spot >= size {
                        return Some((spot, i + 1));
                    }
                }
                None => {
                    // Last region; fit against the end of the space.
                    if self.size - (spot - self.base) >= size {
                        return Some((spot, i + 1));
                    }
                }
            }
        }

        None
    }
}

impl fmt::Debug for AddressSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddressSpace")
            .field("name", &self.name)
            .field("base", &self.base)
            .field("size", &self.size)
            .field("flags", &self.flags)
            .field("regions", &self.regions.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mmu::MmuFlags;
    use crate::region::RegionKind;

    const BASE: usize = 0x1000_0000;
    const SIZE: usize = 0x0100_0000;

    fn aspace() -> AddressSpace {
        AddressSpace::new("test", VirtualAddress::new(BASE), SIZE, AspaceFlags::NONE).unwrap()
    }

    fn region(base: usize, size: usize) -> Region {
        Region::new(
            "r",
            VirtualAddress::new(base),
            size,
            RegionKind::Reserved,
            MmuFlags::NONE,
        )
    }

    /// Asserts the region list is strictly ascending and pairwise
    /// non-overlapping, and that every region is inside the space.
    fn assert_invariants(aspace: &AddressSpace) {
        for r in aspace.regions() {
            assert!(r.base() >= aspace.base());
            assert!(r.end_inclusive() <= aspace.end_inclusive());
        }
        for pair in aspace.regions().windows(2) {
            assert!(pair[0].end_inclusive() < pair[1].base());
        }
    }

    mod construction {
        use super::*;

        #[test]
        fn rejects_misaligned_base() {
            let err = AddressSpace::new(
                "bad",
                VirtualAddress::new(BASE + 1),
                SIZE,
                AspaceFlags::NONE,
            )
            .unwrap_err();
            assert_eq!(err, VmError::InvalidArgs);
        }

        #[test]
        fn rejects_zero_size() {
            let err =
                AddressSpace::new("bad", VirtualAddress::new(BASE), 0, AspaceFlags::NONE)
                    .unwrap_err();
            assert_eq!(err, VmError::InvalidArgs);
        }

        #[test]
        fn rejects_wrapping_range() {
            let err = AddressSpace::new(
                "bad",
                VirtualAddress::new(usize::MAX - PAGE_SIZE + 1),
                2 * PAGE_SIZE,
                AspaceFlags::NONE,
            )
            .unwrap_err();
            assert_eq!(err, VmError::OutOfRange);
        }
    }

    mod contains {
        use super::*;

        #[test]
        fn bounds() {
            let a = aspace();
            assert!(a.contains(VirtualAddress::new(BASE)));
            assert!(a.contains(VirtualAddress::new(BASE + SIZE - 1)));
            assert!(!a.contains(VirtualAddress::new(BASE - 1)));
            assert!(!a.contains(VirtualAddress::new(BASE + SIZE)));
        }

        #[test]
        fn range_wraparound_rejected() {
            let a = AddressSpace::new(
                "top",
                VirtualAddress::new(usize::MAX - 16 * PAGE_SIZE + 1),
                16 * PAGE_SIZE,
                AspaceFlags::NONE,
            )
            .unwrap();
            assert!(!a.contains_range(a.base(), usize::MAX));
        }
    }

    mod trim {
        use super::*;

        #[test]
        fn leaves_fitting_size_alone() {
            let a = aspace();
            let size = a.trim_to_aspace(VirtualAddress::new(BASE + PAGE_SIZE), 4 * PAGE_SIZE);
            assert_eq!(size, 4 * PAGE_SIZE);
        }

        #[test]
        fn clamps_to_space_end() {
            let a = aspace();
            let vaddr = VirtualAddress::new(BASE + SIZE - PAGE_SIZE);
            assert_eq!(a.trim_to_aspace(vaddr, 4 * PAGE_SIZE), PAGE_SIZE);
        }

        #[test]
        fn exact_fit_not_grown() {
            let a = aspace();
            let vaddr = VirtualAddress::new(BASE + SIZE - 2 * PAGE_SIZE);
            assert_eq!(a.trim_to_aspace(vaddr, 2 * PAGE_SIZE), 2 * PAGE_SIZE);
        }

        #[test]
        fn clamps_wrapping_size() {
            let a = aspace();
            let vaddr = VirtualAddress::new(BASE + PAGE_SIZE);
            let size = a.trim_to_aspace(vaddr, usize::MAX);
            assert_eq!(size, SIZE - PAGE_SIZE);
        }

        #[test]
        fn never_extends_past_end() {
            let a = aspace();
            for offset in [0, PAGE_SIZE, SIZE - PAGE_SIZE] {
                for request in [PAGE_SIZE, SIZE, usize::MAX - 7, usize::MAX] {
                    let vaddr = VirtualAddress::new(BASE + offset);
                    let trimmed = a.trim_to_aspace(vaddr, request);
                    assert!(trimmed <= request);
                    assert!(offset + trimmed <= SIZE);
                }
            }
        }
    }

    mod insert {
        use super::*;

        #[test]
        fn into_empty_list() {
            let mut a = aspace();
            assert_eq!(a.insert_region(region(BASE, PAGE_SIZE)), Ok(0));
            assert_invariants(&a);
        }

        #[test]
        fn before_head() {
            let mut a = aspace();
            a.insert_region(region(BASE + 4 * PAGE_SIZE, PAGE_SIZE)).unwrap();
            assert_eq!(a.insert_region(region(BASE, PAGE_SIZE)), Ok(0));
            assert_invariants(&a);
        }

        #[test]
        fn between_and_after() {
            let mut a = aspace();
            a.insert_region(region(BASE, PAGE_SIZE)).unwrap();
            a.insert_region(region(BASE + 8 * PAGE_SIZE, PAGE_SIZE)).unwrap();
            assert_eq!(
                a.insert_region(region(BASE + 4 * PAGE_SIZE, PAGE_SIZE)),
                Ok(1)
            );
            assert_eq!(
                a.insert_region(region(BASE + 16 * PAGE_SIZE, PAGE_SIZE)),
                Ok(3)
            );
            assert_invariants(&a);
        }

        #[test]
        fn overlap_is_exhausted() {
            let mut a = aspace();
            a.insert_region(region(BASE, 2 * PAGE_SIZE)).unwrap();
            assert_eq!(
                a.insert_region(region(BASE + PAGE_SIZE, PAGE_SIZE)),
                Err(VmError::Exhausted)
            );
            assert_eq!(a.regions().len(), 1);
        }

        #[test]
        fn outside_space_is_out_of_range() {
            let mut a = aspace();
            assert_eq!(
                a.insert_region(region(BASE + SIZE, PAGE_SIZE)),
                Err(VmError::OutOfRange)
            );
            // Starts inside but runs past the end.
            assert_eq!(
                a.insert_region(region(BASE + SIZE - PAGE_SIZE, 2 * PAGE_SIZE)),
                Err(VmError::OutOfRange)
            );
        }

        #[test]
        fn ordered_after_scrambled_inserts() {
            // Pseudo-random insert sequence; failures are allowed, but the
            // list must stay sorted and non-overlapping throughout.
            let mut a = aspace();
            let mut state: usize = 0x2545_F491;
            for _ in 0..200 {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                let page = (state >> 16) % (SIZE / PAGE_SIZE);
                let pages = 1 + (state >> 40) % 8;
                let _ = a.insert_region(region(BASE + page * PAGE_SIZE, pages * PAGE_SIZE));
                assert_invariants(&a);
            }
            assert!(!a.regions().is_empty());
        }
    }

    mod find_spot {
        use super::*;

        #[test]
        fn empty_space_returns_base() {
            let a = aspace();
            let (spot, index) = a.find_spot(PAGE_SIZE, 0).unwrap();
            assert_eq!(spot.as_usize(), BASE);
            assert_eq!(index, 0);
        }

        #[test]
        fn after_existing_regions() {
            let mut a = aspace();
            a.insert_region(region(BASE, 2 * PAGE_SIZE)).unwrap();
            let (spot, index) = a.find_spot(PAGE_SIZE, 0).unwrap();
            assert_eq!(spot.as_usize(), BASE + 2 * PAGE_SIZE);
            assert_eq!(index, 1);
        }

        #[test]
        fn first_fit_prefers_lowest_gap() {
            let mut a = aspace();
            a.insert_region(region(BASE + 2 * PAGE_SIZE, PAGE_SIZE)).unwrap();
            // Gap of two pages in front of the first region.
            let (spot, index) = a.find_spot(2 * PAGE_SIZE, 0).unwrap();
            assert_eq!(spot.as_usize(), BASE);
            assert_eq!(index, 0);
        }

        #[test]
        fn skips_too_small_gaps() {
            let mut a = aspace();
            a.insert_region(region(BASE, PAGE_SIZE)).unwrap();
            a.insert_region(region(BASE + 2 * PAGE_SIZE, PAGE_SIZE)).unwrap();
            // One-page gap between the regions is too small for two pages.
            let (spot, index) = a.find_spot(2 * PAGE_SIZE, 0).unwrap();
            assert_eq!(spot.as_usize(), BASE + 3 * PAGE_SIZE);
            assert_eq!(index, 2);
        }

        #[test]
        fn alignment_promoted_to_page_size() {
            let a = aspace();
            let (spot, _) = a.find_spot(PAGE_SIZE, 3).unwrap();
            assert!(spot.is_aligned(PAGE_SIZE));
        }

        #[test]
        fn respects_requested_alignment() {
            let mut a = aspace();
            a.insert_region(region(BASE, PAGE_SIZE)).unwrap();
            let (spot, _) = a.find_spot(PAGE_SIZE, 16).unwrap();
            assert!(spot.is_aligned(1 << 16));
            assert!(spot.as_usize() > BASE);
        }

        #[test]
        fn alignment_coarser_than_space_fails() {
            // 2^30 alignment inside a 16 MiB space starting at 0x1000_0000;
            // the only aligned candidate below the space is 0x4000_0000,
            // outside it.
            let a = aspace();
            assert!(a.find_spot(PAGE_SIZE, 30).is_none());
        }

        #[test]
        fn full_space_fails() {
            let mut a = aspace();
            a.insert_region(region(BASE, SIZE)).unwrap();
            assert!(a.find_spot(PAGE_SIZE, 0).is_none());
        }

        #[test]
        fn spot_never_overlaps_existing_regions() {
            let mut a = aspace();
            for page in [0usize, 3, 4, 9, 100] {
                a.insert_region(region(BASE + page * PAGE_SIZE, PAGE_SIZE)).unwrap();
            }
            for pages in 1..6 {
                if let Some((spot, _)) = a.find_spot(pages * PAGE_SIZE, 0) {
                    let end = spot + (pages * PAGE_SIZE - 1);
                    assert!(spot >= a.base());
                    assert!(end <= a.end_inclusive());
                    for r in a.regions() {
                        assert!(end < r.base() || spot > r.end_inclusive());
                    }
                }
            }
        }
    }
}
