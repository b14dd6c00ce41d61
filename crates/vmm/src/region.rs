//! Regions: the mapped or reserved sub-ranges of an address space.

use crate::address::{PAGE_SIZE, VirtualAddress, is_page_aligned};
use crate::mmu::MmuFlags;
use crate::page::PhysicalPage;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

/// What a region stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    /// A range claimed so nothing else is placed there, e.g. firmware or
    /// bootstrap mappings that must be left alone.
    Reserved,
    /// A range mapped to physical memory.
    Mapped,
}

/// One mapped or reserved virtual range within an address space.
///
/// A region's base is page-aligned and its size is a positive page multiple;
/// both are fixed at creation. The page list is non-empty only when the
/// allocator itself acquired the backing pages, in which case the region owns
/// them for its entire lifetime. Pages mapped from a caller-owned physical
/// range never appear here.
pub struct Region {
    name: String,
    base: VirtualAddress,
    size: usize,
    kind: RegionKind,
    mmu_flags: MmuFlags,
    pages: Vec<PhysicalPage>,
}

impl Region {
    /// Creates a region record. No address-space bookkeeping happens here;
    /// the region only becomes visible once inserted into a space.
    pub(crate) fn new(
        name: &str,
        base: VirtualAddress,
        size: usize,
        kind: RegionKind,
        mmu_flags: MmuFlags,
    ) -> Self {
        debug_assert!(base.is_aligned(PAGE_SIZE));
        debug_assert!(size > 0 && is_page_aligned(size));

        Self {
            name: String::from(name),
            base,
            size,
            kind,
            mmu_flags,
            pages: Vec::new(),
        }
    }

    /// Returns the region's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the region's base address.
    #[inline]
    pub fn base(&self) -> VirtualAddress {
        self.base
    }

    /// Returns the region's size in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Returns what the region stands for.
    pub fn kind(&self) -> RegionKind {
        self.kind
    }

    /// Returns the architecture mapping flags recorded for this region.
    pub fn mmu_flags(&self) -> MmuFlags {
        self.mmu_flags
    }

    /// Returns the last address covered by the region.
    #[inline]
    pub fn end_inclusive(&self) -> VirtualAddress {
        self.base + (self.size - 1)
    }

    /// Returns the pages this region owns.
    pub fn pages(&self) -> &[PhysicalPage] {
        &self.pages
    }

    /// Moves a page into the region's ownership.
    pub(crate) fn push_page(&mut self, page: PhysicalPage) {
        self.pages.push(page);
    }

    /// Moves a whole run of pages into the region's ownership.
    pub(crate) fn extend_pages(&mut self, pages: Vec<PhysicalPage>) {
        debug_assert!(self.pages.is_empty());
        self.pages = pages;
    }

    /// Consumes the region and returns the pages it owned, for handing back
    /// to the physical pool during teardown.
    pub(crate) fn into_pages(self) -> Vec<PhysicalPage> {
        self.pages
    }
}

impl fmt::Debug for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Region")
            .field("name", &self.name)
            .field("base", &self.base)
            .field("size", &self.size)
            .field("kind", &self.kind)
            .field("mmu_flags", &self.mmu_flags)
            .field("pages", &self.pages.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::{FrameNumber, PhysicalPage};

    #[test]
    fn end_inclusive() {
        let region = Region::new(
            "r",
            VirtualAddress::new(0x1000),
            2 * PAGE_SIZE,
            RegionKind::Reserved,
            MmuFlags::NONE,
        );
        assert_eq!(region.end_inclusive().as_usize(), 0x1000 + 2 * PAGE_SIZE - 1);
    }

    #[test]
    fn page_ownership() {
        let mut region = Region::new(
            "r",
            VirtualAddress::new(0x1000),
            PAGE_SIZE,
            RegionKind::Mapped,
            MmuFlags::NONE,
        );
        region.push_page(PhysicalPage::new(FrameNumber::new(9)));
        assert_eq!(region.pages().len(), 1);

        let pages = region.into_pages();
        assert_eq!(pages[0].frame().as_usize(), 9);
    }
}
