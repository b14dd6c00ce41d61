//! Architecture MMU contract.
//!
//! The allocator never touches page tables itself; it installs and inspects
//! mappings through the [`Mmu`] trait. Flag bits are opaque at this layer and
//! are forwarded to the architecture untouched.

use crate::address::{PhysicalAddress, VirtualAddress};
use core::fmt;
use core::ops::{BitOr, BitOrAssign};

/// Architecture-specific mapping flags.
///
/// An opaque bit set controlling cacheability and access permissions of an
/// installed mapping. The allocator only stores and forwards these bits; the
/// architecture layer assigns their meaning.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct MmuFlags(u32);

impl MmuFlags {
    /// No flags set; the architecture's default mapping attributes.
    pub const NONE: Self = Self(0);

    /// Conventional bit for uncached device memory, used when mapping
    /// peripheral physical ranges.
    pub const UNCACHED_DEVICE: Self = Self(1 << 0);

    /// Creates flags from raw architecture bits.
    #[inline]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Returns the raw architecture bits.
    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }
}

impl BitOr for MmuFlags {
    type Output = Self;

    #[inline]
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for MmuFlags {
    #[inline]
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for MmuFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Failure to install a mapping, typically because the architecture could not
/// allocate a page-table node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapError;

impl fmt::Display for MapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("failed to install mapping")
    }
}

/// The architecture MMU layer.
///
/// Implementations install, remove, and inspect page-table mappings for the
/// current address space. All addresses handed to these methods are
/// page-aligned; that is a precondition enforced by the allocator, not
/// re-checked here.
pub trait Mmu {
    /// Maps `page_count` consecutive virtual pages starting at `vaddr` to
    /// consecutive physical pages starting at `paddr`.
    fn map(
        &mut self,
        vaddr: VirtualAddress,
        paddr: PhysicalAddress,
        page_count: usize,
        flags: MmuFlags,
    ) -> Result<(), MapError>;

    /// Removes the mappings for `page_count` consecutive virtual pages
    /// starting at `vaddr`. Unmapped pages in the range are ignored.
    fn unmap(&mut self, vaddr: VirtualAddress, page_count: usize);

    /// Returns the physical address and flags currently mapped at `vaddr`,
    /// or None if the page is unmapped.
    fn query(&self, vaddr: VirtualAddress) -> Option<(PhysicalAddress, MmuFlags)>;
}

#[cfg(any(test, feature = "software-emulation"))]
mod software {
    //! Software emulation of the MMU for testing and development.
    //!
    //! Rather than a scale model of hardware page tables, this keeps a flat
    //! map of page mappings. That is enough to observe everything the
    //! allocator does: which pages got mapped, to which frames, with which
    //! flags, and in what order.

    use super::{MapError, Mmu, MmuFlags};
    use crate::address::{PAGE_SIZE, PhysicalAddress, VirtualAddress};
    use alloc::collections::BTreeMap;

    /// A software-emulated MMU backed by a flat mapping table.
    pub struct SoftwareMmu {
        mappings: BTreeMap<usize, (PhysicalAddress, MmuFlags)>,
        /// Maximum number of mappings before `map` reports failure, to
        /// simulate page-table node exhaustion. None means unlimited.
        capacity: Option<usize>,
    }

    impl SoftwareMmu {
        /// Creates an emulated MMU with no mappings and no capacity limit.
        pub fn new() -> Self {
            Self {
                mappings: BTreeMap::new(),
                capacity: None,
            }
        }

        /// Creates an emulated MMU that fails to map once it holds
        /// `capacity` page mappings.
        pub fn with_capacity_limit(capacity: usize) -> Self {
            Self {
                mappings: BTreeMap::new(),
                capacity: Some(capacity),
            }
        }

        /// Returns the number of pages currently mapped.
        pub fn mapped_pages(&self) -> usize {
            self.mappings.len()
        }
    }

    impl Default for SoftwareMmu {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Mmu for SoftwareMmu {
        fn map(
            &mut self,
            vaddr: VirtualAddress,
            paddr: PhysicalAddress,
            page_count: usize,
            flags: MmuFlags,
        ) -> Result<(), MapError> {
            debug_assert!(vaddr.is_aligned(PAGE_SIZE));
            debug_assert!(paddr.is_aligned(PAGE_SIZE));

            for i in 0..page_count {
                if let Some(limit) = self.capacity {
                    if self.mappings.len() >= limit {
                        return Err(MapError);
                    }
                }
                let va = vaddr.as_usize() + i * PAGE_SIZE;
                let pa = paddr + i * PAGE_SIZE;
                self.mappings.insert(va, (pa, flags));
            }
            Ok(())
        }

        fn unmap(&mut self, vaddr: VirtualAddress, page_count: usize) {
            debug_assert!(vaddr.is_aligned(PAGE_SIZE));

            for i in 0..page_count {
                self.mappings.remove(&(vaddr.as_usize() + i * PAGE_SIZE));
            }
        }

        fn query(&self, vaddr: VirtualAddress) -> Option<(PhysicalAddress, MmuFlags)> {
            let page = vaddr.align_down(PAGE_SIZE);
            self.mappings.get(&page.as_usize()).copied()
        }
    }
}

#[cfg(any(test, feature = "software-emulation"))]
pub use software::SoftwareMmu;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::PAGE_SIZE;

    #[test]
    fn map_and_query() {
        let mut mmu = SoftwareMmu::new();
        let va = VirtualAddress::new(0x1000);
        let pa = PhysicalAddress::new(0x8000);

        mmu.map(va, pa, 2, MmuFlags::NONE).unwrap();
        assert_eq!(mmu.query(va), Some((pa, MmuFlags::NONE)));
        assert_eq!(
            mmu.query(va + PAGE_SIZE),
            Some((pa + PAGE_SIZE, MmuFlags::NONE))
        );
        assert_eq!(mmu.query(va + 2 * PAGE_SIZE), None);
    }

    #[test]
    fn query_rounds_down_to_page() {
        let mut mmu = SoftwareMmu::new();
        let va = VirtualAddress::new(0x1000);
        let pa = PhysicalAddress::new(0x8000);

        mmu.map(va, pa, 1, MmuFlags::UNCACHED_DEVICE).unwrap();
        assert_eq!(
            mmu.query(va + 0x123),
            Some((pa, MmuFlags::UNCACHED_DEVICE))
        );
    }

    #[test]
    fn unmap_removes_mappings() {
        let mut mmu = SoftwareMmu::new();
        let va = VirtualAddress::new(0x1000);
        let pa = PhysicalAddress::new(0x8000);

        mmu.map(va, pa, 3, MmuFlags::NONE).unwrap();
        mmu.unmap(va, 2);
        assert_eq!(mmu.query(va), None);
        assert_eq!(mmu.query(va + 2 * PAGE_SIZE), Some((pa + 2 * PAGE_SIZE, MmuFlags::NONE)));
    }

    #[test]
    fn capacity_limit_fails_mid_run() {
        let mut mmu = SoftwareMmu::with_capacity_limit(2);
        let va = VirtualAddress::new(0x1000);
        let pa = PhysicalAddress::new(0x8000);

        assert_eq!(mmu.map(va, pa, 4, MmuFlags::NONE), Err(MapError));
        // The first two pages were installed before the failure.
        assert_eq!(mmu.mapped_pages(), 2);
    }

    #[test]
    fn flag_bits_round_trip() {
        let flags = MmuFlags::from_bits(0xA5) | MmuFlags::UNCACHED_DEVICE;
        assert_eq!(flags.bits(), 0xA5 | 1);
    }
}
