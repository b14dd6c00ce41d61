//! Address types for physical and virtual memory management.
//!
//! This module provides architecture-independent wrappers around physical and
//! virtual addresses, plus the page-size constants used throughout the crate.

use core::fmt;
use core::ops::{Add, Sub};

/// Size of a page in bytes.
pub const PAGE_SIZE: usize = 4096;

/// Log2 of the page size.
pub const PAGE_SIZE_SHIFT: u8 = 12;

/// Returns true if `value` is a multiple of the page size.
#[inline]
pub const fn is_page_aligned(value: usize) -> bool {
    value & (PAGE_SIZE - 1) == 0
}

/// Rounds `value` up to the next page multiple, or None if that would overflow.
#[inline]
pub const fn page_align_up(value: usize) -> Option<usize> {
    match value.checked_add(PAGE_SIZE - 1) {
        Some(v) => Some(v & !(PAGE_SIZE - 1)),
        None => None,
    }
}

/// Macro to define common address type functionality.
///
/// This macro generates the basic structure and methods common to both
/// physical and virtual address types, reducing code duplication.
macro_rules! impl_address_common {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[repr(transparent)]
        pub struct $name(usize);

        impl $name {
            /// Creates a new address.
            #[inline]
            pub const fn new(addr: usize) -> Self {
                Self(addr)
            }

            /// Returns the raw address value.
            #[inline]
            pub const fn as_usize(self) -> usize {
                self.0
            }

            /// Checks if the address is aligned to the given alignment.
            ///
            /// # Panics
            ///
            /// Panics if `align` is not a power of two.
            #[inline]
            pub const fn is_aligned(self, align: usize) -> bool {
                assert!(align.is_power_of_two(), "alignment must be a power of two");
                self.0 & (align - 1) == 0
            }

            /// Aligns the address down to the given alignment.
            ///
            /// # Panics
            ///
            /// Panics if `align` is not a power of two.
            #[inline]
            pub const fn align_down(self, align: usize) -> Self {
                assert!(align.is_power_of_two(), "alignment must be a power of two");
                Self(self.0 & !(align - 1))
            }

            /// Aligns the address up to the given alignment, returning None if
            /// the aligned address would overflow.
            ///
            /// # Panics
            ///
            /// Panics if `align` is not a power of two.
            #[inline]
            pub const fn checked_align_up(self, align: usize) -> Option<Self> {
                assert!(align.is_power_of_two(), "alignment must be a power of two");
                match self.0.checked_add(align - 1) {
                    Some(v) => Some(Self(v & !(align - 1))),
                    None => None,
                }
            }

            /// Adds an offset to the address, returning None on overflow.
            #[inline]
            pub const fn checked_add(self, offset: usize) -> Option<Self> {
                match self.0.checked_add(offset) {
                    Some(v) => Some(Self(v)),
                    None => None,
                }
            }
        }

        impl fmt::Pointer for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:p}", self.0 as *const u8)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({:#x})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:#x}", self.0)
            }
        }

        impl Add<usize> for $name {
            type Output = Self;

            #[inline]
            fn add(self, rhs: usize) -> Self::Output {
                Self(self.0 + rhs)
            }
        }

        impl Sub<usize> for $name {
            type Output = Self;

            #[inline]
            fn sub(self, rhs: usize) -> Self::Output {
                Self(self.0 - rhs)
            }
        }

        impl Sub<$name> for $name {
            type Output = usize;

            #[inline]
            fn sub(self, rhs: $name) -> Self::Output {
                self.0 - rhs.0
            }
        }
    };
}

impl_address_common!(
    PhysicalAddress,
    "A physical memory address.\n\n\
     Identifies a location in physical memory, before any MMU translation."
);

impl_address_common!(
    VirtualAddress,
    "A virtual memory address.\n\n\
     Identifies a location in some address space; only meaningful relative to\n\
     the page tables installed for that space."
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alignment_checks() {
        let addr = VirtualAddress::new(0x1000);
        assert!(addr.is_aligned(0x1000));
        assert!(addr.is_aligned(0x10));
        assert!(!addr.is_aligned(0x2000));
    }

    #[test]
    fn align_up_and_down() {
        let addr = VirtualAddress::new(0x1234);
        assert_eq!(addr.align_down(0x1000).as_usize(), 0x1000);
        assert_eq!(
            addr.checked_align_up(0x1000).unwrap().as_usize(),
            0x2000
        );
    }

    #[test]
    fn align_up_overflow() {
        let addr = VirtualAddress::new(usize::MAX - 5);
        assert!(addr.checked_align_up(0x1000).is_none());
    }

    #[test]
    fn checked_add_overflow() {
        let addr = VirtualAddress::new(usize::MAX);
        assert!(addr.checked_add(1).is_none());
        assert_eq!(addr.checked_add(0), Some(addr));
    }

    #[test]
    fn arithmetic() {
        let a = PhysicalAddress::new(0x3000);
        let b = PhysicalAddress::new(0x1000);
        assert_eq!(a - b, 0x2000);
        assert_eq!((b + 0x500).as_usize(), 0x1500);
        assert_eq!((a - 0x1000).as_usize(), 0x2000);
    }

    #[test]
    fn page_helpers() {
        assert!(is_page_aligned(0));
        assert!(is_page_aligned(PAGE_SIZE * 3));
        assert!(!is_page_aligned(PAGE_SIZE + 1));
        assert_eq!(page_align_up(1), Some(PAGE_SIZE));
        assert_eq!(page_align_up(PAGE_SIZE), Some(PAGE_SIZE));
        assert_eq!(page_align_up(usize::MAX), None);
    }
}
