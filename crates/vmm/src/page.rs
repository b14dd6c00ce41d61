//! Physical page handles.
//!
//! A [`PhysicalPage`] is an owned handle to exactly one physical frame. The
//! handle is deliberately neither `Clone` nor `Copy`: a page is owned by
//! exactly one of the physical pool's free list or a region's page list, and
//! moving the handle is the only way to transfer that ownership.

use crate::address::{PAGE_SIZE, PhysicalAddress};
use core::fmt;
use core::ops::{Add, Sub};

/// A physical memory frame number.
///
/// Frame numbers are zero-indexed and correspond to `PAGE_SIZE`-aligned
/// physical addresses.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct FrameNumber(usize);

impl FrameNumber {
    /// Creates a new frame number.
    #[inline]
    pub const fn new(number: usize) -> Self {
        Self(number)
    }

    /// Returns the raw frame number.
    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0
    }

    /// Returns the physical address at the start of this frame.
    #[inline]
    pub const fn start(self) -> PhysicalAddress {
        PhysicalAddress::new(self.0 * PAGE_SIZE)
    }

    /// Returns the physical address at the end of this frame (start of the
    /// next frame).
    #[inline]
    pub const fn end(self) -> PhysicalAddress {
        PhysicalAddress::new((self.0 + 1) * PAGE_SIZE)
    }
}

impl fmt::Debug for FrameNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FrameNumber({})", self.0)
    }
}

impl fmt::Display for FrameNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Add<usize> for FrameNumber {
    type Output = Self;

    #[inline]
    fn add(self, rhs: usize) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl Sub<FrameNumber> for FrameNumber {
    type Output = usize;

    #[inline]
    fn sub(self, rhs: FrameNumber) -> Self::Output {
        self.0 - rhs.0
    }
}

impl From<PhysicalAddress> for FrameNumber {
    #[inline]
    fn from(addr: PhysicalAddress) -> Self {
        Self::new(addr.as_usize() / PAGE_SIZE)
    }
}

/// An owned handle to one physical page.
///
/// Holding a `PhysicalPage` means owning the underlying frame. Handles are
/// created by the physical pool and travel by move into a region's page list
/// (when the allocator acquires backing memory) or back into the pool on
/// `free`.
#[derive(PartialEq, Eq, PartialOrd, Ord)]
pub struct PhysicalPage {
    frame: FrameNumber,
}

impl PhysicalPage {
    /// Creates a handle for the given frame.
    ///
    /// Callers must ensure that no other handle for the same frame exists;
    /// the physical pool is the only expected creator.
    pub const fn new(frame: FrameNumber) -> Self {
        Self { frame }
    }

    /// Returns the frame this page occupies.
    #[inline]
    pub const fn frame(&self) -> FrameNumber {
        self.frame
    }

    /// Returns the base physical address of this page.
    #[inline]
    pub const fn paddr(&self) -> PhysicalAddress {
        self.frame.start()
    }
}

impl fmt::Debug for PhysicalPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysicalPage({:#x})", self.paddr().as_usize())
    }
}
