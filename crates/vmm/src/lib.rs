#![cfg_attr(not(any(test, feature = "software-emulation")), no_std)]

//! # Virtual Memory Manager (VMM)
//!
//! The virtual memory region allocator of the kernel. Given one or more
//! address spaces, it carves out non-overlapping virtual ranges, optionally
//! backs them with physical pages, and installs the resulting mappings
//! through an architecture-specific MMU layer. It provides:
//!
//! - Address spaces owning ordered, non-overlapping region lists.
//! - First-fit virtual gap search under alignment constraints.
//! - Reservation, physical mapping, and contiguous/scattered allocation with
//!   full rollback on partial failure.
//! - Software emulation of the MMU and physical pool for testing in
//!   non-kernel environments.

extern crate alloc;

mod address;
mod aspace;
mod cmd;
mod error;
mod mapping;
mod mmu;
mod page;
mod pool;
mod region;
mod registry;

pub use address::{PAGE_SIZE, PAGE_SIZE_SHIFT, PhysicalAddress, VirtualAddress};
pub use aspace::{AddressSpace, AspaceFlags};
pub use cmd::vmm_command;
pub use error::VmError;
pub use mapping::Placement;
pub use mmu::{MapError, Mmu, MmuFlags};
pub use page::{FrameNumber, PhysicalPage};
pub use pool::{ContiguousRun, PageReservation, PhysicalPageAllocator};
pub use region::{Region, RegionKind};
pub use registry::{
    AspaceRef, KERNEL_ASPACE_BASE, KERNEL_ASPACE_SIZE, aspaces, init, is_initialized,
    kernel_aspace, register,
};

#[cfg(any(test, feature = "software-emulation"))]
pub use mmu::SoftwareMmu;
#[cfg(any(test, feature = "software-emulation"))]
pub use pool::PagePool;
