//! Process-wide registry of address spaces.
//!
//! The registry is initialized once at boot with the kernel address space and
//! then only grows. Every address space is handed out behind its own
//! `spin::Mutex`; callers hold that lock for the whole of an allocation call
//! so placement and commit are atomic with respect to other callers.
//!
//! In test and software-emulation builds the registry is thread-local so each
//! test gets its own isolated instance.

use crate::address::VirtualAddress;
use crate::aspace::{AddressSpace, AspaceFlags};
use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::{Mutex, Once, RwLock};

/// Base of the kernel address space.
pub const KERNEL_ASPACE_BASE: usize = 0xffff_ffff_8000_0000;

/// Size of the kernel address space (1 GiB).
pub const KERNEL_ASPACE_SIZE: usize = 0x4000_0000;

/// A shared, lockable handle to a registered address space.
pub type AspaceRef = Arc<Mutex<AddressSpace>>;

struct Registry {
    /// All registered address spaces; index 0 is always the kernel's.
    aspaces: RwLock<Vec<AspaceRef>>,
}

#[cfg(not(any(test, feature = "software-emulation")))]
static REGISTRY: Once<Registry> = Once::new();

#[cfg(any(test, feature = "software-emulation"))]
std::thread_local! {
    static REGISTRY: Once<Registry> = Once::new();
}

fn with_registry<R>(f: impl FnOnce(&Registry) -> R) -> R {
    #[cfg(not(any(test, feature = "software-emulation")))]
    {
        f(REGISTRY
            .get()
            .expect("address space registry not initialized; call vmm::init during boot"))
    }

    #[cfg(any(test, feature = "software-emulation"))]
    {
        REGISTRY.with(|r| {
            f(r.get()
                .expect("address space registry not initialized; call vmm::init during boot"))
        })
    }
}

/// Initializes the registry with the kernel address space.
///
/// Must be called exactly once during boot, before any other registry access.
///
/// # Panics
///
/// Panics if called twice.
pub fn init() {
    let kernel = AddressSpace::new(
        "kernel",
        VirtualAddress::new(KERNEL_ASPACE_BASE),
        KERNEL_ASPACE_SIZE,
        AspaceFlags::KERNEL,
    )
    .expect("kernel address space constants are page-aligned and non-wrapping");

    let registry = Registry {
        aspaces: RwLock::new(alloc::vec![Arc::new(Mutex::new(kernel))]),
    };

    #[cfg(not(any(test, feature = "software-emulation")))]
    {
        if REGISTRY.get().is_some() {
            panic!("address space registry already initialized");
        }
        REGISTRY.call_once(|| registry);
    }

    #[cfg(any(test, feature = "software-emulation"))]
    {
        REGISTRY.with(|r| {
            if r.get().is_some() {
                panic!("address space registry already initialized");
            }
            r.call_once(|| registry);
        });
    }
}

/// Returns true if [`init`] has run.
pub fn is_initialized() -> bool {
    #[cfg(not(any(test, feature = "software-emulation")))]
    {
        REGISTRY.get().is_some()
    }

    #[cfg(any(test, feature = "software-emulation"))]
    {
        REGISTRY.with(|r| r.get().is_some())
    }
}

/// Returns the kernel address space.
pub fn kernel_aspace() -> AspaceRef {
    with_registry(|r| r.aspaces.read()[0].clone())
}

/// Adds an address space to the registry and returns its shared handle.
pub fn register(aspace: AddressSpace) -> AspaceRef {
    let aspace = Arc::new(Mutex::new(aspace));
    with_registry(|r| r.aspaces.write().push(aspace.clone()));
    aspace
}

/// Returns handles to every registered address space, kernel first.
pub fn aspaces() -> Vec<AspaceRef> {
    with_registry(|r| r.aspaces.read().clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ensure_init() {
        if !is_initialized() {
            init();
        }
    }

    #[test]
    fn init_registers_kernel_aspace() {
        ensure_init();
        let kernel = kernel_aspace();
        let kernel = kernel.lock();
        assert_eq!(kernel.name(), "kernel");
        assert_eq!(kernel.base().as_usize(), KERNEL_ASPACE_BASE);
        assert_eq!(kernel.size(), KERNEL_ASPACE_SIZE);
        assert!(kernel.flags().contains(AspaceFlags::KERNEL));
    }

    #[test]
    fn kernel_aspace_is_always_listed() {
        ensure_init();
        let all = aspaces();
        assert!(!all.is_empty());
        assert_eq!(all[0].lock().name(), "kernel");
    }

    #[test]
    fn register_adds_address_space() {
        ensure_init();
        let before = aspaces().len();
        let user = AddressSpace::new(
            "user",
            VirtualAddress::new(0x1000_0000),
            0x0100_0000,
            AspaceFlags::NONE,
        )
        .unwrap();
        let handle = register(user);
        assert_eq!(aspaces().len(), before + 1);
        assert_eq!(handle.lock().name(), "user");
    }
}
