//! Debug console command for the virtual memory manager.
//!
//! A thin adapter that parses textual arguments and invokes the public
//! allocation operations on the kernel address space, printing the returned
//! status and resulting virtual address. Numeric arguments accept decimal or
//! `0x`-prefixed hex.

use crate::address::{PhysicalAddress, VirtualAddress};
use crate::aspace::AddressSpace;
use crate::error::VmError;
use crate::mapping::Placement;
use crate::mmu::{Mmu, MmuFlags};
use crate::pool::PhysicalPageAllocator;
use crate::region::Region;
use crate::registry;
use core::fmt::Write;

/// Runs one `vmm` console command.
///
/// `args` are the arguments after the command name itself. Returns
/// `VmError::Generic` for unknown or incomplete commands; allocation failures
/// are printed, not returned, so the console keeps running.
pub fn vmm_command<W, P, M>(
    out: &mut W,
    args: &[&str],
    pool: &mut P,
    mmu: &mut M,
) -> Result<(), VmError>
where
    W: Write,
    P: PhysicalPageAllocator + ?Sized,
    M: Mmu + ?Sized,
{
    let Some(&subcommand) = args.first() else {
        let _ = writeln!(out, "not enough arguments");
        return Err(usage(out));
    };

    match subcommand {
        "aspaces" => {
            for aspace in registry::aspaces() {
                dump_aspace(out, &aspace.lock());
            }
            Ok(())
        }
        "alloc" => {
            let [size, align_pow2] = parse_args(out, args)?;
            let result = registry::kernel_aspace().lock().alloc(
                pool,
                mmu,
                "alloc test",
                size,
                Placement::Any {
                    align_pow2: u8::try_from(align_pow2).unwrap_or(u8::MAX),
                },
                MmuFlags::NONE,
            );
            print_result(out, "alloc", result);
            Ok(())
        }
        "alloc_physical" => {
            let [paddr, size] = parse_args(out, args)?;
            let result = registry::kernel_aspace().lock().map_physical(
                mmu,
                "physical test",
                size,
                Placement::ANY,
                PhysicalAddress::new(paddr),
                MmuFlags::UNCACHED_DEVICE,
            );
            print_result(out, "alloc_physical", result);
            Ok(())
        }
        "alloc_contig" => {
            let [size, align_pow2] = parse_args(out, args)?;
            let result = registry::kernel_aspace().lock().alloc_contiguous(
                pool,
                mmu,
                "contig test",
                size,
                Placement::Any {
                    align_pow2: u8::try_from(align_pow2).unwrap_or(u8::MAX),
                },
                MmuFlags::NONE,
            );
            print_result(out, "alloc_contig", result);
            Ok(())
        }
        _ => {
            let _ = writeln!(out, "unknown command");
            Err(usage(out))
        }
    }
}

fn usage<W: Write>(out: &mut W) -> VmError {
    let _ = writeln!(out, "usage:");
    let _ = writeln!(out, "vmm aspaces");
    let _ = writeln!(out, "vmm alloc <size> <align_pow2>");
    let _ = writeln!(out, "vmm alloc_physical <paddr> <size>");
    let _ = writeln!(out, "vmm alloc_contig <size> <align_pow2>");
    VmError::Generic
}

/// Parses the `N` numeric arguments following the subcommand.
fn parse_args<W: Write, const N: usize>(
    out: &mut W,
    args: &[&str],
) -> Result<[usize; N], VmError> {
    if args.len() < N + 1 {
        let _ = writeln!(out, "not enough arguments");
        return Err(usage(out));
    }

    let mut values = [0usize; N];
    for (value, arg) in values.iter_mut().zip(&args[1..]) {
        *value = parse_num(arg).ok_or_else(|| {
            let _ = writeln!(out, "bad number '{arg}'");
            VmError::Generic
        })?;
    }
    Ok(values)
}

fn parse_num(text: &str) -> Option<usize> {
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        usize::from_str_radix(hex, 16).ok()
    } else {
        text.parse().ok()
    }
}

fn print_result<W: Write>(
    out: &mut W,
    operation: &str,
    result: Result<Option<VirtualAddress>, VmError>,
) {
    let _ = match result {
        Ok(Some(vaddr)) => writeln!(out, "{operation} returns ok, vaddr {vaddr}"),
        Ok(None) => writeln!(out, "{operation} returns ok, nothing to do"),
        Err(err) => writeln!(out, "{operation} returns {err}"),
    };
}

fn dump_region<W: Write>(out: &mut W, region: &Region) {
    let _ = writeln!(
        out,
        "\tregion '{}': range {} - {} size {:#x} kind {:?} mmu_flags {}",
        region.name(),
        region.base(),
        region.end_inclusive(),
        region.size(),
        region.kind(),
        region.mmu_flags(),
    );
}

fn dump_aspace<W: Write>(out: &mut W, aspace: &AddressSpace) {
    let _ = writeln!(
        out,
        "aspace '{}': range {} - {} size {:#x} flags {:#x}",
        aspace.name(),
        aspace.base(),
        aspace.end_inclusive(),
        aspace.size(),
        aspace.flags().bits(),
    );
    let _ = writeln!(out, "regions:");
    for region in aspace.regions() {
        dump_region(out, region);
    }
}
