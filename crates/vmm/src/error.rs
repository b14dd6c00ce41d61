//! Status codes surfaced by the allocator's public operations.

use core::fmt;

/// Errors that can occur during virtual memory operations.
///
/// This is the complete set of codes any public operation can return.
/// Precondition violations (misaligned internal sizes and the like) are
/// programmer errors and trap via `debug_assert!` rather than appearing here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmError {
    /// A caller-supplied argument was malformed, e.g. a misaligned size or
    /// address where page alignment is required.
    InvalidArgs,
    /// An address or range falls outside the target address space, including
    /// ranges whose end would wrap the address width.
    OutOfRange,
    /// The request could not be satisfied: no free virtual gap of the
    /// requested size and alignment, not enough physical pages, or an exact
    /// placement conflicts with an existing region.
    Exhausted,
    /// Unrecognized command. Produced only by the debug command adapter.
    Generic,
}

impl fmt::Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            VmError::InvalidArgs => "invalid arguments",
            VmError::OutOfRange => "out of range",
            VmError::Exhausted => "exhausted",
            VmError::Generic => "generic error",
        };
        f.write_str(text)
    }
}
