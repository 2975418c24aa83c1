//! # Helix HAL - Hardware Abstraction Layer
//!
//! This crate defines the contracts the lkuser environment consumes from the
//! rest of the kernel. Everything here is implemented elsewhere: the kernel
//! proper on real targets, `helix-hal-mock` on the host.
//!
//! ## Collaborators
//!
//! - [`mmu::AddressSpaceManager`]: isolated address spaces and regions
//! - [`sched::KernelScheduler`]: kernel contexts, events, sleeping, TLS
//! - [`user::UserModeEntry`]: the final jump into user mode
//! - [`console::Console`]: interactive input and program output
//! - [`storage::FileSystem`], [`storage::BlockDevices`]: program images and files
//! - [`trap::TrapFrame`]: saved register state of a syscall trap

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

extern crate alloc;

pub mod mmu;
pub mod sched;
pub mod console;
pub mod storage;
pub mod user;
pub mod trap;

// Architecture-specific trap frames
pub mod arch;

use core::fmt;

/// Size of a page on every supported target
pub const PAGE_SIZE: usize = 4096;

/// log2 of [`PAGE_SIZE`], used as an alignment argument
pub const PAGE_SIZE_SHIFT: u8 = 12;

static_assertions::const_assert_eq!(1usize << PAGE_SIZE_SHIFT, PAGE_SIZE);

/// Result type for HAL and collaborator operations
pub type HalResult<T> = Result<T, HalError>;

/// Kernel-wide status codes.
///
/// Collaborators report failures with these and every layer above passes
/// them through unchanged. The discriminants are the negative values a user
/// program observes as a syscall return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum HalError {
    /// Unspecified failure
    Generic = -1,
    /// Object, slot or path not found
    NotFound = -2,
    /// Object is not ready for the operation
    NotReady = -3,
    /// Memory allocation failed
    NoMemory = -5,
    /// Argument out of range or malformed
    InvalidArgs = -8,
    /// Operation timed out
    TimedOut = -13,
    /// Object already exists
    AlreadyExists = -14,
    /// Path could not be resolved
    BadPath = -18,
    /// Device or filesystem I/O failure
    Io = -20,
    /// Operation not supported by this object
    NotSupported = -24,
    /// Operation not implemented at all
    NotImplemented = -27,
    /// Object is in the wrong state for the operation
    BadState = -31,
    /// Value out of range
    OutOfRange = -37,
    /// Bad user pointer
    Fault = -40,
    /// No free slot or region
    NoResources = -41,
    /// Handle does not refer to a live object
    BadHandle = -42,
    /// Permission denied
    AccessDenied = -43,
}

impl HalError {
    /// Negative status code of this error
    #[inline]
    pub const fn code(self) -> i32 {
        self as i32
    }

    /// Map a raw negative status code back to an error
    pub const fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            -1 => Self::Generic,
            -2 => Self::NotFound,
            -3 => Self::NotReady,
            -5 => Self::NoMemory,
            -8 => Self::InvalidArgs,
            -13 => Self::TimedOut,
            -14 => Self::AlreadyExists,
            -18 => Self::BadPath,
            -20 => Self::Io,
            -24 => Self::NotSupported,
            -27 => Self::NotImplemented,
            -31 => Self::BadState,
            -37 => Self::OutOfRange,
            -40 => Self::Fault,
            -41 => Self::NoResources,
            -42 => Self::BadHandle,
            -43 => Self::AccessDenied,
            _ => return None,
        })
    }
}

impl fmt::Display for HalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::Generic => "generic error",
            Self::NotFound => "not found",
            Self::NotReady => "not ready",
            Self::NoMemory => "out of memory",
            Self::InvalidArgs => "invalid arguments",
            Self::TimedOut => "timed out",
            Self::AlreadyExists => "already exists",
            Self::BadPath => "bad path",
            Self::Io => "i/o error",
            Self::NotSupported => "not supported",
            Self::NotImplemented => "not implemented",
            Self::BadState => "bad state",
            Self::OutOfRange => "out of range",
            Self::Fault => "bad address",
            Self::NoResources => "no resources",
            Self::BadHandle => "bad handle",
            Self::AccessDenied => "access denied",
        };
        write!(f, "{} ({})", msg, self.code())
    }
}

/// Virtual address type (architecture-independent)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct VirtAddr(usize);

impl VirtAddr {
    /// The null address
    pub const NULL: Self = Self(0);

    /// Create a new virtual address
    #[inline]
    pub const fn new(addr: usize) -> Self {
        Self(addr)
    }

    /// Get the raw address value
    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0
    }

    /// Get the raw address value widened to 64 bits
    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0 as u64
    }

    /// Is this the null address
    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Check if the address is aligned to the given alignment
    #[inline]
    pub const fn is_aligned(self, align: usize) -> bool {
        self.0 % align == 0
    }

    /// Align the address up to the given alignment
    #[inline]
    pub const fn align_up(self, align: usize) -> Self {
        Self(align_up(self.0, align))
    }

    /// Align the address down to the given alignment
    #[inline]
    pub const fn align_down(self, align: usize) -> Self {
        Self(align_down(self.0, align))
    }

    /// Add an offset to the address
    #[inline]
    pub const fn add(self, offset: usize) -> Self {
        Self(self.0 + offset)
    }

    /// Distance from `base` up to this address
    #[inline]
    pub const fn offset_from(self, base: VirtAddr) -> usize {
        self.0 - base.0
    }
}

impl fmt::LowerHex for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

/// Round `value` up to a power-of-two `align`
#[inline]
pub const fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

/// Round `value` down to a power-of-two `align`
#[inline]
pub const fn align_down(value: usize, align: usize) -> usize {
    value & !(align - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_round_trip() {
        for err in [
            HalError::NotFound,
            HalError::InvalidArgs,
            HalError::BadState,
            HalError::NotSupported,
            HalError::NotImplemented,
        ] {
            assert!(err.code() < 0);
            assert_eq!(HalError::from_code(err.code()), Some(err));
        }
        assert_eq!(HalError::from_code(0), None);
        assert_eq!(HalError::from_code(-4), None);
    }

    #[test]
    fn test_alignment_helpers() {
        assert_eq!(align_up(1, PAGE_SIZE), PAGE_SIZE);
        assert_eq!(align_up(PAGE_SIZE, PAGE_SIZE), PAGE_SIZE);
        assert_eq!(align_down(PAGE_SIZE + 17, PAGE_SIZE), PAGE_SIZE);

        let va = VirtAddr::new(0x10_0123);
        assert_eq!(va.align_down(PAGE_SIZE), VirtAddr::new(0x10_0000));
        assert_eq!(va.align_up(PAGE_SIZE), VirtAddr::new(0x10_1000));
        assert_eq!(va.offset_from(VirtAddr::new(0x10_0000)), 0x123);
    }
}
