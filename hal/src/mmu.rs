//! # Address Space Abstraction
//!
//! Contracts for the virtual memory manager that backs user processes.
//! Each process owns exactly one isolated address space; regions inside it
//! are allocated with per-region permission flags.

use crate::{HalResult, VirtAddr};
use bitflags::bitflags;

bitflags! {
    /// Region permission flags
    ///
    /// A region without [`MmuFlags::PERM_RO`] is writable and a region
    /// without [`MmuFlags::PERM_NO_EXECUTE`] is executable.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MmuFlags: u32 {
        /// Region is accessible from user mode
        const PERM_USER = 1 << 0;
        /// Region is read-only
        const PERM_RO = 1 << 1;
        /// Region is not executable
        const PERM_NO_EXECUTE = 1 << 2;
        /// Region is uncached
        const UNCACHED = 1 << 3;
    }
}

impl MmuFlags {
    /// User code and data loaded from a binary image
    pub const fn user_image() -> Self {
        Self::PERM_USER
    }

    /// User stacks and heap
    pub const fn user_data() -> Self {
        Self::PERM_USER.union(Self::PERM_NO_EXECUTE)
    }
}

/// Opaque handle to an isolated address space
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AddressSpaceId(u64);

impl AddressSpaceId {
    /// Wrap a raw identifier handed out by the address-space manager
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw identifier
    pub const fn as_raw(self) -> u64 {
        self.0
    }
}

/// Where a region should be placed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Anywhere the manager sees fit
    Anywhere,
    /// At exactly this (page aligned) virtual address
    Specific(VirtAddr),
}

/// Region allocation request
#[derive(Debug, Clone, Copy)]
pub struct RegionRequest<'a> {
    /// Debug name of the region
    pub name: &'a str,
    /// Size in bytes, a multiple of the page size
    pub size: usize,
    /// log2 of the required alignment
    pub align_log2: u8,
    /// Placement policy
    pub placement: Placement,
    /// Permission flags
    pub flags: MmuFlags,
}

impl<'a> RegionRequest<'a> {
    /// Request `size` bytes anywhere with page alignment
    pub const fn anywhere(name: &'a str, size: usize, flags: MmuFlags) -> Self {
        Self {
            name,
            size,
            align_log2: crate::PAGE_SIZE_SHIFT,
            placement: Placement::Anywhere,
            flags,
        }
    }

    /// Request `size` bytes at a fixed address
    pub const fn specific(name: &'a str, at: VirtAddr, size: usize, flags: MmuFlags) -> Self {
        Self {
            name,
            size,
            align_log2: 0,
            placement: Placement::Specific(at),
            flags,
        }
    }

    /// Override the alignment
    pub const fn with_align_log2(mut self, align_log2: u8) -> Self {
        self.align_log2 = align_log2;
        self
    }
}

/// Address-space manager
///
/// Allocation returns the base of the new region as seen by the kernel while
/// the owning space is active. Implementations may return a different base
/// than a [`Placement::Specific`] request asked for only if they cannot
/// honour the placement at all; callers always use the returned base.
pub trait AddressSpaceManager: Send + Sync {
    /// Create a new, empty, isolated address space
    fn create(&self, name: &str) -> HalResult<AddressSpaceId>;

    /// Free every region in the space and the space itself
    fn destroy(&self, space: AddressSpaceId) -> HalResult<()>;

    /// Allocate a region inside `space`
    fn allocate(&self, space: AddressSpaceId, request: RegionRequest<'_>) -> HalResult<VirtAddr>;

    /// Make `space` (or only the kernel space, for `None`) active on this CPU
    fn set_active(&self, space: Option<AddressSpaceId>);

    /// The currently active user space, if any
    fn active(&self) -> Option<AddressSpaceId>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_flags() {
        assert!(MmuFlags::user_data().contains(MmuFlags::PERM_NO_EXECUTE));
        assert!(MmuFlags::user_data().contains(MmuFlags::PERM_USER));
        assert!(!MmuFlags::user_image().contains(MmuFlags::PERM_NO_EXECUTE));
    }

    #[test]
    fn test_region_requests() {
        let req = RegionRequest::anywhere("heap", 0x10000, MmuFlags::user_data());
        assert_eq!(req.placement, Placement::Anywhere);
        assert_eq!(req.align_log2, crate::PAGE_SIZE_SHIFT);

        let at = VirtAddr::new(0x8000);
        let req = RegionRequest::specific("lkuser0", at, 0x1000, MmuFlags::user_image());
        assert_eq!(req.placement, Placement::Specific(at));
        assert_eq!(req.align_log2, 0);
    }
}
