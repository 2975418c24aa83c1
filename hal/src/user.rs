//! # User Mode Entry
//!
//! The architecture-specific drop from a kernel context into user mode.

use crate::VirtAddr;

/// Transfers control to user mode
pub trait UserModeEntry: Send + Sync {
    /// Start executing user code at `entry` with the stack pointer at
    /// `stack_top`. Never returns: the context only ever leaves user mode
    /// again through a trap, and terminates through the exit syscall.
    fn enter_user(&self, entry: VirtAddr, stack_top: VirtAddr) -> !;
}
