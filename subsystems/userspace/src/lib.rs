//! # Helix Userspace Subsystem
//!
//! The user-facing half of the lkuser environment:
//! - ELF64 image parsing and loading into a process address space
//! - File handles (filesystem, console, null) and their factory
//! - The syscall table and trap decoding for ARM and RISC-V
//! - The `lkuser` operator shell command
//!
//! Process and thread lifecycle live in `helix-execution`; this crate
//! drives them through a [`Userland`].

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

extern crate alloc;

pub mod config;
pub mod elf;
pub mod file_handle;
pub mod loader;
pub mod shell;
pub mod syscalls;
pub mod uaccess;
pub mod userland;

#[cfg(test)]
mod e2e_tests;

use core::sync::atomic::{AtomicU64, Ordering};

// Re-exports
pub use config::UserlandConfig;
pub use elf::{ElfClass, ElfError, ElfHeader, ElfHooks, ElfImage, ElfLoader, ProgramHeader, SegmentFlags};
pub use file_handle::FileHandle;
pub use loader::{load, start_binary, ImageSource};
pub use shell::{CommandResult, Shell, ShellCommand};
pub use syscalls::{handle_trap, install, Syscall, SyscallResult, SyscallTable};
pub use userland::Userland;

/// Errors are the kernel-wide status codes, passed through unchanged
pub use helix_hal::HalError as UserError;

/// Userspace subsystem result type
pub type UserResult<T> = Result<T, UserError>;

/// Userspace version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Statistics for userspace subsystem
#[derive(Debug, Default)]
pub struct UserspaceStats {
    /// Number of programs loaded
    pub programs_loaded: AtomicU64,
    /// Number of processes spawned
    pub processes_spawned: AtomicU64,
    /// Number of syscalls made
    pub syscalls_made: AtomicU64,
    /// Number of shell commands executed
    pub commands_executed: AtomicU64,
}

impl UserspaceStats {
    /// Create new stats
    pub const fn new() -> Self {
        Self {
            programs_loaded: AtomicU64::new(0),
            processes_spawned: AtomicU64::new(0),
            syscalls_made: AtomicU64::new(0),
            commands_executed: AtomicU64::new(0),
        }
    }

    /// Increment programs loaded
    pub fn program_loaded(&self) {
        self.programs_loaded.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment processes spawned
    pub fn process_spawned(&self) {
        self.processes_spawned.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment syscalls made
    pub fn syscall_made(&self) {
        self.syscalls_made.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment commands executed
    pub fn command_executed(&self) {
        self.commands_executed.fetch_add(1, Ordering::Relaxed);
    }
}

/// Global userspace statistics
pub static STATS: UserspaceStats = UserspaceStats::new();
