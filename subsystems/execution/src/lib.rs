//! # Helix Execution Subsystem
//!
//! The execution subsystem manages user programs once they are loaded:
//! - Process lifecycle (`INITIAL -> RUNNING -> DEAD`)
//! - Threads bound to kernel contexts and a process address space
//! - Per-process handle tables
//! - The global process registry and the reaper that reclaims dead
//!   processes in the background
//!
//! ## Key Principle
//!
//! Nothing in here talks to hardware. Address spaces, kernel contexts,
//! events and the jump to user mode are collaborators reached through the
//! [`Services`] bundle, so the same code runs on a target and on the host.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

extern crate alloc;

pub mod config;
pub mod event;
pub mod handle;
pub mod heap;
pub mod thread;
pub mod process;
pub mod registry;
pub mod reaper;
pub mod runtime;

use alloc::sync::Arc;
use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

use helix_hal::mmu::AddressSpaceManager;
use helix_hal::sched::KernelScheduler;
use helix_hal::user::UserModeEntry;

pub use config::RuntimeConfig;
pub use event::Event;
pub use handle::{Fd, Handle, HandleTable};
pub use heap::HeapCursor;
pub use process::{LoaderState, Process, ProcessState, FILE_TABLE_SIZE};
pub use reaper::{Reaper, ReaperMetrics};
pub use registry::ProcessRegistry;
pub use runtime::Runtime;
pub use thread::Thread;

/// Errors are the kernel-wide status codes, passed through unchanged
pub use helix_hal::HalError as ExecError;

/// Execution result type
pub type ExecResult<T> = Result<T, ExecError>;

/// Unique identifier for threads
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(u64);

impl ThreadId {
    /// Create a new thread ID
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl Default for ThreadId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// Unique identifier for processes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(u64);

impl ProcessId {
    /// Create a new process ID
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl Default for ProcessId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

/// The kernel collaborators the execution subsystem runs on
#[derive(Clone)]
pub struct Services {
    /// Virtual memory manager
    pub aspaces: Arc<dyn AddressSpaceManager>,
    /// Kernel scheduler
    pub scheduler: Arc<dyn KernelScheduler>,
    /// Architecture drop into user mode
    pub user_entry: Arc<dyn UserModeEntry>,
}

impl Services {
    /// Bundle the collaborators
    pub fn new(
        aspaces: Arc<dyn AddressSpaceManager>,
        scheduler: Arc<dyn KernelScheduler>,
        user_entry: Arc<dyn UserModeEntry>,
    ) -> Self {
        Self {
            aspaces,
            scheduler,
            user_entry,
        }
    }
}

impl fmt::Debug for Services {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Services").finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    extern crate std;

    use super::*;
    use helix_hal_mock::MockKernel;
    use std::time::Duration;

    /// Services backed by the mock kernel
    pub(crate) fn services(kernel: &MockKernel) -> Services {
        Services::new(kernel.aspaces.clone(), kernel.scheduler.clone(), kernel.user.clone())
    }

    /// Poll `cond` until it holds, failing the test after a few seconds
    pub(crate) fn wait_until(what: &str, cond: impl Fn() -> bool) {
        for _ in 0..500 {
            if cond() {
                return;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        panic!("timed out waiting for {}", what);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique() {
        let a = ThreadId::new();
        let b = ThreadId::new();
        assert_ne!(a, b);
        assert_ne!(ProcessId::new(), ProcessId::new());
    }
}
