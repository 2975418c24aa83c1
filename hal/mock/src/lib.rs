//! # Helix HAL Mock
//!
//! Host implementations of every lkuser collaborator, for unit and
//! end-to-end tests:
//! - kernel contexts run on `std` threads ([`MockScheduler`])
//! - address spaces hand out host memory ([`MockAddressSpaces`])
//! - files and block devices live in memory ([`MockFileSystem`],
//!   [`MockBlockDevices`])
//! - console input is scripted and output captured ([`MockConsole`])
//! - "user mode" is a table of Rust closures ([`MockUserEntry`])

#![warn(missing_docs)]

mod aspace;
mod console;
mod logging;
mod scheduler;
mod storage;
mod user;

use std::sync::Arc;

pub use aspace::{MockAddressSpaces, MockRegion};
pub use console::MockConsole;
pub use logging::init_logging;
pub use scheduler::{ContextExit, MockScheduler};
pub use storage::{MockBlockDevices, MockFileSystem, MountRecord};
pub use user::{MockUserEntry, Program, UserEntryRecord};

/// Every mock collaborator, wired together
#[derive(Debug, Clone)]
pub struct MockKernel {
    /// Kernel contexts and events
    pub scheduler: Arc<MockScheduler>,
    /// Address spaces
    pub aspaces: Arc<MockAddressSpaces>,
    /// User mode entry
    pub user: Arc<MockUserEntry>,
    /// Console
    pub console: Arc<MockConsole>,
    /// Filesystem
    pub fs: Arc<MockFileSystem>,
    /// Block devices
    pub blocks: Arc<MockBlockDevices>,
}

impl MockKernel {
    /// Fresh collaborators with nothing created yet
    pub fn new() -> Self {
        let scheduler = Arc::new(MockScheduler::new());
        Self {
            user: Arc::new(MockUserEntry::new(scheduler.clone())),
            scheduler,
            aspaces: Arc::new(MockAddressSpaces::new()),
            console: Arc::new(MockConsole::new()),
            fs: Arc::new(MockFileSystem::new()),
            blocks: Arc::new(MockBlockDevices::new()),
        }
    }
}

impl Default for MockKernel {
    fn default() -> Self {
        Self::new()
    }
}
