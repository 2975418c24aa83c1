//! # Userland
//!
//! Everything the user-facing layer needs in one place: the execution
//! runtime, the storage and console collaborators, configuration and the
//! syscall table. Syscall handlers, the loader and the shell all take a
//! `&Userland` instead of reaching for globals.

use alloc::sync::Arc;
use core::fmt;

use helix_execution::{Process, Runtime, Thread};
use helix_hal::console::Console;
use helix_hal::storage::{BlockDevices, FileSystem};

use crate::config::UserlandConfig;
use crate::file_handle::FileHandle;
use crate::syscalls::SyscallTable;
use crate::{UserError, UserResult, STATS};

/// The lkuser environment
pub struct Userland {
    runtime: Arc<Runtime>,
    console: Arc<dyn Console>,
    fs: Arc<dyn FileSystem>,
    blocks: Arc<dyn BlockDevices>,
    config: UserlandConfig,
    syscalls: SyscallTable,
}

impl Userland {
    /// Assemble the environment on top of a running execution runtime
    pub fn new(
        runtime: Arc<Runtime>,
        console: Arc<dyn Console>,
        fs: Arc<dyn FileSystem>,
        blocks: Arc<dyn BlockDevices>,
        config: UserlandConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            runtime,
            console,
            fs,
            blocks,
            config,
            syscalls: SyscallTable::new(),
        })
    }

    /// Execution runtime
    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    /// Console
    pub fn console(&self) -> &Arc<dyn Console> {
        &self.console
    }

    /// Filesystem
    pub fn fs(&self) -> &Arc<dyn FileSystem> {
        &self.fs
    }

    /// Block devices
    pub fn blocks(&self) -> &Arc<dyn BlockDevices> {
        &self.blocks
    }

    /// Configuration
    pub fn config(&self) -> &UserlandConfig {
        &self.config
    }

    /// Syscall table
    pub fn syscalls(&self) -> &SyscallTable {
        &self.syscalls
    }

    /// Create an empty process, registered with the runtime
    pub fn create_process(&self, name: &str) -> UserResult<Arc<Process>> {
        let process = self.runtime.create_process(name)?;
        STATS.process_spawned();
        Ok(process)
    }

    /// The user thread making the current syscall
    pub fn current_thread(&self) -> UserResult<Arc<Thread>> {
        self.runtime.current_thread().ok_or(UserError::BadState)
    }

    /// The process of the user thread making the current syscall
    pub fn current_process(&self) -> UserResult<Arc<Process>> {
        self.runtime.current_process().ok_or(UserError::BadState)
    }

    /// Open `path` as a file handle
    pub fn open_file(&self, path: &str) -> UserResult<Arc<FileHandle>> {
        FileHandle::open(path, &self.config, &self.fs, &self.console)
    }
}

impl fmt::Debug for Userland {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Userland")
            .field("runtime", &self.runtime)
            .field("config", &self.config)
            .field("syscalls", &self.syscalls)
            .finish_non_exhaustive()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use helix_hal_mock::MockKernel;

    #[test]
    fn test_no_current_process_outside_user_threads() {
        let kernel = MockKernel::new();
        let userland = testing::userland(&kernel);

        assert_eq!(userland.current_process().unwrap_err(), UserError::BadState);
        assert_eq!(userland.current_thread().unwrap_err(), UserError::BadState);
        userland.runtime().shutdown().unwrap();
    }

    #[test]
    fn test_create_process_registers() {
        let kernel = MockKernel::new();
        let userland = testing::userland(&kernel);

        let process = userland.create_process("lkuser").unwrap();
        assert_eq!(userland.runtime().registry().count(), 1);
        assert!(kernel.aspaces.exists(process.address_space()));

        process.exit(0);
        drop(process);
        userland.runtime().shutdown().unwrap();
        assert_eq!(kernel.aspaces.live_spaces(), 0);
    }
}
