//! # Process Registry
//!
//! Every live process, newest first. The reaper pulls dead ones out.

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::Mutex;

use crate::process::Process;
use crate::{ExecError, ExecResult, ProcessId};

/// Process registry
#[derive(Debug, Default)]
pub struct ProcessRegistry {
    processes: Mutex<VecDeque<Arc<Process>>>,
}

impl ProcessRegistry {
    /// Create an empty registry
    pub const fn new() -> Self {
        Self {
            processes: Mutex::new(VecDeque::new()),
        }
    }

    /// Link a process
    pub fn link(&self, process: Arc<Process>) -> ExecResult<()> {
        let mut processes = self.processes.lock();
        if processes.iter().any(|p| p.id() == process.id()) {
            return Err(ExecError::AlreadyExists);
        }
        processes.push_front(process);
        Ok(())
    }

    /// Unlink a process by ID
    pub fn unlink(&self, id: ProcessId) -> ExecResult<Arc<Process>> {
        let mut processes = self.processes.lock();
        let index = processes
            .iter()
            .position(|p| p.id() == id)
            .ok_or(ExecError::NotFound)?;
        processes.remove(index).ok_or(ExecError::NotFound)
    }

    /// Unlink the first dead process, if any
    pub fn take_first_dead(&self) -> Option<Arc<Process>> {
        let mut processes = self.processes.lock();
        let index = processes.iter().position(|p| p.state().is_dead())?;
        processes.remove(index)
    }

    /// Get a process
    pub fn get(&self, id: ProcessId) -> Option<Arc<Process>> {
        self.processes.lock().iter().find(|p| p.id() == id).cloned()
    }

    /// Snapshot of all linked processes
    pub fn processes(&self) -> Vec<Arc<Process>> {
        self.processes.lock().iter().cloned().collect()
    }

    /// Get process count
    pub fn count(&self) -> usize {
        self.processes.lock().len()
    }
}
