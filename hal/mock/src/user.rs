//! User mode stand-in.
//!
//! Programs are host closures registered under an entry address. Entering
//! user mode at that address runs the closure on the calling context; a
//! program that returns instead of calling `exit` ends its context with
//! code 0.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use helix_hal::sched::KernelScheduler;
use helix_hal::user::UserModeEntry;
use helix_hal::{HalError, VirtAddr};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A user program; receives the initial stack top
pub type Program = Arc<dyn Fn(VirtAddr) + Send + Sync>;

/// One recorded entry into user mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserEntryRecord {
    /// Entry point
    pub entry: VirtAddr,
    /// Initial stack pointer
    pub stack_top: VirtAddr,
}

/// Program-table [`UserModeEntry`]
pub struct MockUserEntry {
    scheduler: Arc<dyn KernelScheduler>,
    programs: Mutex<HashMap<usize, Program>>,
    entries: Mutex<Vec<UserEntryRecord>>,
}

impl MockUserEntry {
    /// Programs end their context through `scheduler`
    pub fn new(scheduler: Arc<dyn KernelScheduler>) -> Self {
        Self {
            scheduler,
            programs: Mutex::new(HashMap::new()),
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Run `program` whenever user mode is entered at `entry`
    pub fn register<F>(&self, entry: VirtAddr, program: F)
    where
        F: Fn(VirtAddr) + Send + Sync + 'static,
    {
        lock(&self.programs).insert(entry.as_usize(), Arc::new(program));
    }

    /// Every entry into user mode so far
    pub fn entries(&self) -> Vec<UserEntryRecord> {
        lock(&self.entries).clone()
    }
}

impl std::fmt::Debug for MockUserEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockUserEntry")
            .field("programs", &lock(&self.programs).len())
            .field("entries", &lock(&self.entries).len())
            .finish()
    }
}

impl UserModeEntry for MockUserEntry {
    fn enter_user(&self, entry: VirtAddr, stack_top: VirtAddr) -> ! {
        lock(&self.entries).push(UserEntryRecord { entry, stack_top });

        let program = lock(&self.programs).get(&entry.as_usize()).cloned();
        match program {
            Some(program) => {
                program(stack_top);
                self.scheduler.exit_context(0)
            }
            None => {
                log::error!("no program registered at {:#x}", entry);
                self.scheduler.exit_context(HalError::NotFound.code())
            }
        }
    }
}
