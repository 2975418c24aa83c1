//! # Events
//!
//! Thin owner of a scheduler event handle.

use alloc::sync::Arc;
use core::fmt;

use helix_hal::sched::{EventFlags, EventHandle, KernelScheduler};

use crate::ExecResult;

/// A scheduler event plus the scheduler that owns it
#[derive(Clone)]
pub struct Event {
    handle: EventHandle,
    scheduler: Arc<dyn KernelScheduler>,
}

impl Event {
    /// Single-shot event: once signaled it stays signaled
    pub fn new(scheduler: Arc<dyn KernelScheduler>) -> ExecResult<Self> {
        Self::with_flags(scheduler, EventFlags::empty())
    }

    /// Auto-resetting event: each wakeup consumes the signal
    pub fn auto_unsignal(scheduler: Arc<dyn KernelScheduler>) -> ExecResult<Self> {
        Self::with_flags(scheduler, EventFlags::AUTO_UNSIGNAL)
    }

    fn with_flags(scheduler: Arc<dyn KernelScheduler>, flags: EventFlags) -> ExecResult<Self> {
        let handle = scheduler.event_create(flags)?;
        Ok(Self { handle, scheduler })
    }

    /// Block until signaled
    pub fn wait(&self) -> ExecResult<()> {
        self.scheduler.event_wait(self.handle)
    }

    /// Wake waiters
    pub fn signal(&self) {
        self.scheduler.event_signal(self.handle, true);
    }

    /// Release the scheduler object. Every clone shares the handle, so only
    /// the final owner may call this.
    pub fn destroy(&self) {
        self.scheduler.event_destroy(self.handle);
    }

    /// The raw handle
    pub fn handle(&self) -> EventHandle {
        self.handle
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Event").field(&self.handle).finish()
    }
}
