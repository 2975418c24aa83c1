//! # Thread Structure
//!
//! A user thread owns one kernel context. The context body records the
//! thread in its TLS slot, allocates the user stack inside the process
//! address space and drops to user mode; it never comes back.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::{Arc, Weak};
use core::fmt;
use core::sync::atomic::{AtomicU32, Ordering};

use helix_hal::mmu::{AddressSpaceId, MmuFlags, RegionRequest};
use helix_hal::sched::{ContextHandle, ContextSpec};
use helix_hal::VirtAddr;
use spin::Once;

use super::{local_storage, ThreadState};
use crate::process::Process;
use crate::{ExecError, ExecResult, ProcessId, Services, ThreadId};

/// Thread structure
pub struct Thread {
    /// Unique identifier
    id: ThreadId,
    /// Owning process
    process: Weak<Process>,
    /// Cached so the body never needs to upgrade `process`
    process_id: ProcessId,
    /// Address space the context runs in
    space: AddressSpaceId,
    /// Thread name
    name: String,
    /// User-mode entry point
    entry: VirtAddr,
    /// Bytes of user stack to allocate
    user_stack_size: usize,
    /// Current state
    state: AtomicU32,
    /// Kernel context, set once created
    context: Once<ContextHandle>,
    /// Base of the user stack, set by the body
    user_stack: Once<VirtAddr>,
    services: Services,
}

impl Thread {
    /// Create a thread for `process` starting at `entry`.
    ///
    /// The kernel context is created suspended, bound to the process
    /// address space, and the thread is appended to the process thread
    /// list. Nothing runs until [`Thread::resume`]. A dead process takes
    /// no new threads.
    pub fn create(process: &Arc<Process>, entry: VirtAddr) -> ExecResult<Arc<Self>> {
        let services = process.services().clone();
        let config = process.config();

        let thread = Arc::new(Self {
            id: ThreadId::new(),
            process: Arc::downgrade(process),
            process_id: process.id(),
            space: process.address_space(),
            name: String::from(process.name()),
            entry,
            user_stack_size: config.user_stack_size,
            state: AtomicU32::new(ThreadState::Created.as_u32()),
            context: Once::new(),
            user_stack: Once::new(),
            services,
        });

        let body = thread.clone();
        let spec = ContextSpec {
            name: &thread.name,
            priority: config.thread_priority,
            stack_size: config.kernel_stack_size,
        };
        let context = thread
            .services
            .scheduler
            .create_context(spec, Box::new(move || body.run()))?;
        thread.context.call_once(|| context);

        thread.services.scheduler.bind_address_space(context, thread.space);

        if let Err(err) = process.attach_thread(thread.clone()) {
            log::error!("thread {} could not join {}: {}", thread.id, thread.process_id, err);
            thread.set_state(ThreadState::Joined);
            // never resumed: joining drops the body without running it
            if let Err(join_err) = thread.services.scheduler.join(context) {
                log::warn!("thread {}: context release failed: {}", thread.id, join_err);
            }
            return Err(err);
        }

        log::debug!(
            "thread {} of {} created, entry {:#x}",
            thread.id,
            thread.process_id,
            entry
        );

        Ok(thread)
    }

    /// Context body
    fn run(self: Arc<Self>) -> i32 {
        let scheduler = &*self.services.scheduler;
        local_storage::set_current(scheduler, &self);

        let request = RegionRequest::anywhere("user stack", self.user_stack_size, MmuFlags::user_data());
        let stack = match self.services.aspaces.allocate(self.space, request) {
            Ok(base) => base,
            Err(err) => {
                log::error!("thread {}: user stack allocation failed: {}", self.id, err);
                local_storage::clear_current(scheduler);
                // the program never ran; let waiters and the reaper see it die
                if let Some(process) = self.process() {
                    process.exit(err.code());
                }
                return err.code();
            }
        };
        let stack = *self.user_stack.call_once(|| stack);
        let stack_top = stack.add(self.user_stack_size);

        log::trace!("thread {} entering user mode at {:#x}, sp {:#x}", self.id, self.entry, stack_top);

        let user_entry = self.services.user_entry.clone();
        let entry = self.entry;
        drop(self);
        user_entry.enter_user(entry, stack_top)
    }

    /// Make the thread runnable
    pub fn resume(&self) -> ExecResult<()> {
        let context = *self.context.get().ok_or(ExecError::BadState)?;
        self.services.scheduler.resume(context)?;
        self.set_state(ThreadState::Running);
        Ok(())
    }

    /// Wait for the kernel context to finish and reclaim it.
    ///
    /// Returns the context's exit code. A thread can only be joined once.
    pub fn join(&self) -> ExecResult<i32> {
        let context = *self.context.get().ok_or(ExecError::BadState)?;

        let previous = self.state.swap(ThreadState::Joined.as_u32(), Ordering::AcqRel);
        if previous == ThreadState::Joined.as_u32() {
            return Err(ExecError::BadState);
        }

        let code = self.services.scheduler.join(context)?;
        log::trace!("thread {} joined, code {}", self.id, code);
        Ok(code)
    }

    /// Get thread ID
    pub fn id(&self) -> ThreadId {
        self.id
    }

    /// Get the owning process ID
    pub fn process_id(&self) -> ProcessId {
        self.process_id
    }

    /// The owning process, unless it has already been released
    pub fn process(&self) -> Option<Arc<Process>> {
        self.process.upgrade()
    }

    /// Get thread name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// User-mode entry point
    pub fn entry(&self) -> VirtAddr {
        self.entry
    }

    /// Base of the user stack once the thread has started
    pub fn user_stack(&self) -> Option<VirtAddr> {
        self.user_stack.get().copied()
    }

    /// The kernel context
    pub fn context(&self) -> Option<ContextHandle> {
        self.context.get().copied()
    }

    /// Get current state
    pub fn state(&self) -> ThreadState {
        let val = self.state.load(Ordering::SeqCst);
        ThreadState::from_u32(val).unwrap_or(ThreadState::Joined)
    }

    fn set_state(&self, state: ThreadState) {
        self.state.store(state.as_u32(), Ordering::SeqCst);
    }
}

impl Drop for Thread {
    fn drop(&mut self) {
        debug_assert!(
            self.context.get().is_none() || self.state().is_terminated(),
            "thread {} released before its context was joined",
            self.id
        );
    }
}

impl fmt::Debug for Thread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thread")
            .field("id", &self.id)
            .field("process", &self.process_id)
            .field("entry", &self.entry)
            .field("state", &self.state())
            .finish()
    }
}
