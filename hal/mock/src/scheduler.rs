//! Kernel contexts on host threads.
//!
//! A context is created suspended and becomes a `std::thread` on its
//! first resume. `exit_context` unwinds the host thread with a
//! [`ContextExit`] payload that the thread wrapper turns back into an exit
//! code, so it behaves like a call that never returns.

use std::cell::Cell;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use helix_hal::mmu::AddressSpaceId;
use helix_hal::sched::{
    ContextEntry, ContextHandle, ContextSpec, EventFlags, EventHandle, KernelScheduler, Priority,
    TlsSlot, TLS_SLOT_COUNT,
};
use helix_hal::{HalError, HalResult};

thread_local! {
    static TLS: Cell<[usize; TLS_SLOT_COUNT]> = const { Cell::new([0; TLS_SLOT_COUNT]) };
}

/// Unwind payload carrying the code passed to `exit_context`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextExit(pub i32);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // a panicking context must not wedge the rest of the test
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct Context {
    name: String,
    priority: Priority,
    space: Option<AddressSpaceId>,
    entry: Option<ContextEntry>,
    thread: Option<JoinHandle<i32>>,
}

#[derive(Debug, Default)]
struct EventState {
    signaled: bool,
    destroyed: bool,
}

#[derive(Debug)]
struct MockEvent {
    auto_unsignal: bool,
    state: Mutex<EventState>,
    cond: Condvar,
}

/// Thread-backed [`KernelScheduler`]
pub struct MockScheduler {
    next_id: AtomicU64,
    contexts: Mutex<HashMap<u64, Context>>,
    events: Mutex<HashMap<u64, Arc<MockEvent>>>,
    sleeps: Mutex<Vec<u64>>,
    joined: AtomicUsize,
}

impl MockScheduler {
    /// Create a scheduler with no contexts
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            contexts: Mutex::new(HashMap::new()),
            events: Mutex::new(HashMap::new()),
            sleeps: Mutex::new(Vec::new()),
            joined: AtomicUsize::new(0),
        }
    }

    /// Contexts created and not yet joined
    pub fn live_contexts(&self) -> usize {
        lock(&self.contexts).len()
    }

    /// Contexts joined so far
    pub fn joined_contexts(&self) -> usize {
        self.joined.load(Ordering::SeqCst)
    }

    /// Events created and not yet destroyed
    pub fn live_events(&self) -> usize {
        lock(&self.events).len()
    }

    /// Address space a context was bound to
    pub fn bound_space(&self, context: ContextHandle) -> Option<AddressSpaceId> {
        lock(&self.contexts).get(&context.as_raw()).and_then(|c| c.space)
    }

    /// Priority a context was created with
    pub fn priority_of(&self, context: ContextHandle) -> Option<Priority> {
        lock(&self.contexts).get(&context.as_raw()).map(|c| c.priority)
    }

    /// Every `sleep_ms` argument, in call order
    pub fn sleeps(&self) -> Vec<u64> {
        lock(&self.sleeps).clone()
    }

    fn event(&self, event: EventHandle) -> HalResult<Arc<MockEvent>> {
        lock(&self.events)
            .get(&event.as_raw())
            .cloned()
            .ok_or(HalError::BadHandle)
    }
}

impl Default for MockScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MockScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockScheduler")
            .field("contexts", &self.live_contexts())
            .field("events", &self.live_events())
            .finish()
    }
}

fn run_context(entry: ContextEntry) -> i32 {
    match panic::catch_unwind(AssertUnwindSafe(entry)) {
        Ok(code) => code,
        Err(payload) => match payload.downcast::<ContextExit>() {
            Ok(exit) => exit.0,
            Err(payload) => panic::resume_unwind(payload),
        },
    }
}

impl KernelScheduler for MockScheduler {
    fn create_context(&self, spec: ContextSpec<'_>, entry: ContextEntry) -> HalResult<ContextHandle> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        lock(&self.contexts).insert(
            id,
            Context {
                name: spec.name.to_owned(),
                priority: spec.priority,
                space: None,
                entry: Some(entry),
                thread: None,
            },
        );
        Ok(ContextHandle::from_raw(id))
    }

    fn bind_address_space(&self, context: ContextHandle, space: AddressSpaceId) {
        if let Some(ctx) = lock(&self.contexts).get_mut(&context.as_raw()) {
            ctx.space = Some(space);
        }
    }

    fn resume(&self, context: ContextHandle) -> HalResult<()> {
        let mut contexts = lock(&self.contexts);
        let ctx = contexts.get_mut(&context.as_raw()).ok_or(HalError::NotFound)?;
        let entry = ctx.entry.take().ok_or(HalError::BadState)?;

        let thread = thread::Builder::new()
            .name(ctx.name.clone())
            .spawn(move || run_context(entry))
            .map_err(|_| HalError::NoResources)?;
        ctx.thread = Some(thread);
        Ok(())
    }

    fn join(&self, context: ContextHandle) -> HalResult<i32> {
        let ctx = lock(&self.contexts)
            .remove(&context.as_raw())
            .ok_or(HalError::NotFound)?;
        self.joined.fetch_add(1, Ordering::SeqCst);

        match ctx.thread {
            Some(thread) => thread.join().map_err(|_| {
                log::error!("context {} panicked", ctx.name);
                HalError::Generic
            }),
            // never resumed; dropping the entry releases whatever it captured
            None => Ok(0),
        }
    }

    fn sleep_ms(&self, millis: u64) {
        lock(&self.sleeps).push(millis);
        thread::yield_now();
    }

    fn exit_context(&self, code: i32) -> ! {
        panic::resume_unwind(Box::new(ContextExit(code)))
    }

    fn tls_get(&self, slot: TlsSlot) -> usize {
        TLS.with(|tls| tls.get()[slot as usize])
    }

    fn tls_set(&self, slot: TlsSlot, value: usize) -> usize {
        TLS.with(|tls| {
            let mut slots = tls.get();
            let old = core::mem::replace(&mut slots[slot as usize], value);
            tls.set(slots);
            old
        })
    }

    fn event_create(&self, flags: EventFlags) -> HalResult<EventHandle> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let event = MockEvent {
            auto_unsignal: flags.contains(EventFlags::AUTO_UNSIGNAL),
            state: Mutex::new(EventState::default()),
            cond: Condvar::new(),
        };
        lock(&self.events).insert(id, Arc::new(event));
        Ok(EventHandle::from_raw(id))
    }

    fn event_wait(&self, event: EventHandle) -> HalResult<()> {
        let event = self.event(event)?;
        let mut state = lock(&event.state);
        loop {
            if state.destroyed {
                return Err(HalError::BadHandle);
            }
            if state.signaled {
                if event.auto_unsignal {
                    state.signaled = false;
                }
                return Ok(());
            }
            state = event
                .cond
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    fn event_signal(&self, event: EventHandle, _reschedule: bool) {
        if let Ok(event) = self.event(event) {
            lock(&event.state).signaled = true;
            event.cond.notify_all();
        }
    }

    fn event_destroy(&self, event: EventHandle) {
        if let Some(event) = lock(&self.events).remove(&event.as_raw()) {
            lock(&event.state).destroyed = true;
            event.cond.notify_all();
        }
    }
}
