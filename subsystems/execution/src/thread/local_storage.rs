//! # Thread-Local Storage
//!
//! The scheduler gives every kernel context a few scratch slots. A user
//! thread keeps a pointer to its own [`Thread`] in [`TlsSlot::Lkuser`] so
//! a trap can find its thread (and process) without any lookup.
//!
//! The slot does not own a reference. The owning process holds every
//! attached thread until its context has been joined, and a context is
//! only joined once it has stopped running.

use alloc::sync::Arc;

use helix_hal::sched::{KernelScheduler, TlsSlot};

use super::Thread;

/// Record `thread` as the thread running on the current context
pub(crate) fn set_current(scheduler: &dyn KernelScheduler, thread: &Arc<Thread>) {
    scheduler.tls_set(TlsSlot::Lkuser, Arc::as_ptr(thread) as usize);
}

/// Forget the thread recorded on the current context
pub(crate) fn clear_current(scheduler: &dyn KernelScheduler) {
    scheduler.tls_set(TlsSlot::Lkuser, 0);
}

/// The user thread running on the current context
pub fn current(scheduler: &dyn KernelScheduler) -> Option<Arc<Thread>> {
    let ptr = scheduler.tls_get(TlsSlot::Lkuser) as *const Thread;
    if ptr.is_null() {
        return None;
    }

    // SAFETY: only `set_current` fills the slot, with a pointer taken from
    // a live `Arc<Thread>` attached to its process. The process keeps that
    // reference until the context reading the slot has been joined.
    unsafe {
        Arc::increment_strong_count(ptr);
        Some(Arc::from_raw(ptr))
    }
}
