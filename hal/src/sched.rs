//! # Kernel Scheduler Abstraction
//!
//! Kernel execution contexts, blocking events, sleeping and the per-context
//! scratch slots ("thread-local pointers") the lkuser layer relies on.

use crate::HalResult;
use alloc::boxed::Box;
use bitflags::bitflags;

/// Kernel context priority (higher runs first)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Priority(u8);

impl Priority {
    /// Lowest priority
    pub const LOWEST: Self = Self(0);
    /// Low priority, used for user threads
    pub const LOW: Self = Self(8);
    /// Default kernel priority
    pub const DEFAULT: Self = Self(16);
    /// High priority, used for housekeeping such as the reaper
    pub const HIGH: Self = Self(24);
    /// Highest priority
    pub const HIGHEST: Self = Self(31);

    /// Create a priority, clamped to [`Priority::HIGHEST`]
    pub const fn new(level: u8) -> Self {
        if level > Self::HIGHEST.0 {
            Self::HIGHEST
        } else {
            Self(level)
        }
    }

    /// Get the raw level
    pub const fn level(self) -> u8 {
        self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Opaque handle to a kernel execution context
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContextHandle(u64);

impl ContextHandle {
    /// Wrap a raw identifier handed out by the scheduler
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw identifier
    pub const fn as_raw(self) -> u64 {
        self.0
    }
}

/// Opaque handle to a kernel event
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventHandle(u64);

impl EventHandle {
    /// Wrap a raw identifier handed out by the scheduler
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw identifier
    pub const fn as_raw(self) -> u64 {
        self.0
    }
}

bitflags! {
    /// Event behaviour flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EventFlags: u32 {
        /// Waking one waiter clears the event again
        const AUTO_UNSIGNAL = 1 << 0;
    }
}

/// Per-context scratch slots
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum TlsSlot {
    /// Slot owned by the lkuser layer: identifies the user thread
    Lkuser = 0,
    /// Slot reserved for the console layer
    Console = 1,
}

/// Number of scratch slots per context
pub const TLS_SLOT_COUNT: usize = 2;

/// Body of a kernel context; the return value is its exit code
pub type ContextEntry = Box<dyn FnOnce() -> i32 + Send + 'static>;

/// Creation parameters for a kernel context
#[derive(Debug, Clone, Copy)]
pub struct ContextSpec<'a> {
    /// Debug name
    pub name: &'a str,
    /// Scheduling priority
    pub priority: Priority,
    /// Kernel stack size in bytes
    pub stack_size: usize,
}

/// Kernel scheduler
///
/// Contexts are created suspended and only run after [`resume`]. Every
/// non-detached context must be joined exactly once.
///
/// [`resume`]: KernelScheduler::resume
pub trait KernelScheduler: Send + Sync {
    /// Create a suspended kernel context running `entry`
    fn create_context(&self, spec: ContextSpec<'_>, entry: ContextEntry) -> HalResult<ContextHandle>;

    /// Bind an address space to a context before it first runs
    fn bind_address_space(&self, context: ContextHandle, space: crate::mmu::AddressSpaceId);

    /// Let a suspended context run
    fn resume(&self, context: ContextHandle) -> HalResult<()>;

    /// Block until the context has exited and return its exit code
    fn join(&self, context: ContextHandle) -> HalResult<i32>;

    /// Put the calling context to sleep
    fn sleep_ms(&self, millis: u64);

    /// Terminate the calling context
    fn exit_context(&self, code: i32) -> !;

    /// Read a scratch slot of the calling context
    fn tls_get(&self, slot: TlsSlot) -> usize;

    /// Write a scratch slot of the calling context, returning the old value
    fn tls_set(&self, slot: TlsSlot, value: usize) -> usize;

    /// Create an unsignaled event
    fn event_create(&self, flags: EventFlags) -> HalResult<EventHandle>;

    /// Block until the event is signaled
    fn event_wait(&self, event: EventHandle) -> HalResult<()>;

    /// Signal the event, waking waiters
    fn event_signal(&self, event: EventHandle, reschedule: bool);

    /// Destroy the event; nobody may be waiting on it
    fn event_destroy(&self, event: EventHandle);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::HIGH > Priority::LOW);
        assert!(Priority::DEFAULT > Priority::LOW);
        assert_eq!(Priority::new(200), Priority::HIGHEST);
        assert_eq!(Priority::default(), Priority::DEFAULT);
    }

    #[test]
    fn test_tls_slots_fit() {
        assert!((TlsSlot::Lkuser as usize) < TLS_SLOT_COUNT);
        assert!((TlsSlot::Console as usize) < TLS_SLOT_COUNT);
    }
}
