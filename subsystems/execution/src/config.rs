//! # Runtime Configuration
//!
//! Tunables for processes, threads and the reaper.

use helix_hal::sched::Priority;
use helix_hal::PAGE_SIZE;

/// Default kernel stack size for user threads and the reaper (8 KiB)
pub const DEFAULT_KERNEL_STACK_SIZE: usize = 8 * 1024;

/// Pages per heap chunk handed out by `sbrk`
pub const HEAP_CHUNK_PAGES: usize = 16;

/// Runtime configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Priority of the reaper context
    pub reaper_priority: Priority,
    /// Priority of user thread contexts
    pub thread_priority: Priority,
    /// Kernel stack size for every context we create
    pub kernel_stack_size: usize,
    /// User-mode stack allocated per thread
    pub user_stack_size: usize,
    /// Granularity of heap growth
    pub heap_chunk_size: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            reaper_priority: Priority::HIGH,
            thread_priority: Priority::LOW,
            kernel_stack_size: DEFAULT_KERNEL_STACK_SIZE,
            user_stack_size: PAGE_SIZE,
            heap_chunk_size: PAGE_SIZE * HEAP_CHUNK_PAGES,
        }
    }
}

impl RuntimeConfig {
    /// Set the reaper priority
    pub fn with_reaper_priority(mut self, priority: Priority) -> Self {
        self.reaper_priority = priority;
        self
    }

    /// Set the user thread priority
    pub fn with_thread_priority(mut self, priority: Priority) -> Self {
        self.thread_priority = priority;
        self
    }

    /// Set the kernel stack size
    pub fn with_kernel_stack_size(mut self, size: usize) -> Self {
        self.kernel_stack_size = size;
        self
    }

    /// Set the per-thread user stack size, rounded up to whole pages
    pub fn with_user_stack_size(mut self, size: usize) -> Self {
        self.user_stack_size = helix_hal::align_up(size.max(1), PAGE_SIZE);
        self
    }

    /// Set the heap chunk size, rounded up to whole pages
    pub fn with_heap_chunk_size(mut self, size: usize) -> Self {
        self.heap_chunk_size = helix_hal::align_up(size.max(1), PAGE_SIZE);
        self
    }
}
