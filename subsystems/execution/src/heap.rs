//! # Process Heap
//!
//! Bump-pointer frontier backing `sbrk`.
//!
//! The heap only grows. When an increment does not fit below the current
//! chunk top a fresh chunk is requested and the remainder of the old one
//! is abandoned.

use core::sync::atomic::{AtomicUsize, Ordering};

use helix_hal::VirtAddr;

use crate::{ExecError, ExecResult};

/// Heap frontier of one process.
///
/// Updated without a lock: concurrent `sbrk` from two threads of the same
/// process can hand out overlapping ranges.
#[derive(Debug, Default)]
pub struct HeapCursor {
    last: AtomicUsize,
    last_top: AtomicUsize,
}

impl HeapCursor {
    /// An empty heap, frontier at null
    pub const fn new() -> Self {
        Self {
            last: AtomicUsize::new(0),
            last_top: AtomicUsize::new(0),
        }
    }

    /// Current frontier
    pub fn frontier(&self) -> VirtAddr {
        VirtAddr::new(self.last.load(Ordering::Acquire))
    }

    /// End of the current chunk
    pub fn top(&self) -> VirtAddr {
        VirtAddr::new(self.last_top.load(Ordering::Acquire))
    }

    /// Move the frontier by `increment` bytes, returning the previous one.
    ///
    /// `allocate` is called with a multiple of `chunk_size` when the
    /// current chunk is too small and must return the base of a fresh
    /// region of that size.
    pub fn grow<F>(&self, increment: isize, chunk_size: usize, allocate: F) -> ExecResult<VirtAddr>
    where
        F: FnOnce(usize) -> ExecResult<VirtAddr>,
    {
        let increment = usize::try_from(increment).map_err(|_| ExecError::InvalidArgs)?;

        let last = self.last.load(Ordering::Acquire);
        if increment == 0 {
            return Ok(VirtAddr::new(last));
        }

        let top = self.last_top.load(Ordering::Acquire);
        if let Some(end) = last.checked_add(increment) {
            if end <= top {
                self.last.store(end, Ordering::Release);
                return Ok(VirtAddr::new(last));
            }
        }

        let size = increment
            .checked_next_multiple_of(chunk_size)
            .ok_or(ExecError::InvalidArgs)?;
        let base = allocate(size)?;

        log::trace!("heap chunk of {:#x} bytes at {:#x}", size, base);

        self.last.store(base.as_usize() + increment, Ordering::Release);
        self.last_top.store(base.as_usize() + size, Ordering::Release);
        Ok(base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::Cell;

    const CHUNK: usize = 0x10000;

    fn allocator<'a>(next: &'a Cell<usize>, calls: &'a Cell<usize>) -> impl FnOnce(usize) -> ExecResult<VirtAddr> + 'a {
        move |size| {
            assert_eq!(size % CHUNK, 0);
            calls.set(calls.get() + 1);
            let base = next.get();
            next.set(base + size + CHUNK);
            Ok(VirtAddr::new(base))
        }
    }

    #[test]
    fn test_zero_returns_frontier_without_allocating() {
        let heap = HeapCursor::new();
        let next = Cell::new(0x4000_0000);
        let calls = Cell::new(0);

        assert_eq!(heap.grow(0, CHUNK, allocator(&next, &calls)), Ok(VirtAddr::NULL));
        assert_eq!(calls.get(), 0);

        let base = heap.grow(100, CHUNK, allocator(&next, &calls)).unwrap();
        assert_eq!(calls.get(), 1);
        assert_eq!(heap.grow(0, CHUNK, allocator(&next, &calls)), Ok(base.add(100)));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_fitting_increments_are_contiguous() {
        let heap = HeapCursor::new();
        let next = Cell::new(0x4000_0000);
        let calls = Cell::new(0);

        let a = heap.grow(0x100, CHUNK, allocator(&next, &calls)).unwrap();
        let b = heap.grow(0x200, CHUNK, allocator(&next, &calls)).unwrap();
        assert_eq!(b.offset_from(a), 0x100);
        assert_eq!(calls.get(), 1);
        assert_eq!(heap.top(), a.add(CHUNK));
    }

    #[test]
    fn test_overflowing_increment_takes_new_chunk() {
        let heap = HeapCursor::new();
        let next = Cell::new(0x4000_0000);
        let calls = Cell::new(0);

        let a = heap.grow((CHUNK - 8) as isize, CHUNK, allocator(&next, &calls)).unwrap();
        let b = heap.grow(16, CHUNK, allocator(&next, &calls)).unwrap();
        assert_eq!(calls.get(), 2);
        assert!(b.as_usize() > a.as_usize() + CHUNK);
        assert_eq!(heap.frontier(), b.add(16));
        assert_eq!(heap.top(), b.add(CHUNK));

        // larger than a chunk: rounded up to a chunk multiple
        let c = heap.grow((CHUNK + 1) as isize, CHUNK, allocator(&next, &calls)).unwrap();
        assert_eq!(heap.top(), c.add(2 * CHUNK));
    }

    #[test]
    fn test_negative_increment_rejected() {
        let heap = HeapCursor::new();
        let next = Cell::new(0x4000_0000);
        let calls = Cell::new(0);
        assert_eq!(heap.grow(-1, CHUNK, allocator(&next, &calls)), Err(ExecError::InvalidArgs));
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn test_allocation_failure_leaves_cursor() {
        let heap = HeapCursor::new();
        assert_eq!(heap.grow(8, CHUNK, |_| Err(ExecError::NoMemory)), Err(ExecError::NoMemory));
        assert_eq!(heap.frontier(), VirtAddr::NULL);
        assert_eq!(heap.top(), VirtAddr::NULL);
    }
}
