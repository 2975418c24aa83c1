//! # Handles
//!
//! Per-process resources addressed by small integers.
//!
//! A [`Handle`] exposes the capability set {read, write, positioned
//! read/write, close}; every capability a variant does not have reports
//! [`ExecError::NotSupported`]. A [`HandleTable`] is a fixed array of
//! optional handles that allocates first fit, POSIX style, so the lowest
//! free number is always handed out next.

use alloc::sync::Arc;
use core::fmt;
use spin::Mutex;

use crate::{ExecError, ExecResult};

/// Descriptor number as seen by user programs
pub type Fd = i32;

/// A closable resource that may live in a handle table
pub trait Handle: Send + Sync {
    /// Short name of the handle variant, for diagnostics
    fn name(&self) -> &'static str;

    /// Read at the handle's cursor, advancing it
    fn read(&self, _buf: &mut [u8]) -> ExecResult<usize> {
        Err(ExecError::NotSupported)
    }

    /// Read at `offset`, leaving any cursor alone
    fn read_at(&self, _buf: &mut [u8], _offset: u64) -> ExecResult<usize> {
        Err(ExecError::NotSupported)
    }

    /// Write at the handle's cursor, advancing it
    fn write(&self, _buf: &[u8]) -> ExecResult<usize> {
        Err(ExecError::NotSupported)
    }

    /// Write at `offset`, leaving any cursor alone
    fn write_at(&self, _buf: &[u8], _offset: u64) -> ExecResult<usize> {
        Err(ExecError::NotSupported)
    }

    /// Release the underlying resource
    fn close(&self) -> ExecResult<()> {
        Ok(())
    }

    /// Whether the underlying resource is still held
    fn is_open(&self) -> bool {
        true
    }
}

/// A static fixed size table, one per process.
pub struct HandleTable<const N: usize> {
    slots: Mutex<[Option<Arc<dyn Handle>>; N]>,
}

impl<const N: usize> HandleTable<N> {
    /// Create an empty table
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(core::array::from_fn(|_| None)),
        }
    }

    /// Capacity of the table
    pub const fn capacity(&self) -> usize {
        N
    }

    fn slot_index(fd: Fd) -> Option<usize> {
        usize::try_from(fd).ok().filter(|&i| i < N)
    }

    /// Store `handle` in the lowest free slot.
    ///
    /// Fails with [`ExecError::NotFound`] when the table is full; the
    /// handle is dropped in that case.
    pub fn alloc(&self, handle: Arc<dyn Handle>) -> ExecResult<Fd> {
        let mut slots = self.slots.lock();
        let index = slots
            .iter()
            .position(Option::is_none)
            .ok_or(ExecError::NotFound)?;
        slots[index] = Some(handle);
        Ok(index as Fd)
    }

    /// Store `handle` in slot `fd`, replacing whatever was there.
    ///
    /// A replaced handle is dropped without being closed; callers must not
    /// overwrite live slots.
    pub fn alloc_specific(&self, handle: Arc<dyn Handle>, fd: Fd) -> ExecResult<Fd> {
        let index = Self::slot_index(fd).ok_or(ExecError::InvalidArgs)?;
        let replaced = self.slots.lock()[index].replace(handle);
        if let Some(old) = replaced {
            log::warn!("fd {} overwritten while holding a {} handle", fd, old.name());
        }
        Ok(fd)
    }

    /// Close the handle in slot `fd` and empty the slot.
    ///
    /// The slot is emptied under the lock; the handle itself is closed and
    /// released after the lock is dropped.
    pub fn close(&self, fd: Fd) -> ExecResult<()> {
        let index = Self::slot_index(fd).ok_or(ExecError::InvalidArgs)?;

        let handle = self.slots.lock()[index].take().ok_or(ExecError::NotFound)?;

        log::trace!("closing fd {} ({})", fd, handle.name());
        handle.close()
    }

    /// Close every open slot, used during process teardown
    pub fn close_all(&self) {
        for fd in 0..N as Fd {
            match self.close(fd) {
                Ok(()) | Err(ExecError::NotFound) => {}
                Err(err) => log::warn!("close of fd {} during teardown failed: {}", fd, err),
            }
        }
    }

    /// Look up the handle in slot `fd`
    pub fn get(&self, fd: Fd) -> Option<Arc<dyn Handle>> {
        let index = Self::slot_index(fd)?;
        self.slots.lock()[index].clone()
    }

    /// Number of occupied slots
    pub fn open_count(&self) -> usize {
        self.slots.lock().iter().filter(|s| s.is_some()).count()
    }
}

impl<const N: usize> Default for HandleTable<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> Drop for HandleTable<N> {
    fn drop(&mut self) {
        // all handles must be closed before destruction
        debug_assert!(
            self.slots.get_mut().iter().all(Option::is_none),
            "handle table dropped with open handles"
        );
    }
}

impl<const N: usize> fmt::Debug for HandleTable<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleTable")
            .field("capacity", &N)
            .field("open", &self.open_count())
            .finish()
    }
}
