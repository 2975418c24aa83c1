//! # User Memory Access
//!
//! Syscall arguments arrive as raw machine words. These helpers turn them
//! into kernel views of user memory. The calling thread's address space is
//! active during a syscall, so user addresses are directly dereferenceable;
//! no further validation of the mapping is done here.

use core::slice;

use crate::{UserError, UserResult};

/// View `len` bytes of user memory at `addr`.
///
/// # Safety
///
/// `addr..addr + len` must be mapped and readable in the active address
/// space for the duration of the borrow.
pub unsafe fn user_slice<'a>(addr: usize, len: usize) -> UserResult<&'a [u8]> {
    if len == 0 {
        return Ok(&[]);
    }
    if addr == 0 {
        return Err(UserError::Fault);
    }
    addr.checked_add(len).ok_or(UserError::Fault)?;
    // SAFETY: caller guarantees the range is mapped
    Ok(unsafe { slice::from_raw_parts(addr as *const u8, len) })
}

/// Mutable view of `len` bytes of user memory at `addr`.
///
/// # Safety
///
/// `addr..addr + len` must be mapped and writable in the active address
/// space and not aliased for the duration of the borrow.
pub unsafe fn user_slice_mut<'a>(addr: usize, len: usize) -> UserResult<&'a mut [u8]> {
    if len == 0 {
        return Ok(&mut []);
    }
    if addr == 0 {
        return Err(UserError::Fault);
    }
    addr.checked_add(len).ok_or(UserError::Fault)?;
    // SAFETY: caller guarantees the range is mapped and exclusive
    Ok(unsafe { slice::from_raw_parts_mut(addr as *mut u8, len) })
}

/// Read a NUL-terminated UTF-8 string of at most `max_len` bytes at `addr`.
///
/// # Safety
///
/// Every byte from `addr` up to and including the terminator must be
/// mapped and readable. At most `max_len + 1` bytes are read: the longest
/// accepted string plus its terminator.
pub unsafe fn user_cstr<'a>(addr: usize, max_len: usize) -> UserResult<&'a str> {
    if addr == 0 {
        return Err(UserError::InvalidArgs);
    }

    let ptr = addr as *const u8;
    let mut len = 0;
    loop {
        if len > max_len {
            return Err(UserError::BadPath);
        }
        // SAFETY: within the caller guaranteed range
        if unsafe { ptr.add(len).read() } == 0 {
            break;
        }
        len += 1;
    }

    // SAFETY: the `len` bytes before the terminator were just read
    let bytes = unsafe { slice::from_raw_parts(ptr, len) };
    core::str::from_utf8(bytes).map_err(|_| UserError::BadPath)
}
