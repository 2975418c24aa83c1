//! Syscall implementations.
//!
//! Arguments are raw register words; each handler takes what it needs and
//! ignores the rest.

use helix_execution::{Fd, Handle};
use helix_hal::trap::SyscallArgs;

use super::SyscallResult;
use crate::file_handle::{console_read, console_write};
use crate::uaccess::{user_cstr, user_slice, user_slice_mut};
use crate::userland::Userland;
use crate::UserError;

/// Descriptor argument, sign-extended from the low bits of the register
fn fd_arg(word: usize) -> Fd {
    word as isize as Fd
}

/// Length argument; negative lengths read as zero
fn len_arg(word: usize) -> usize {
    let len = word as isize;
    if len <= 0 {
        0
    } else {
        len as usize
    }
}

/// Record the exit code on the process and end the calling context
pub(super) fn sys_exit(userland: &Userland, args: SyscallArgs) -> SyscallResult {
    let code = args[0] as i32;

    match userland.current_process() {
        Ok(process) => {
            log::debug!("process {} exiting with {}", process.id(), code);
            // Sibling threads are not checked; the reaper tears them down with the process
            process.exit(code);
        }
        Err(err) => log::warn!("exit({}) from a context without a process: {}", code, err),
    }

    // the calling context ends here whatever happened above
    userland.runtime().services().scheduler.exit_context(code)
}

pub(super) fn sys_open(userland: &Userland, args: SyscallArgs) -> SyscallResult {
    // SAFETY: the caller's address space is active during the syscall
    let path = unsafe { user_cstr(args[0], userland.config().max_path_len)? };
    let process = userland.current_process()?;

    let handle = userland.open_file(path)?;
    match process.files().alloc(handle.clone()) {
        Ok(fd) => {
            log::trace!("open '{}' -> fd {}", path, fd);
            Ok(fd as u64)
        }
        Err(err) => {
            if let Err(close_err) = handle.close() {
                log::warn!("closing unplaced handle for '{}' failed: {}", path, close_err);
            }
            Err(err)
        }
    }
}

pub(super) fn sys_close(userland: &Userland, args: SyscallArgs) -> SyscallResult {
    let process = userland.current_process()?;
    process.files().close(fd_arg(args[0]))?;
    Ok(0)
}

pub(super) fn sys_write(userland: &Userland, args: SyscallArgs) -> SyscallResult {
    let fd = fd_arg(args[0]);
    let len = len_arg(args[2]);
    if len == 0 {
        return Ok(0);
    }

    // SAFETY: the caller's address space is active during the syscall
    let buf = unsafe { user_slice(args[1], len)? };

    // stdout and stderr always go to the console, whatever is in the table
    let written = match fd {
        1 | 2 => console_write(userland.console().as_ref(), buf),
        _ => {
            let process = userland.current_process()?;
            let handle = process.files().get(fd).ok_or(UserError::InvalidArgs)?;
            handle.write(buf)?
        }
    };
    Ok(written as u64)
}

pub(super) fn sys_read(userland: &Userland, args: SyscallArgs) -> SyscallResult {
    let fd = fd_arg(args[0]);
    let len = len_arg(args[2]);
    if len == 0 {
        return Ok(0);
    }

    // SAFETY: the caller's address space is active during the syscall
    let buf = unsafe { user_slice_mut(args[1], len)? };

    // stdin always comes from the console, whatever is in the table
    let read = match fd {
        0 => console_read(userland.console().as_ref(), buf),
        _ => {
            let process = userland.current_process()?;
            let handle = process.files().get(fd).ok_or(UserError::InvalidArgs)?;
            handle.read(buf)?
        }
    };
    Ok(read as u64)
}

pub(super) fn sys_lseek(_userland: &Userland, _args: SyscallArgs) -> SyscallResult {
    Err(UserError::NotImplemented)
}

pub(super) fn sys_sbrk(userland: &Userland, args: SyscallArgs) -> SyscallResult {
    let process = userland.current_process()?;
    let previous = process.grow_heap(args[0] as isize)?;
    Ok(previous.as_u64())
}

pub(super) fn sys_sleep_sec(userland: &Userland, args: SyscallArgs) -> SyscallResult {
    let millis = (args[0] as u64).saturating_mul(1000);
    userland.runtime().services().scheduler.sleep_ms(millis);
    Ok(0)
}

pub(super) fn sys_sleep_usec(userland: &Userland, args: SyscallArgs) -> SyscallResult {
    let millis = args[0] as u64 / 1000;
    userland.runtime().services().scheduler.sleep_ms(millis);
    Ok(0)
}

pub(super) fn sys_invalid(num: usize) -> SyscallResult {
    log::warn!("invalid syscall {}", num);
    Err(UserError::InvalidArgs)
}
