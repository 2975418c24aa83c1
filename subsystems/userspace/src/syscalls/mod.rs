//! # Syscall Interface
//!
//! The lkuser syscall table and the trap decode layer in front of it.
//!
//! ## Convention
//! - Syscall number and four argument words come from the trap frame
//!   ([`TrapFrame`]); every handler receives all four, whatever its arity
//! - Return: one 64-bit value, negative status code on failure
//!
//! | # | Syscall | Arguments |
//! |---|---------|-----------|
//! | 0 | exit | code |
//! | 1 | open | path, flags, mode |
//! | 2 | close | fd |
//! | 3 | write | fd, buf, len |
//! | 4 | read | fd, buf, len |
//! | 5 | lseek | fd, pos, whence |
//! | 6 | sbrk | increment |
//! | 7 | sleep_sec | seconds |
//! | 8 | sleep_usec | microseconds |

mod entry;
mod handlers;

use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

use helix_hal::trap::{SyscallArgs, TrapFrame};

use crate::userland::Userland;
use crate::{UserError, UserResult, STATS};

pub use entry::{install, installed};

/// Syscall numbers
#[repr(usize)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syscall {
    /// Terminate the calling process
    Exit = 0,
    /// Open a file
    Open = 1,
    /// Close file descriptor
    Close = 2,
    /// Write to file descriptor
    Write = 3,
    /// Read from file descriptor
    Read = 4,
    /// Seek
    Lseek = 5,
    /// Grow the heap
    Sbrk = 6,
    /// Sleep for whole seconds
    SleepSec = 7,
    /// Sleep for microseconds, floored to milliseconds
    SleepUsec = 8,
}

/// Number of syscall slots
pub const SYSCALL_COUNT: usize = 9;

impl Syscall {
    /// Every syscall, in number order
    pub const ALL: [Syscall; SYSCALL_COUNT] = [
        Syscall::Exit,
        Syscall::Open,
        Syscall::Close,
        Syscall::Write,
        Syscall::Read,
        Syscall::Lseek,
        Syscall::Sbrk,
        Syscall::SleepSec,
        Syscall::SleepUsec,
    ];

    /// Convert from number
    pub fn from_num(num: usize) -> Option<Self> {
        Self::ALL.get(num).copied()
    }

    /// Get the syscall name
    pub fn name(self) -> &'static str {
        match self {
            Syscall::Exit => "exit",
            Syscall::Open => "open",
            Syscall::Close => "close",
            Syscall::Write => "write",
            Syscall::Read => "read",
            Syscall::Lseek => "lseek",
            Syscall::Sbrk => "sbrk",
            Syscall::SleepSec => "sleep_sec",
            Syscall::SleepUsec => "sleep_usec",
        }
    }
}

/// Syscall result: the raw return value or a status code
pub type SyscallResult = UserResult<u64>;

/// Syscall handler function type
pub type SyscallHandler = fn(&Userland, SyscallArgs) -> SyscallResult;

/// Syscall table entry
#[derive(Clone, Copy)]
struct SyscallEntry {
    /// Handler function
    handler: SyscallHandler,
    /// Number of arguments the handler actually uses
    arg_count: u8,
}

/// Raw register value for a syscall result
pub fn encode_result(result: SyscallResult) -> u64 {
    match result {
        Ok(value) => value,
        Err(err) => err.code() as i64 as u64,
    }
}

/// The syscall table
pub struct SyscallTable {
    /// Handlers indexed by syscall number
    entries: [SyscallEntry; SYSCALL_COUNT],
    /// Statistics
    call_counts: [AtomicU64; SYSCALL_COUNT],
    invalid_calls: AtomicU64,
}

impl SyscallTable {
    /// Create the standard table
    pub fn new() -> Self {
        const ZERO: AtomicU64 = AtomicU64::new(0);

        let entry = |handler: SyscallHandler, arg_count| SyscallEntry { handler, arg_count };
        Self {
            entries: [
                entry(handlers::sys_exit, 1),
                entry(handlers::sys_open, 3),
                entry(handlers::sys_close, 1),
                entry(handlers::sys_write, 3),
                entry(handlers::sys_read, 3),
                entry(handlers::sys_lseek, 3),
                entry(handlers::sys_sbrk, 1),
                entry(handlers::sys_sleep_sec, 1),
                entry(handlers::sys_sleep_usec, 1),
            ],
            call_counts: [ZERO; SYSCALL_COUNT],
            invalid_calls: AtomicU64::new(0),
        }
    }

    /// Number of arguments `syscall` uses
    pub fn arg_count(&self, syscall: Syscall) -> u8 {
        self.entries[syscall as usize].arg_count
    }

    /// Run syscall `num`. Unknown numbers fail with `InvalidArgs`.
    pub fn handle(&self, userland: &Userland, num: usize, args: SyscallArgs) -> SyscallResult {
        STATS.syscall_made();

        let Some(syscall) = Syscall::from_num(num) else {
            self.invalid_calls.fetch_add(1, Ordering::Relaxed);
            return handlers::sys_invalid(num);
        };

        self.call_counts[num].fetch_add(1, Ordering::Relaxed);
        log::trace!("{} {:#x?}", syscall.name(), args);

        (self.entries[num].handler)(userland, args)
    }

    /// Get syscall count
    pub fn get_count(&self, syscall: Syscall) -> u64 {
        self.call_counts[syscall as usize].load(Ordering::Relaxed)
    }

    /// Calls with an unknown number
    pub fn invalid_count(&self) -> u64 {
        self.invalid_calls.load(Ordering::Relaxed)
    }
}

impl Default for SyscallTable {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SyscallTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for syscall in Syscall::ALL {
            map.entry(&syscall.name(), &self.get_count(syscall));
        }
        map.finish()
    }
}

/// Decode a syscall trap, run it and store the result in the frame
pub fn handle_trap(userland: &Userland, frame: &mut dyn TrapFrame) {
    let num = frame.syscall_number();
    let result = userland.syscalls().handle(userland, num, frame.args());

    if let Err(err) = result {
        log::trace!("syscall {} failed: {}", num, err);
    }
    frame.set_return(encode_result(result));
    frame.advance();
}
