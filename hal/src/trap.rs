//! # Syscall Trap Frames
//!
//! The saved register state captured when user code traps into the kernel.
//! The dispatch layer only ever sees a frame through [`TrapFrame`], so the
//! per-architecture register conventions stay in [`crate::arch`].

/// Number of argument registers forwarded to every syscall
pub const SYSCALL_ARG_COUNT: usize = 4;

/// Positional syscall arguments, one machine word each
pub type SyscallArgs = [usize; SYSCALL_ARG_COUNT];

/// Register view of a syscall trap
pub trait TrapFrame {
    /// Syscall number register
    fn syscall_number(&self) -> usize;

    /// The first [`SYSCALL_ARG_COUNT`] argument registers, in order
    fn args(&self) -> SyscallArgs;

    /// Store a 64-bit return value, split across registers where the
    /// machine word is narrower
    fn set_return(&mut self, value: u64);

    /// Step past the trapping instruction, if the architecture requires it
    fn advance(&mut self) {}
}
