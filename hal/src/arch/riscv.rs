//! # RISC-V Trap Frame
//!
//! ## Calling Convention
//!
//! - Syscall number in t0
//! - Arguments in a0-a3
//! - Return value in a0 (and a1 for the high half on RV32)
//! - `epc` points at the `ecall` and must be stepped over

use crate::trap::{SyscallArgs, TrapFrame};

/// Short interrupt frame saved by the RISC-V trap entry path
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct RiscvShortFrame {
    /// Exception program counter
    pub epc: usize,
    /// Saved status register
    pub status: usize,
    /// Return address
    pub ra: usize,
    /// Argument registers
    pub a0: usize,
    /// `a1`
    pub a1: usize,
    /// `a2`
    pub a2: usize,
    /// `a3`
    pub a3: usize,
    /// `a4`
    pub a4: usize,
    /// `a5`
    pub a5: usize,
    /// `a6`
    pub a6: usize,
    /// `a7`
    pub a7: usize,
    /// Temporaries
    pub t0: usize,
    /// `t1`
    pub t1: usize,
    /// `t2`
    pub t2: usize,
    /// `t3`
    pub t3: usize,
    /// `t4`
    pub t4: usize,
    /// `t5`
    pub t5: usize,
    /// `t6`
    pub t6: usize,
}

static_assertions::assert_eq_size!(RiscvShortFrame, [usize; 18]);

/// Size of the `ecall` instruction
const ECALL_SIZE: usize = 4;

impl RiscvShortFrame {
    /// Build a frame for syscall `number` with `args`
    pub fn for_syscall(number: usize, args: SyscallArgs) -> Self {
        Self {
            t0: number,
            a0: args[0],
            a1: args[1],
            a2: args[2],
            a3: args[3],
            ..Self::default()
        }
    }

    /// The return value as stored in the frame
    pub fn return_value(&self) -> u64 {
        cfg_if::cfg_if! {
            if #[cfg(target_pointer_width = "32")] {
                (self.a0 as u64) | ((self.a1 as u64) << 32)
            } else {
                self.a0 as u64
            }
        }
    }
}

impl TrapFrame for RiscvShortFrame {
    fn syscall_number(&self) -> usize {
        self.t0
    }

    fn args(&self) -> SyscallArgs {
        [self.a0, self.a1, self.a2, self.a3]
    }

    fn set_return(&mut self, value: u64) {
        cfg_if::cfg_if! {
            if #[cfg(target_pointer_width = "32")] {
                self.a0 = (value & 0xffff_ffff) as usize;
                self.a1 = ((value >> 32) & 0xffff_ffff) as usize;
            } else {
                self.a0 = value as usize;
            }
        }
    }

    fn advance(&mut self) {
        self.epc += ECALL_SIZE;
    }
}
