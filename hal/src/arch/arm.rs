//! # ARM (AArch32) Trap Frame
//!
//! ## Calling Convention
//!
//! - Syscall number in r12
//! - Arguments in r0-r3
//! - 64-bit return value in r0 (low) and r1 (high)

use crate::trap::{SyscallArgs, TrapFrame};

/// Register frame pushed by the ARM exception entry path
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct ArmFaultFrame {
    /// Saved program status register
    pub spsr: u32,
    /// User stack pointer
    pub usp: u32,
    /// User link register
    pub ulr: u32,
    /// General purpose registers r0-r12
    pub r: [u32; 13],
    /// Exception link register
    pub lr: u32,
    /// Program counter
    pub pc: u32,
}

static_assertions::assert_eq_size!(ArmFaultFrame, [u32; 18]);

impl ArmFaultFrame {
    /// Build a frame for syscall `number` with `args`
    pub fn for_syscall(number: u32, args: [u32; 4]) -> Self {
        let mut frame = Self::default();
        frame.r[12] = number;
        frame.r[..4].copy_from_slice(&args);
        frame
    }

    /// The 64-bit return value as stored in r0/r1
    pub fn return_value(&self) -> u64 {
        (self.r[0] as u64) | ((self.r[1] as u64) << 32)
    }
}

impl TrapFrame for ArmFaultFrame {
    fn syscall_number(&self) -> usize {
        self.r[12] as usize
    }

    fn args(&self) -> SyscallArgs {
        [
            self.r[0] as usize,
            self.r[1] as usize,
            self.r[2] as usize,
            self.r[3] as usize,
        ]
    }

    fn set_return(&mut self, value: u64) {
        self.r[0] = (value & 0xffff_ffff) as u32;
        self.r[1] = ((value >> 32) & 0xffff_ffff) as u32;
    }
}
