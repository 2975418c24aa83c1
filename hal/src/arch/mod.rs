//! # Architecture-Specific Trap Frames
//!
//! Register layouts for the targets lkuser runs on.

pub mod arm;
pub mod riscv;

pub use arm::ArmFaultFrame;
pub use riscv::RiscvShortFrame;
