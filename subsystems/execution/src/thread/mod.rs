//! # Thread Management
//!
//! User threads: one kernel context each, bound to a process address
//! space and started in user mode at the program entry point.

pub mod thread;
pub mod local_storage;
pub mod states;

pub use thread::*;
pub use states::*;
