//! # Thread States
//!
//! Thread state machine definition.

/// Thread state (unit-only for atomic storage)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum ThreadState {
    /// Kernel context created, not yet resumed
    #[default]
    Created = 0,
    /// Resumed; runs until the program exits its context
    Running = 1,
    /// Kernel context joined, the record may be released
    Joined = 2,
}

impl ThreadState {
    /// Convert from u32
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Created),
            1 => Some(Self::Running),
            2 => Some(Self::Joined),
            _ => None,
        }
    }

    /// Convert to u32
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// Whether the kernel context has been reclaimed
    pub fn is_terminated(&self) -> bool {
        matches!(self, ThreadState::Joined)
    }
}
