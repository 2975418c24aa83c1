//! Scripted console: input is queued up front, output is captured.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use helix_hal::console::Console;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Captured [`Console`]
#[derive(Debug, Default)]
pub struct MockConsole {
    input: Mutex<VecDeque<u8>>,
    output: Mutex<Vec<u8>>,
    reads: Mutex<usize>,
}

impl MockConsole {
    /// Create a console with no pending input
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue bytes for `getc`
    pub fn push_input(&self, bytes: &[u8]) {
        lock(&self.input).extend(bytes.iter().copied());
    }

    /// Everything written so far
    pub fn output(&self) -> Vec<u8> {
        lock(&self.output).clone()
    }

    /// Output as text
    pub fn output_string(&self) -> String {
        String::from_utf8_lossy(&self.output()).into_owned()
    }

    /// Number of `getc` calls
    pub fn read_calls(&self) -> usize {
        *lock(&self.reads)
    }
}

impl Console for MockConsole {
    fn getc(&self) -> Option<u8> {
        *lock(&self.reads) += 1;
        lock(&self.input).pop_front()
    }

    fn putc(&self, c: u8) {
        lock(&self.output).push(c);
    }
}
