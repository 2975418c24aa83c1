//! # Console Abstraction
//!
//! The interactive character device behind stdin and stdout.

/// Interactive console
pub trait Console: Send + Sync {
    /// Pull one character from the input source, `None` when none is pending
    fn getc(&self) -> Option<u8>;

    /// Emit one character to the output sink
    fn putc(&self, c: u8);

    /// Emit a run of characters
    fn write_bytes(&self, bytes: &[u8]) {
        for &c in bytes {
            self.putc(c);
        }
    }
}

/// `core::fmt::Write` adapter over a console
pub struct ConsoleWriter<'a>(pub &'a dyn Console);

impl core::fmt::Write for ConsoleWriter<'_> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        self.0.write_bytes(s.as_bytes());
        Ok(())
    }
}

impl core::fmt::Debug for ConsoleWriter<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("ConsoleWriter")
    }
}
