//! # File Handles
//!
//! The closed set of resources a user program can hold in its handle table:
//!
//! | Variant | read / write | read_at / write_at | close |
//! |---------|--------------|--------------------|-------|
//! | [`FileHandle::Fs`] | at the cursor | explicit offset | once, then `BadState` |
//! | [`FileHandle::Console`] | one byte in, all bytes out | not supported | no-op |
//! | [`FileHandle::Null`] | not supported | not supported | not supported |

use alloc::sync::Arc;
use core::fmt;
use spin::Mutex;

use helix_execution::Handle;
use helix_hal::console::Console;
use helix_hal::storage::{FileId, FileSystem};

use crate::config::UserlandConfig;
use crate::{UserError, UserResult};

/// A file handle
#[derive(Debug)]
pub enum FileHandle {
    /// File on a mounted filesystem
    Fs(FsFile),
    /// The interactive console
    Console(ConsoleFile),
    /// Placeholder that supports nothing
    Null,
}

impl FileHandle {
    /// Open `path`: the console path yields the console, anything else goes
    /// to the filesystem. Filesystem errors are returned unchanged.
    pub fn open(
        path: &str,
        config: &UserlandConfig,
        fs: &Arc<dyn FileSystem>,
        console: &Arc<dyn Console>,
    ) -> UserResult<Arc<Self>> {
        log::trace!("open '{}'", path);

        if path == config.console_path {
            return Ok(Arc::new(Self::Console(ConsoleFile::new(console.clone()))));
        }

        let file = fs.open(path)?;
        Ok(Arc::new(Self::Fs(FsFile::new(fs.clone(), file))))
    }

    fn as_handle(&self) -> Option<&dyn Handle> {
        match self {
            Self::Fs(file) => Some(file),
            Self::Console(console) => Some(console),
            Self::Null => None,
        }
    }
}

impl Handle for FileHandle {
    fn name(&self) -> &'static str {
        match self.as_handle() {
            Some(inner) => inner.name(),
            None => "null",
        }
    }

    fn read(&self, buf: &mut [u8]) -> UserResult<usize> {
        self.as_handle().ok_or(UserError::NotSupported)?.read(buf)
    }

    fn read_at(&self, buf: &mut [u8], offset: u64) -> UserResult<usize> {
        self.as_handle().ok_or(UserError::NotSupported)?.read_at(buf, offset)
    }

    fn write(&self, buf: &[u8]) -> UserResult<usize> {
        self.as_handle().ok_or(UserError::NotSupported)?.write(buf)
    }

    fn write_at(&self, buf: &[u8], offset: u64) -> UserResult<usize> {
        self.as_handle().ok_or(UserError::NotSupported)?.write_at(buf, offset)
    }

    fn close(&self) -> UserResult<()> {
        self.as_handle().ok_or(UserError::NotSupported)?.close()
    }

    fn is_open(&self) -> bool {
        self.as_handle().map_or(true, |inner| inner.is_open())
    }
}

// =============================================================================
// Filesystem-backed
// =============================================================================

struct FsState {
    file: Option<FileId>,
    pos: u64,
}

/// File on a mounted filesystem.
///
/// Every operation holds the handle lock for its full duration, so
/// concurrent users of one handle are serialized.
pub struct FsFile {
    fs: Arc<dyn FileSystem>,
    state: Mutex<FsState>,
}

impl FsFile {
    /// Wrap an open `file`
    pub fn new(fs: Arc<dyn FileSystem>, file: FileId) -> Self {
        Self {
            fs,
            state: Mutex::new(FsState {
                file: Some(file),
                pos: 0,
            }),
        }
    }

    /// Current cursor position
    pub fn position(&self) -> u64 {
        self.state.lock().pos
    }
}

impl Handle for FsFile {
    fn name(&self) -> &'static str {
        "fs"
    }

    fn read(&self, buf: &mut [u8]) -> UserResult<usize> {
        let mut state = self.state.lock();
        let file = state.file.ok_or(UserError::BadState)?;

        let read = self.fs.read(file, buf, state.pos)?;
        state.pos += read as u64;
        Ok(read)
    }

    fn read_at(&self, buf: &mut [u8], offset: u64) -> UserResult<usize> {
        let state = self.state.lock();
        let file = state.file.ok_or(UserError::BadState)?;
        self.fs.read(file, buf, offset)
    }

    fn write(&self, buf: &[u8]) -> UserResult<usize> {
        let mut state = self.state.lock();
        let file = state.file.ok_or(UserError::BadState)?;

        let written = self.fs.write(file, buf, state.pos)?;
        state.pos += written as u64;
        Ok(written)
    }

    fn write_at(&self, buf: &[u8], offset: u64) -> UserResult<usize> {
        let state = self.state.lock();
        let file = state.file.ok_or(UserError::BadState)?;
        self.fs.write(file, buf, offset)
    }

    fn close(&self) -> UserResult<()> {
        let mut state = self.state.lock();
        let file = state.file.take().ok_or(UserError::BadState)?;
        self.fs.close(file)
    }

    fn is_open(&self) -> bool {
        self.state.lock().file.is_some()
    }
}

impl Drop for FsFile {
    fn drop(&mut self) {
        if let Some(file) = self.state.get_mut().file.take() {
            if let Err(err) = self.fs.close(file) {
                log::warn!("closing dropped file {:?} failed: {}", file, err);
            }
        }
    }
}

impl fmt::Debug for FsFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("FsFile")
            .field("file", &state.file)
            .field("pos", &state.pos)
            .finish()
    }
}

// =============================================================================
// Console
// =============================================================================

/// The interactive console
pub struct ConsoleFile {
    console: Arc<dyn Console>,
}

impl ConsoleFile {
    /// Wrap `console`
    pub fn new(console: Arc<dyn Console>) -> Self {
        Self { console }
    }
}

/// Read at most one byte from `console`, turning `\r` into `\n`.
/// Returns 0 when no input is available.
pub fn console_read(console: &dyn Console, buf: &mut [u8]) -> usize {
    let Some(slot) = buf.first_mut() else {
        return 0;
    };
    match console.getc() {
        Some(b'\r') => {
            *slot = b'\n';
            1
        }
        Some(c) => {
            *slot = c;
            1
        }
        None => 0,
    }
}

/// Emit every byte of `buf` on `console`
pub fn console_write(console: &dyn Console, buf: &[u8]) -> usize {
    for &c in buf {
        console.putc(c);
    }
    buf.len()
}

impl Handle for ConsoleFile {
    fn name(&self) -> &'static str {
        "console"
    }

    fn read(&self, buf: &mut [u8]) -> UserResult<usize> {
        Ok(console_read(self.console.as_ref(), buf))
    }

    fn write(&self, buf: &[u8]) -> UserResult<usize> {
        Ok(console_write(self.console.as_ref(), buf))
    }
}

impl fmt::Debug for ConsoleFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsoleFile").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use helix_hal_mock::{MockConsole, MockFileSystem};

    fn setup() -> (Arc<MockFileSystem>, Arc<MockConsole>, Arc<dyn FileSystem>, Arc<dyn Console>) {
        let fs = Arc::new(MockFileSystem::new());
        let console = Arc::new(MockConsole::new());
        let fs_dyn: Arc<dyn FileSystem> = fs.clone();
        let console_dyn: Arc<dyn Console> = console.clone();
        (fs, console, fs_dyn, console_dyn)
    }

    #[test]
    fn test_open_console_path() {
        let (_, _, fs, console) = setup();
        let config = UserlandConfig::default();

        let handle = FileHandle::open("/dev/console", &config, &fs, &console).unwrap();
        assert!(matches!(*handle, FileHandle::Console(_)));
        assert_eq!(handle.name(), "console");
    }

    #[test]
    fn test_console_positioned_io_unsupported() {
        let (_, mock_console, fs, console) = setup();
        let config = UserlandConfig::default();

        for _ in 0..2 {
            let handle = FileHandle::open("/dev/console", &config, &fs, &console).unwrap();
            let mut buf = [0u8; 4];
            assert_eq!(handle.read_at(&mut buf, 0), Err(UserError::NotSupported));
            assert_eq!(handle.write_at(b"x", 0), Err(UserError::NotSupported));
            assert_eq!(handle.write(b"hi"), Ok(2));
            assert_eq!(handle.close(), Ok(()));
        }
        assert_eq!(mock_console.output_string(), "hihi");
    }

    #[test]
    fn test_console_read_translates_cr() {
        let (_, mock_console, _, console) = setup();
        mock_console.push_input(b"a\r");

        let file = ConsoleFile::new(console);
        let mut buf = [0u8; 8];
        assert_eq!(file.read(&mut buf), Ok(1));
        assert_eq!(buf[0], b'a');
        assert_eq!(file.read(&mut buf), Ok(1));
        assert_eq!(buf[0], b'\n');
        // exhausted input does not block
        assert_eq!(file.read(&mut buf), Ok(0));
    }

    #[test]
    fn test_open_missing_file_passes_error_through() {
        let (_, _, fs, console) = setup();
        let config = UserlandConfig::default();
        assert_eq!(
            FileHandle::open("/nope", &config, &fs, &console).unwrap_err(),
            UserError::NotFound
        );
    }

    #[test]
    fn test_fs_cursor_and_short_reads() {
        let (mock_fs, _, fs, console) = setup();
        mock_fs.add_file("/data", b"hello world");
        mock_fs.set_max_transfer(4);
        let config = UserlandConfig::default();

        let handle = FileHandle::open("/data", &config, &fs, &console).unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(handle.read(&mut buf), Ok(4));
        assert_eq!(&buf[..4], b"hell");
        assert_eq!(handle.read(&mut buf), Ok(4));
        assert_eq!(&buf[..4], b"o wo");

        // positioned reads leave the cursor alone
        assert_eq!(handle.read_at(&mut buf, 0), Ok(4));
        assert_eq!(&buf[..4], b"hell");
        if let FileHandle::Fs(file) = &*handle {
            assert_eq!(file.position(), 8);
        } else {
            panic!("expected a filesystem handle");
        }
        handle.close().unwrap();
    }

    #[test]
    fn test_fs_write_advances_cursor() {
        let (mock_fs, _, fs, console) = setup();
        mock_fs.add_file("/log", b"");
        let config = UserlandConfig::default();

        let handle = FileHandle::open("/log", &config, &fs, &console).unwrap();
        assert_eq!(handle.write(b"abc"), Ok(3));
        assert_eq!(handle.write(b"def"), Ok(3));
        assert_eq!(handle.write_at(b"X", 0), Ok(1));
        handle.close().unwrap();
        assert_eq!(mock_fs.contents("/log").unwrap(), b"Xbcdef");
    }

    #[test]
    fn test_fs_close_once() {
        let (mock_fs, _, fs, console) = setup();
        mock_fs.add_file("/data", b"x");
        let config = UserlandConfig::default();

        let handle = FileHandle::open("/data", &config, &fs, &console).unwrap();
        assert!(handle.is_open());
        assert_eq!(mock_fs.open_count(), 1);
        assert_eq!(handle.close(), Ok(()));
        assert!(!handle.is_open());
        assert_eq!(handle.close(), Err(UserError::BadState));
        let mut buf = [0u8; 1];
        assert_eq!(handle.read(&mut buf), Err(UserError::BadState));
        assert_eq!(mock_fs.open_count(), 0);
    }

    #[test]
    fn test_fs_drop_closes() {
        let (mock_fs, _, fs, console) = setup();
        mock_fs.add_file("/data", b"x");
        let config = UserlandConfig::default();

        let handle = FileHandle::open("/data", &config, &fs, &console).unwrap();
        assert_eq!(mock_fs.open_count(), 1);
        drop(handle);
        assert_eq!(mock_fs.open_count(), 0);
    }

    #[test]
    fn test_null_supports_nothing() {
        let null = FileHandle::Null;
        let mut buf = [0u8; 1];
        assert_eq!(null.name(), "null");
        assert_eq!(null.read(&mut buf), Err(UserError::NotSupported));
        assert_eq!(null.write(&buf), Err(UserError::NotSupported));
        assert_eq!(null.close(), Err(UserError::NotSupported));
        assert!(null.is_open());
    }
}
