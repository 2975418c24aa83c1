//! # Storage Collaborators
//!
//! Byte-addressable access to files by path and to raw block devices by
//! name. Both hand out opaque ids; callers must close what they open.

use crate::{HalError, HalResult};

/// Open file, owned by the filesystem layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileId(u64);

impl FileId {
    /// Wrap a raw id
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw id
    pub const fn as_raw(self) -> u64 {
        self.0
    }
}

/// Open block device, owned by the block layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockDeviceId(u64);

impl BlockDeviceId {
    /// Wrap a raw id
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw id
    pub const fn as_raw(self) -> u64 {
        self.0
    }
}

/// Filesystem layer
pub trait FileSystem: Send + Sync {
    /// Open `path`
    fn open(&self, path: &str) -> HalResult<FileId>;

    /// Read up to `buf.len()` bytes at `offset`. Short reads are allowed.
    fn read(&self, file: FileId, buf: &mut [u8], offset: u64) -> HalResult<usize>;

    /// Write up to `buf.len()` bytes at `offset`
    fn write(&self, _file: FileId, _buf: &[u8], _offset: u64) -> HalResult<usize> {
        Err(HalError::NotSupported)
    }

    /// Release `file`
    fn close(&self, file: FileId) -> HalResult<()>;

    /// Mount a filesystem of type `fs_type` from `device` at `path`
    fn mount(&self, _path: &str, _fs_type: &str, _device: &str) -> HalResult<()> {
        Err(HalError::NotSupported)
    }
}

/// Block device layer
pub trait BlockDevices: Send + Sync {
    /// Open the device called `name`
    fn open(&self, name: &str) -> HalResult<BlockDeviceId>;

    /// Read up to `buf.len()` bytes at byte `offset`
    fn read(&self, device: BlockDeviceId, buf: &mut [u8], offset: u64) -> HalResult<usize>;

    /// Release `device`
    fn close(&self, device: BlockDeviceId);
}
