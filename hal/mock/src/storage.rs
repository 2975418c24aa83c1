//! In-memory filesystem and block devices.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use helix_hal::storage::{BlockDeviceId, BlockDevices, FileId, FileSystem};
use helix_hal::{HalError, HalResult};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn read_at(data: &[u8], buf: &mut [u8], offset: u64, limit: usize) -> usize {
    let Ok(start) = usize::try_from(offset) else {
        return 0;
    };
    if start >= data.len() {
        return 0;
    }
    let len = buf.len().min(data.len() - start).min(limit);
    buf[..len].copy_from_slice(&data[start..start + len]);
    len
}

/// A mount request seen by the filesystem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountRecord {
    /// Mount point
    pub path: String,
    /// Filesystem type
    pub fs_type: String,
    /// Backing device
    pub device: String,
}

/// In-memory [`FileSystem`]
#[derive(Debug)]
pub struct MockFileSystem {
    next_id: AtomicU64,
    files: Mutex<HashMap<String, Vec<u8>>>,
    open: Mutex<HashMap<u64, String>>,
    mounts: Mutex<Vec<MountRecord>>,
    max_transfer: AtomicUsize,
}

impl MockFileSystem {
    /// Create an empty filesystem
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            files: Mutex::new(HashMap::new()),
            open: Mutex::new(HashMap::new()),
            mounts: Mutex::new(Vec::new()),
            max_transfer: AtomicUsize::new(usize::MAX),
        }
    }

    /// Create or replace `path`
    pub fn add_file(&self, path: &str, contents: &[u8]) {
        lock(&self.files).insert(path.to_owned(), contents.to_vec());
    }

    /// Current contents of `path`
    pub fn contents(&self, path: &str) -> Option<Vec<u8>> {
        lock(&self.files).get(path).cloned()
    }

    /// Cap every read and write at `limit` bytes to exercise short transfers
    pub fn set_max_transfer(&self, limit: usize) {
        self.max_transfer.store(limit, Ordering::SeqCst);
    }

    /// Files currently open
    pub fn open_count(&self) -> usize {
        lock(&self.open).len()
    }

    /// Mount requests, in call order
    pub fn mounts(&self) -> Vec<MountRecord> {
        lock(&self.mounts).clone()
    }

    fn path_of(&self, file: FileId) -> HalResult<String> {
        lock(&self.open)
            .get(&file.as_raw())
            .cloned()
            .ok_or(HalError::BadHandle)
    }
}

impl Default for MockFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl FileSystem for MockFileSystem {
    fn open(&self, path: &str) -> HalResult<FileId> {
        if !lock(&self.files).contains_key(path) {
            return Err(HalError::NotFound);
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        lock(&self.open).insert(id, path.to_owned());
        Ok(FileId::from_raw(id))
    }

    fn read(&self, file: FileId, buf: &mut [u8], offset: u64) -> HalResult<usize> {
        let path = self.path_of(file)?;
        let files = lock(&self.files);
        let data = files.get(&path).ok_or(HalError::NotFound)?;
        Ok(read_at(data, buf, offset, self.max_transfer.load(Ordering::SeqCst)))
    }

    fn write(&self, file: FileId, buf: &[u8], offset: u64) -> HalResult<usize> {
        let path = self.path_of(file)?;
        let start = usize::try_from(offset).map_err(|_| HalError::OutOfRange)?;
        let len = buf.len().min(self.max_transfer.load(Ordering::SeqCst));

        let mut files = lock(&self.files);
        let data = files.get_mut(&path).ok_or(HalError::NotFound)?;
        if data.len() < start + len {
            data.resize(start + len, 0);
        }
        data[start..start + len].copy_from_slice(&buf[..len]);
        Ok(len)
    }

    fn close(&self, file: FileId) -> HalResult<()> {
        lock(&self.open)
            .remove(&file.as_raw())
            .map(|_| ())
            .ok_or(HalError::BadHandle)
    }

    fn mount(&self, path: &str, fs_type: &str, device: &str) -> HalResult<()> {
        lock(&self.mounts).push(MountRecord {
            path: path.to_owned(),
            fs_type: fs_type.to_owned(),
            device: device.to_owned(),
        });
        Ok(())
    }
}

/// In-memory [`BlockDevices`]
#[derive(Debug)]
pub struct MockBlockDevices {
    next_id: AtomicU64,
    devices: Mutex<HashMap<String, Vec<u8>>>,
    open: Mutex<HashMap<u64, String>>,
}

impl MockBlockDevices {
    /// Create a set with no devices
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            devices: Mutex::new(HashMap::new()),
            open: Mutex::new(HashMap::new()),
        }
    }

    /// Publish a device called `name` holding `contents`
    pub fn add_device(&self, name: &str, contents: &[u8]) {
        lock(&self.devices).insert(name.to_owned(), contents.to_vec());
    }

    /// Devices currently open
    pub fn open_count(&self) -> usize {
        lock(&self.open).len()
    }
}

impl Default for MockBlockDevices {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockDevices for MockBlockDevices {
    fn open(&self, name: &str) -> HalResult<BlockDeviceId> {
        if !lock(&self.devices).contains_key(name) {
            return Err(HalError::NotFound);
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        lock(&self.open).insert(id, name.to_owned());
        Ok(BlockDeviceId::from_raw(id))
    }

    fn read(&self, device: BlockDeviceId, buf: &mut [u8], offset: u64) -> HalResult<usize> {
        let name = lock(&self.open)
            .get(&device.as_raw())
            .cloned()
            .ok_or(HalError::BadHandle)?;
        let devices = lock(&self.devices);
        let data = devices.get(&name).ok_or(HalError::NotFound)?;
        Ok(read_at(data, buf, offset, usize::MAX))
    }

    fn close(&self, device: BlockDeviceId) {
        lock(&self.open).remove(&device.as_raw());
    }
}
