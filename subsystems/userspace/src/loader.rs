//! # Program Loader
//!
//! Binds an ELF image into a process's address space and starts it.
//!
//! ## Loading
//! 1. Switch the active address space to the process's
//! 2. Open the image source (file path or raw block device)
//! 3. Stream the image through [`ElfLoader`]; every segment gets a region
//!    of its own at the segment's page-aligned address
//! 4. Close the source and restore the previous active address space
//!
//! A failed load leaves the process `Initial` with no image bound, ready
//! for another attempt.

use alloc::format;
use alloc::sync::Arc;

use helix_execution::{Process, ProcessState};
use helix_hal::mmu::{AddressSpaceId, AddressSpaceManager, MmuFlags, RegionRequest};
use helix_hal::storage::{BlockDeviceId, FileId};
use helix_hal::{HalResult, VirtAddr, PAGE_SIZE};

use crate::elf::{ElfHooks, ElfLoader, SegmentFlags};
use crate::userland::Userland;
use crate::{UserError, UserResult, STATS};

/// Where a program image comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSource<'a> {
    /// A file on a mounted filesystem
    Path(&'a str),
    /// A raw block device holding the image at offset 0
    Device(&'a str),
}

enum OpenSource {
    File(FileId),
    Device(BlockDeviceId),
}

/// Hooks that read from the source and place segments in the process
struct ProcessHooks<'a> {
    userland: &'a Userland,
    process: &'a Process,
    source: OpenSource,
}

impl<'a> ProcessHooks<'a> {
    fn open(userland: &'a Userland, process: &'a Process, source: ImageSource<'_>) -> UserResult<Self> {
        let source = match source {
            ImageSource::Path(path) => OpenSource::File(userland.fs().open(path)?),
            ImageSource::Device(name) => OpenSource::Device(userland.blocks().open(name)?),
        };
        Ok(Self {
            userland,
            process,
            source,
        })
    }

    fn close(self) {
        match self.source {
            OpenSource::File(file) => {
                if let Err(err) = self.userland.fs().close(file) {
                    log::warn!("closing image file failed: {}", err);
                }
            }
            OpenSource::Device(device) => self.userland.blocks().close(device),
        }
    }

    fn space(&self) -> AddressSpaceId {
        self.process.address_space()
    }
}

// SAFETY: `alloc` returns memory from a fresh region of the process's
// address space, which is active for the whole load
unsafe impl ElfHooks for ProcessHooks<'_> {
    fn read(&mut self, buf: &mut [u8], offset: u64) -> HalResult<usize> {
        match self.source {
            OpenSource::File(file) => self.userland.fs().read(file, buf, offset),
            OpenSource::Device(device) => self.userland.blocks().read(device, buf, offset),
        }
    }

    fn alloc(&mut self, vaddr: VirtAddr, len: usize, index: usize, flags: SegmentFlags) -> HalResult<*mut u8> {
        let aligned = vaddr.align_down(PAGE_SIZE);
        let slack = vaddr.offset_from(aligned);
        let size = len
            .checked_add(slack)
            .and_then(|len| len.checked_next_multiple_of(PAGE_SIZE))
            .ok_or(UserError::InvalidArgs)?;

        log::trace!(
            "segment {} ({:?}): {:#x}+{:#x} -> region {:#x}+{:#x}",
            index,
            flags,
            vaddr,
            len,
            aligned,
            size
        );

        let name = format!("lkuser{}", index);
        let request = RegionRequest::specific(&name, aligned, size, MmuFlags::user_image());
        let base = self.process.services().aspaces.allocate(self.space(), request)?;

        Ok(base.add(slack).as_usize() as *mut u8)
    }
}

/// Load the image at `source` into `process` and record its entry point
pub fn load(userland: &Userland, process: &Arc<Process>, source: ImageSource<'_>) -> UserResult<VirtAddr> {
    if process.state() != ProcessState::Initial {
        return Err(UserError::BadState);
    }

    let aspaces = &process.services().aspaces;
    let previous = aspaces.active();
    aspaces.set_active(Some(process.address_space()));

    let result = load_into(userland, process, source);

    aspaces.set_active(previous);

    match result {
        Ok(entry) => {
            process.set_loaded(entry);
            STATS.program_loaded();
            log::debug!("process {}: loaded {:?}, entry {:#x}", process.id(), source, entry);
            Ok(entry)
        }
        Err(err) => {
            process.reset_loader();
            log::warn!("process {}: loading {:?} failed: {}", process.id(), source, err);
            Err(err)
        }
    }
}

fn load_into(userland: &Userland, process: &Process, source: ImageSource<'_>) -> UserResult<VirtAddr> {
    let mut hooks = ProcessHooks::open(userland, process, source)?;
    let result = ElfLoader::native().load(&mut hooks);
    hooks.close();

    let image = result?;
    Ok(image.entry)
}

/// Start the loaded image on a fresh thread.
///
/// With `wait`, blocks until the process exits and returns its exit code.
pub fn start_binary(process: &Arc<Process>, wait: bool) -> UserResult<Option<i32>> {
    let loader = process.loader_state();
    log::trace!("process {}: start, entry {:#x}", process.id(), loader.entry);

    if !loader.loaded {
        return Err(UserError::NotReady);
    }
    if process.state() != ProcessState::Initial {
        return Err(UserError::BadState);
    }

    let thread = match process.create_thread(loader.entry) {
        Ok(thread) => thread,
        Err(err) => {
            discard(process, err);
            return Err(err);
        }
    };

    process.start()?;

    log::trace!("resuming main thread {}", thread.id());
    if let Err(err) = thread.resume() {
        discard(process, err);
        return Err(err);
    }

    if wait {
        return Ok(Some(process.wait()?));
    }
    Ok(None)
}

/// Hand a process that will never run to the reaper
pub fn discard(process: &Process, reason: UserError) {
    if process.state().is_dead() {
        return;
    }
    log::debug!("process {}: discarded ({})", process.id(), reason);
    process.exit(reason.code());
}
