//! # ELF Loader
//!
//! Streaming ELF32/ELF64 parser and loader for lkuser binaries.
//!
//! The loader never sees the whole image. It pulls byte ranges through
//! [`ElfHooks::read`] and asks [`ElfHooks::alloc`] for the destination of
//! every loadable segment, so the same code loads from a file, a raw block
//! device or a test buffer into whatever address space the hooks target.
//!
//! ## Supported images
//! - 32-bit (ARM) or 64-bit (RISC-V), little endian, version 1
//! - `ET_EXEC` only (no relocation, no interpreter)
//! - `PT_LOAD` segments; everything else is skipped

use alloc::vec;
use bitflags::bitflags;
use core::slice;

use helix_hal::{HalError, HalResult, VirtAddr};

/// ELF magic number
pub const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];

/// Size of `e_ident`
pub const EI_NIDENT: usize = 16;

/// ELF class - 32-bit
pub const ELFCLASS32: u8 = 1;

/// ELF class - 64-bit
pub const ELFCLASS64: u8 = 2;

/// ELF data encoding - little endian
pub const ELFDATA2LSB: u8 = 1;

/// ELF version
pub const EV_CURRENT: u8 = 1;

/// ELF type - executable
pub const ET_EXEC: u16 = 2;

/// ELF type - shared object / PIE
pub const ET_DYN: u16 = 3;

/// Machine type - ARM
pub const EM_ARM: u16 = 40;

/// Machine type - RISC-V
pub const EM_RISCV: u16 = 243;

/// Program header type - loadable segment
pub const PT_LOAD: u32 = 1;

/// Segment permission - execute
pub const PF_X: u32 = 1;

/// Segment permission - write
pub const PF_W: u32 = 2;

/// Segment permission - read
pub const PF_R: u32 = 4;

bitflags! {
    /// Segment permissions from `p_flags`
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SegmentFlags: u32 {
        /// Executable
        const EXECUTE = PF_X;
        /// Writable
        const WRITE = PF_W;
        /// Readable
        const READ = PF_R;
    }
}

/// Size of the ELF32 file header
pub const EHDR32_SIZE: usize = 52;

/// Size of the ELF64 file header
pub const EHDR64_SIZE: usize = 64;

/// Size of one ELF32 program header
pub const PHDR32_SIZE: usize = 32;

/// Size of one ELF64 program header
pub const PHDR64_SIZE: usize = 56;

// the header buffer is sized for the larger class
static_assertions::const_assert!(EHDR32_SIZE <= EHDR64_SIZE);
static_assertions::const_assert!(EI_NIDENT < EHDR32_SIZE);

cfg_if::cfg_if! {
    if #[cfg(feature = "arm")] {
        const NATIVE_MACHINE: Option<u16> = Some(EM_ARM);
    } else if #[cfg(feature = "riscv")] {
        const NATIVE_MACHINE: Option<u16> = Some(EM_RISCV);
    } else {
        const NATIVE_MACHINE: Option<u16> = None;
    }
}

/// ELF errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfError {
    /// Invalid magic number
    InvalidMagic,
    /// Unsupported class (neither 32 nor 64-bit)
    UnsupportedClass,
    /// Unsupported endianness
    UnsupportedEndian,
    /// Unsupported version
    UnsupportedVersion,
    /// Unsupported type (not `ET_EXEC`)
    UnsupportedType,
    /// Unsupported machine
    UnsupportedMachine,
    /// Invalid program header
    InvalidProgramHeader,
    /// Segment too large
    SegmentTooLarge,
    /// Invalid entry point
    InvalidEntryPoint,
    /// Buffer too small
    BufferTooSmall,
    /// Image ended before a header or segment was complete
    Truncated,
    /// No loadable segments
    NoLoadableSegments,
    /// The read hook failed
    Read(HalError),
    /// The allocation hook failed
    Alloc(HalError),
}

impl From<ElfError> for HalError {
    fn from(err: ElfError) -> Self {
        match err {
            ElfError::Read(err) | ElfError::Alloc(err) => err,
            ElfError::Truncated => HalError::Io,
            ElfError::SegmentTooLarge => HalError::OutOfRange,
            ElfError::UnsupportedClass
            | ElfError::UnsupportedEndian
            | ElfError::UnsupportedVersion
            | ElfError::UnsupportedType
            | ElfError::UnsupportedMachine => HalError::NotSupported,
            ElfError::InvalidMagic
            | ElfError::InvalidProgramHeader
            | ElfError::InvalidEntryPoint
            | ElfError::BufferTooSmall
            | ElfError::NoLoadableSegments => HalError::InvalidArgs,
        }
    }
}

fn le_u16(d: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([d[at], d[at + 1]])
}

fn le_u32(d: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([d[at], d[at + 1], d[at + 2], d[at + 3]])
}

fn le_u64(d: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&d[at..at + 8]);
    u64::from_le_bytes(bytes)
}

/// Word size of an image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfClass {
    /// `ELFCLASS32`
    Elf32,
    /// `ELFCLASS64`
    Elf64,
}

impl ElfClass {
    /// Check the magic and read the class from `e_ident`
    pub fn from_ident(ident: &[u8]) -> Result<Self, ElfError> {
        if ident.len() < EI_NIDENT {
            return Err(ElfError::BufferTooSmall);
        }
        if ident[0..4] != ELF_MAGIC {
            return Err(ElfError::InvalidMagic);
        }
        match ident[4] {
            ELFCLASS32 => Ok(ElfClass::Elf32),
            ELFCLASS64 => Ok(ElfClass::Elf64),
            _ => Err(ElfError::UnsupportedClass),
        }
    }

    /// File header size
    pub const fn header_size(self) -> usize {
        match self {
            ElfClass::Elf32 => EHDR32_SIZE,
            ElfClass::Elf64 => EHDR64_SIZE,
        }
    }

    /// Program header size
    pub const fn phdr_size(self) -> usize {
        match self {
            ElfClass::Elf32 => PHDR32_SIZE,
            ElfClass::Elf64 => PHDR64_SIZE,
        }
    }
}

/// ELF file header, widened to 64-bit fields for both classes
#[derive(Debug, Clone, Copy)]
pub struct ElfHeader {
    /// Magic number and identification
    pub e_ident: [u8; EI_NIDENT],
    /// Word size
    pub class: ElfClass,
    /// Object file type
    pub e_type: u16,
    /// Machine type
    pub e_machine: u16,
    /// Object file version
    pub e_version: u32,
    /// Entry point address
    pub e_entry: u64,
    /// Program header offset
    pub e_phoff: u64,
    /// Section header offset
    pub e_shoff: u64,
    /// Processor-specific flags
    pub e_flags: u32,
    /// ELF header size
    pub e_ehsize: u16,
    /// Program header entry size
    pub e_phentsize: u16,
    /// Number of program headers
    pub e_phnum: u16,
    /// Section header entry size
    pub e_shentsize: u16,
    /// Number of section headers
    pub e_shnum: u16,
    /// Section name string table index
    pub e_shstrndx: u16,
}

impl ElfHeader {
    /// Parse and validate an ELF32 or ELF64 header
    pub fn parse(data: &[u8]) -> Result<Self, ElfError> {
        let class = ElfClass::from_ident(data)?;
        if data.len() < class.header_size() {
            return Err(ElfError::BufferTooSmall);
        }
        if data[5] != ELFDATA2LSB {
            return Err(ElfError::UnsupportedEndian);
        }
        if data[6] != EV_CURRENT {
            return Err(ElfError::UnsupportedVersion);
        }

        let e_type = le_u16(data, 16);
        if e_type != ET_EXEC {
            return Err(ElfError::UnsupportedType);
        }

        let mut e_ident = [0u8; EI_NIDENT];
        e_ident.copy_from_slice(&data[0..EI_NIDENT]);

        // the address-sized fields shift everything after e_entry
        let (e_entry, e_phoff, e_shoff, rest) = match class {
            ElfClass::Elf32 => (
                u64::from(le_u32(data, 24)),
                u64::from(le_u32(data, 28)),
                u64::from(le_u32(data, 32)),
                36,
            ),
            ElfClass::Elf64 => (le_u64(data, 24), le_u64(data, 32), le_u64(data, 40), 48),
        };

        Ok(Self {
            e_ident,
            class,
            e_type,
            e_machine: le_u16(data, 18),
            e_version: le_u32(data, 20),
            e_entry,
            e_phoff,
            e_shoff,
            e_flags: le_u32(data, rest),
            e_ehsize: le_u16(data, rest + 4),
            e_phentsize: le_u16(data, rest + 6),
            e_phnum: le_u16(data, rest + 8),
            e_shentsize: le_u16(data, rest + 10),
            e_shnum: le_u16(data, rest + 12),
            e_shstrndx: le_u16(data, rest + 14),
        })
    }
}

/// ELF program header, widened to 64-bit fields for both classes
#[derive(Debug, Clone, Copy)]
pub struct ProgramHeader {
    /// Segment type
    pub p_type: u32,
    /// Segment flags
    pub p_flags: u32,
    /// Offset in file
    pub p_offset: u64,
    /// Virtual address
    pub p_vaddr: u64,
    /// Physical address
    pub p_paddr: u64,
    /// Size in file
    pub p_filesz: u64,
    /// Size in memory
    pub p_memsz: u64,
    /// Alignment
    pub p_align: u64,
}

impl ProgramHeader {
    /// Parse the `class` program header at `offset` in `data`
    pub fn parse(data: &[u8], offset: usize, class: ElfClass) -> Result<Self, ElfError> {
        if data.len() < offset + class.phdr_size() {
            return Err(ElfError::BufferTooSmall);
        }

        let d = &data[offset..];

        Ok(match class {
            // ELF32 keeps p_flags after the sizes
            ElfClass::Elf32 => Self {
                p_type: le_u32(d, 0),
                p_offset: u64::from(le_u32(d, 4)),
                p_vaddr: u64::from(le_u32(d, 8)),
                p_paddr: u64::from(le_u32(d, 12)),
                p_filesz: u64::from(le_u32(d, 16)),
                p_memsz: u64::from(le_u32(d, 20)),
                p_flags: le_u32(d, 24),
                p_align: u64::from(le_u32(d, 28)),
            },
            ElfClass::Elf64 => Self {
                p_type: le_u32(d, 0),
                p_flags: le_u32(d, 4),
                p_offset: le_u64(d, 8),
                p_vaddr: le_u64(d, 16),
                p_paddr: le_u64(d, 24),
                p_filesz: le_u64(d, 32),
                p_memsz: le_u64(d, 40),
                p_align: le_u64(d, 48),
            },
        })
    }

    /// Check if segment is loadable
    pub fn is_loadable(&self) -> bool {
        self.p_type == PT_LOAD
    }

    /// Segment permissions
    pub fn flags(&self) -> SegmentFlags {
        SegmentFlags::from_bits_truncate(self.p_flags)
    }

    /// Check if segment is executable
    pub fn is_executable(&self) -> bool {
        self.flags().contains(SegmentFlags::EXECUTE)
    }

    /// Check if segment is writable
    pub fn is_writable(&self) -> bool {
        self.flags().contains(SegmentFlags::WRITE)
    }

    /// Check if segment is readable
    pub fn is_readable(&self) -> bool {
        self.flags().contains(SegmentFlags::READ)
    }

    /// Get segment permissions as a string
    pub fn permissions_string(&self) -> &'static str {
        match (self.is_readable(), self.is_writable(), self.is_executable()) {
            (true, true, true) => "rwx",
            (true, true, false) => "rw-",
            (true, false, true) => "r-x",
            (true, false, false) => "r--",
            (false, true, true) => "-wx",
            (false, true, false) => "-w-",
            (false, false, true) => "--x",
            (false, false, false) => "---",
        }
    }
}

/// Source and destination of an image being loaded.
///
/// # Safety
///
/// A pointer returned by [`ElfHooks::alloc`] must be valid for writes of
/// `len` bytes until the load finishes, and distinct calls must not return
/// overlapping ranges.
pub unsafe trait ElfHooks {
    /// Read up to `buf.len()` bytes of the image at `offset`.
    /// Returning 0 means the image ended.
    fn read(&mut self, buf: &mut [u8], offset: u64) -> HalResult<usize>;

    /// Provide `len` writable bytes that will appear at `vaddr` in the
    /// target address space. `index` is the program header index.
    fn alloc(&mut self, vaddr: VirtAddr, len: usize, index: usize, flags: SegmentFlags) -> HalResult<*mut u8>;
}

/// Result of a successful load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElfImage {
    /// Entry point
    pub entry: VirtAddr,
    /// Number of segments placed
    pub segments: usize,
}

/// ELF Loader
#[derive(Debug, Clone, Copy)]
pub struct ElfLoader {
    /// Only accept images for this machine, if set
    pub machine: Option<u16>,
    /// Maximum segment size
    pub max_segment_size: u64,
}

impl ElfLoader {
    /// Create new ELF loader accepting any machine
    pub const fn new() -> Self {
        Self {
            machine: None,
            max_segment_size: 256 * 1024 * 1024, // 256 MB
        }
    }

    /// Only accept images built for `machine`
    pub const fn for_machine(machine: u16) -> Self {
        Self {
            machine: Some(machine),
            ..Self::new()
        }
    }

    /// Only accept images for the architecture the trap entry was built
    /// for; any machine when no architecture is selected
    pub const fn native() -> Self {
        match NATIVE_MACHINE {
            Some(machine) => Self::for_machine(machine),
            None => Self::new(),
        }
    }

    /// Read and validate the file header
    pub fn read_header(&self, hooks: &mut dyn ElfHooks) -> Result<ElfHeader, ElfError> {
        let mut raw = [0u8; EHDR64_SIZE];
        read_exact(hooks, &mut raw[..EI_NIDENT], 0)?;
        let size = ElfClass::from_ident(&raw)?.header_size();
        read_exact(hooks, &mut raw[EI_NIDENT..size], EI_NIDENT as u64)?;
        let header = ElfHeader::parse(&raw[..size])?;

        if let Some(machine) = self.machine {
            if header.e_machine != machine {
                return Err(ElfError::UnsupportedMachine);
            }
        }
        if header.e_phnum > 0 && header.e_phentsize as usize != header.class.phdr_size() {
            return Err(ElfError::InvalidProgramHeader);
        }
        Ok(header)
    }

    /// Load every `PT_LOAD` segment and report the entry point.
    ///
    /// File-backed bytes are read into the allocated destination; the rest
    /// of each segment (bss) is zeroed.
    pub fn load(&self, hooks: &mut dyn ElfHooks) -> Result<ElfImage, ElfError> {
        let header = self.read_header(hooks)?;

        let phdr_size = header.class.phdr_size();
        let mut table = vec![0u8; header.e_phnum as usize * phdr_size];
        read_exact(hooks, &mut table, header.e_phoff)?;

        let mut segments = 0;
        for index in 0..header.e_phnum as usize {
            let ph = ProgramHeader::parse(&table, index * phdr_size, header.class)?;
            if !ph.is_loadable() || ph.p_memsz == 0 {
                continue;
            }
            self.load_segment(hooks, index, &ph)?;
            segments += 1;
        }

        if segments == 0 {
            return Err(ElfError::NoLoadableSegments);
        }

        let entry = usize::try_from(header.e_entry).map_err(|_| ElfError::InvalidEntryPoint)?;
        if entry == 0 {
            return Err(ElfError::InvalidEntryPoint);
        }

        Ok(ElfImage {
            entry: VirtAddr::new(entry),
            segments,
        })
    }

    fn load_segment(&self, hooks: &mut dyn ElfHooks, index: usize, ph: &ProgramHeader) -> Result<(), ElfError> {
        if ph.p_filesz > ph.p_memsz {
            return Err(ElfError::InvalidProgramHeader);
        }
        if ph.p_memsz > self.max_segment_size {
            return Err(ElfError::SegmentTooLarge);
        }

        let vaddr = usize::try_from(ph.p_vaddr).map_err(|_| ElfError::InvalidProgramHeader)?;
        let memsz = ph.p_memsz as usize;
        let filesz = ph.p_filesz as usize;

        log::trace!(
            "segment {}: vaddr {:#x} memsz {:#x} filesz {:#x} {}",
            index,
            vaddr,
            memsz,
            filesz,
            ph.permissions_string()
        );

        let dest = hooks
            .alloc(VirtAddr::new(vaddr), memsz, index, ph.flags())
            .map_err(ElfError::Alloc)?;
        // SAFETY: the ElfHooks contract makes `dest` valid for `memsz` bytes
        let dest = unsafe { slice::from_raw_parts_mut(dest, memsz) };

        read_exact(hooks, &mut dest[..filesz], ph.p_offset)?;
        dest[filesz..].fill(0);
        Ok(())
    }
}

impl Default for ElfLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Fill `buf` from the image at `offset`, tolerating short reads
fn read_exact(hooks: &mut dyn ElfHooks, buf: &mut [u8], offset: u64) -> Result<(), ElfError> {
    let mut done = 0;
    while done < buf.len() {
        let read = hooks
            .read(&mut buf[done..], offset + done as u64)
            .map_err(ElfError::Read)?;
        if read == 0 {
            return Err(ElfError::Truncated);
        }
        done += read;
    }
    Ok(())
}

/// Minimal images for tests
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use alloc::vec::Vec;

    /// An ELF64 RISC-V `ET_EXEC` image with one `PT_LOAD` segment holding
    /// `code` at `vaddr`, `bss` zero bytes after it, entry at `vaddr`.
    pub(crate) fn image(vaddr: u64, code: &[u8], bss: u64) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&ELF_MAGIC);
        out.extend_from_slice(&[ELFCLASS64, ELFDATA2LSB, EV_CURRENT]);
        out.resize(EI_NIDENT, 0);
        out.extend_from_slice(&ET_EXEC.to_le_bytes());
        out.extend_from_slice(&EM_RISCV.to_le_bytes());
        out.extend_from_slice(&1u32.to_le_bytes());
        out.extend_from_slice(&vaddr.to_le_bytes()); // entry
        out.extend_from_slice(&(EHDR64_SIZE as u64).to_le_bytes()); // phoff
        out.extend_from_slice(&0u64.to_le_bytes()); // shoff
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&(EHDR64_SIZE as u16).to_le_bytes());
        out.extend_from_slice(&(PHDR64_SIZE as u16).to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&[0u8; 6]);
        assert_eq!(out.len(), EHDR64_SIZE);

        let offset = (EHDR64_SIZE + PHDR64_SIZE) as u64;
        out.extend_from_slice(&PT_LOAD.to_le_bytes());
        out.extend_from_slice(&(PF_R | PF_X).to_le_bytes());
        out.extend_from_slice(&offset.to_le_bytes());
        out.extend_from_slice(&vaddr.to_le_bytes());
        out.extend_from_slice(&vaddr.to_le_bytes());
        out.extend_from_slice(&(code.len() as u64).to_le_bytes());
        out.extend_from_slice(&(code.len() as u64 + bss).to_le_bytes());
        out.extend_from_slice(&0x1000u64.to_le_bytes());

        out.extend_from_slice(code);
        out
    }

    /// The ELF32 ARM counterpart of [`image`]
    pub(crate) fn image32(vaddr: u32, code: &[u8], bss: u32) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&ELF_MAGIC);
        out.extend_from_slice(&[ELFCLASS32, ELFDATA2LSB, EV_CURRENT]);
        out.resize(EI_NIDENT, 0);
        out.extend_from_slice(&ET_EXEC.to_le_bytes());
        out.extend_from_slice(&EM_ARM.to_le_bytes());
        out.extend_from_slice(&1u32.to_le_bytes());
        out.extend_from_slice(&vaddr.to_le_bytes()); // entry
        out.extend_from_slice(&(EHDR32_SIZE as u32).to_le_bytes()); // phoff
        out.extend_from_slice(&0u32.to_le_bytes()); // shoff
        out.extend_from_slice(&0x0500_0200u32.to_le_bytes()); // EABI5
        out.extend_from_slice(&(EHDR32_SIZE as u16).to_le_bytes());
        out.extend_from_slice(&(PHDR32_SIZE as u16).to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&[0u8; 6]);
        assert_eq!(out.len(), EHDR32_SIZE);

        let offset = (EHDR32_SIZE + PHDR32_SIZE) as u32;
        out.extend_from_slice(&PT_LOAD.to_le_bytes());
        out.extend_from_slice(&offset.to_le_bytes());
        out.extend_from_slice(&vaddr.to_le_bytes());
        out.extend_from_slice(&vaddr.to_le_bytes());
        out.extend_from_slice(&(code.len() as u32).to_le_bytes());
        out.extend_from_slice(&(code.len() as u32 + bss).to_le_bytes());
        out.extend_from_slice(&(PF_R | PF_W | PF_X).to_le_bytes());
        out.extend_from_slice(&0x1000u32.to_le_bytes());

        out.extend_from_slice(code);
        out
    }
}
