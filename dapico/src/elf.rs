//! Minimal reader for 32-bit little-endian ELF images, just enough to find
//! the loadable segments and the entry point of RP2040/RP2350 firmware.

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

const ELF_HEADER_SIZE: usize = 52;
const ELF_IDENT_SIZE: usize = 16;
const PROGRAM_HEADER_SIZE: usize = 32;
const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];
const ELF_CLASS_32: u8 = 1;
const ELF_DATA_LITTLE_ENDIAN: u8 = 1;
const PT_LOAD: u32 = 1;

const EM_ARM: u16 = 40;
const EM_RISCV: u16 = 243;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfErrorKind {
    Format,
    ReadFailed,
}

#[derive(Debug, Error)]
pub enum ElfError {
    #[error("Failed to open file: {path}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("ELF file is empty")]
    Empty,
    #[error("ELF header truncated")]
    HeaderTruncated,
    #[error("Missing ELF magic")]
    BadMagic,
    #[error("Unsupported ELF class")]
    UnsupportedClass(u8),
    #[error("Unsupported ELF endian")]
    UnsupportedEndian(u8),
    #[error("ELF program header table missing")]
    MissingProgramHeaders,
    #[error("ELF program header table truncated")]
    ProgramHeadersTruncated,
    #[error("ELF program header truncated")]
    ProgramHeaderTruncated(u16),
    #[error("ELF segment out of range")]
    SegmentOutOfRange { offset: u32, size: u32 },
    #[error("ELF segment has no load address")]
    NoLoadAddress,
}

impl ElfError {
    pub fn kind(&self) -> ElfErrorKind {
        match self {
            ElfError::Open { .. } | ElfError::Empty => ElfErrorKind::ReadFailed,
            _ => ElfErrorKind::Format,
        }
    }
}

// Field layout of Elf32_Ehdr
#[derive(Deserialize, Debug)]
struct RawHeader {
    ident: [u8; 16],
    e_type: u16,
    machine: u16,
    version: u32,
    entry: u32,
    phoff: u32,
    shoff: u32,
    flags: u32,
    _ehsize: u16,
    phentsize: u16,
    phnum: u16,
    _shentsize: u16,
    shnum: u16,
    _shstrndx: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElfHeader {
    pub machine: u16,
    pub entry: u32,
    pub phoff: u32,
    pub phentsize: u16,
    pub phnum: u16,
}

/// One Elf32_Phdr entry.
#[derive(Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgramHeader {
    pub p_type: u32,
    pub offset: u32,
    pub vaddr: u32,
    pub paddr: u32,
    pub filesz: u32,
    pub memsz: u32,
    pub flags: u32,
    pub align: u32,
}

impl ProgramHeader {
    pub fn is_load(&self) -> bool {
        self.p_type == PT_LOAD
    }

    /// Where the segment's bytes have to be placed. Linker scripts for the
    /// RP2040 put the flash image in the physical address and the runtime
    /// location in the virtual one, so the physical address wins when set.
    pub fn load_address(&self) -> u32 {
        if self.paddr != 0 {
            self.paddr
        } else {
            self.vaddr
        }
    }
}

#[derive(Debug)]
pub struct ElfFile {
    header: ElfHeader,
    segments: Vec<ProgramHeader>,
    data: Vec<u8>,
}

impl ElfFile {
    pub fn read(path: impl AsRef<Path>) -> Result<Self, ElfError> {
        let path = path.as_ref();
        let data = std::fs::read(path).map_err(|source| ElfError::Open {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_bytes(data)
    }

    pub fn from_bytes(data: Vec<u8>) -> Result<Self, ElfError> {
        if data.is_empty() {
            return Err(ElfError::Empty);
        }
        if data.len() < ELF_HEADER_SIZE {
            return Err(ElfError::HeaderTruncated);
        }

        let raw: RawHeader = bincode::deserialize(&data[..ELF_HEADER_SIZE])
            .map_err(|_| ElfError::HeaderTruncated)?;
        if raw.ident[..4] != ELF_MAGIC {
            return Err(ElfError::BadMagic);
        }
        if raw.ident[4] != ELF_CLASS_32 {
            return Err(ElfError::UnsupportedClass(raw.ident[4]));
        }
        if raw.ident[5] != ELF_DATA_LITTLE_ENDIAN {
            return Err(ElfError::UnsupportedEndian(raw.ident[5]));
        }
        if raw.machine != EM_ARM && raw.machine != EM_RISCV {
            log::warn!("unexpected ELF machine type {}", raw.machine);
        }
        log::debug!(
            "ELF type {} version {} flags {:#x} entry {:#x}, {} program headers at {:#x}, {} section headers at {:#x}",
            raw.e_type,
            raw.version,
            raw.flags,
            raw.entry,
            raw.phnum,
            raw.phoff,
            raw.shnum,
            raw.shoff
        );

        let header = ElfHeader {
            machine: raw.machine,
            entry: raw.entry,
            phoff: raw.phoff,
            phentsize: raw.phentsize,
            phnum: raw.phnum,
        };

        if (header.phoff as usize) < ELF_IDENT_SIZE || header.phentsize == 0 {
            return Err(ElfError::MissingProgramHeaders);
        }

        let table_size = header.phentsize as usize * header.phnum as usize;
        let table_end = (header.phoff as usize)
            .checked_add(table_size)
            .ok_or(ElfError::ProgramHeadersTruncated)?;
        if table_end > data.len() {
            return Err(ElfError::ProgramHeadersTruncated);
        }

        let mut segments = Vec::with_capacity(header.phnum as usize);
        for i in 0..header.phnum {
            let base = header.phoff as usize + header.phentsize as usize * i as usize;
            let entry = data
                .get(base..base + PROGRAM_HEADER_SIZE)
                .ok_or(ElfError::ProgramHeaderTruncated(i))?;
            let segment: ProgramHeader =
                bincode::deserialize(entry).map_err(|_| ElfError::ProgramHeaderTruncated(i))?;
            segments.push(segment);
        }

        Ok(ElfFile {
            header,
            segments,
            data,
        })
    }

    pub fn header(&self) -> &ElfHeader {
        &self.header
    }

    pub fn entry(&self) -> u32 {
        self.header.entry
    }

    pub fn segments(&self) -> &[ProgramHeader] {
        &self.segments
    }

    /// File-backed bytes of `segment`; the zero-filled tail up to `memsz` is
    /// not included.
    pub fn content(&self, segment: &ProgramHeader) -> Result<&[u8], ElfError> {
        if segment.filesz == 0 {
            return Ok(&[]);
        }
        let out_of_range = || ElfError::SegmentOutOfRange {
            offset: segment.offset,
            size: segment.filesz,
        };
        let start = segment.offset as usize;
        let end = start
            .checked_add(segment.filesz as usize)
            .ok_or_else(out_of_range)?;
        self.data.get(start..end).ok_or_else(out_of_range)
    }
}
