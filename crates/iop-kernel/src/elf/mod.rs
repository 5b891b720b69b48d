// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Minimal ELF32 parser for relocatable IOP modules.
//!
//! An IOP module is a little-endian MIPS ELF of type `0xFF80` with exactly
//! two program headers:
//! - header 0: the vendor `iopmod` block carrying entry point, gp value,
//!   text/data/bss sizes and the module name and version,
//! - header 1: the single `PT_LOAD` segment holding text and data, linked at
//!   address zero.
//!
//! `SHT_REL` sections, when present, list the words to relocate. Symbols,
//! `SHT_RELA` and dynamic sections are not supported.

#[cfg(test)]
mod elf_test;

#[cfg(any(test, feature = "std"))]
pub mod writer;

use alloc::vec::Vec;
use core::fmt;

use iop_abi::bytes::{get_u16, get_u32};

use crate::reloc::Relocation;

// =============================================================================
// Constants
// =============================================================================

/// ELF magic bytes.
const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];

/// ELF class: 32-bit.
const ELFCLASS32: u8 = 1;

/// ELF data encoding: little-endian.
const ELFDATA2LSB: u8 = 1;

/// ELF type: relocatable IOP executable.
pub const ET_IOPRELEXEC: u16 = 0xFF80;

/// Machine: MIPS.
pub const EM_MIPS: u16 = 8;

/// Program header type: loadable segment.
pub const PT_LOAD: u32 = 1;

/// Program header type: `iopmod` block.
pub const PT_IOPMOD: u32 = 0x7000_0080;

/// Section type: relocations without addend.
pub const SHT_REL: u32 = 9;

/// ELF header size for 32-bit.
pub const ELF32_HEADER_SIZE: usize = 52;

/// Program header size for 32-bit.
pub const ELF32_PHDR_SIZE: usize = 32;

/// Section header size for 32-bit.
pub const ELF32_SHDR_SIZE: usize = 40;

/// Size of one `SHT_REL` entry.
const REL_ENTRY_SIZE: usize = 8;

/// Fixed part of the `iopmod` block, before the module name.
const IOPMOD_FIXED_SIZE: usize = 26;

// =============================================================================
// ELF Structures
// =============================================================================

/// ELF32 file header (the fields this loader reads).
#[derive(Clone, Copy, Debug)]
struct Elf32Header {
    /// Magic number and identification bytes.
    ident: [u8; 16],
    /// Object file type (`ET_IOPRELEXEC`).
    file_type: u16,
    /// Target architecture.
    machine: u16,
    /// Program header table offset.
    phoff: u32,
    /// Section header table offset (zero if absent).
    shoff: u32,
    /// Program header entry size.
    phentsize: u16,
    /// Number of program headers.
    phnum: u16,
    /// Section header entry size.
    shentsize: u16,
    /// Number of section headers.
    shnum: u16,
}

impl Elf32Header {
    fn decode(data: &[u8]) -> Option<Self> {
        let mut ident = [0u8; 16];
        ident.copy_from_slice(data.get(..16)?);
        Some(Self {
            ident,
            file_type: get_u16(data, 16)?,
            machine: get_u16(data, 18)?,
            phoff: get_u32(data, 28)?,
            shoff: get_u32(data, 32)?,
            phentsize: get_u16(data, 42)?,
            phnum: get_u16(data, 44)?,
            shentsize: get_u16(data, 46)?,
            shnum: get_u16(data, 48)?,
        })
    }
}

/// ELF32 program header.
#[derive(Clone, Copy, Debug)]
struct Elf32Phdr {
    /// Segment type.
    seg_type: u32,
    /// Offset in file.
    offset: u32,
    /// Virtual address (zero for relocatable modules).
    vaddr: u32,
    /// Size in file.
    filesz: u32,
    /// Size in memory (>= `filesz`).
    memsz: u32,
}

impl Elf32Phdr {
    fn decode(data: &[u8], at: usize) -> Option<Self> {
        Some(Self {
            seg_type: get_u32(data, at)?,
            offset: get_u32(data, at + 4)?,
            vaddr: get_u32(data, at + 8)?,
            filesz: get_u32(data, at + 16)?,
            memsz: get_u32(data, at + 20)?,
        })
    }
}

// =============================================================================
// Public Types
// =============================================================================

/// Error during ELF parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfError {
    /// File too small for ELF header.
    TooSmall,
    /// Invalid ELF magic bytes.
    InvalidMagic,
    /// Not a 32-bit ELF.
    Not32Bit,
    /// Not little-endian.
    NotLittleEndian,
    /// Not a relocatable IOP module.
    NotIopModule(u16),
    /// Not a MIPS binary.
    WrongMachine(u16),
    /// Program header count other than two.
    SegmentCount(u16),
    /// First program header is not the `iopmod` block.
    MissingIopMod,
    /// Second program header is not loadable.
    MissingLoad,
    /// Program header table extends beyond file.
    InvalidPhdrOffset,
    /// Segment data extends beyond file.
    InvalidSegment,
    /// Section header table or a relocation section extends beyond file.
    InvalidSection,
}

impl fmt::Display for ElfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooSmall => write!(f, "file too small"),
            Self::InvalidMagic => write!(f, "bad magic"),
            Self::Not32Bit => write!(f, "not a 32-bit ELF"),
            Self::NotLittleEndian => write!(f, "not little-endian"),
            Self::NotIopModule(t) => write!(f, "type {t:#06x} is not an IOP module"),
            Self::WrongMachine(m) => write!(f, "machine {m} is not MIPS"),
            Self::SegmentCount(n) => write!(f, "{n} program headers, expected 2"),
            Self::MissingIopMod => write!(f, "missing iopmod header"),
            Self::MissingLoad => write!(f, "missing loadable segment"),
            Self::InvalidPhdrOffset => write!(f, "program headers out of bounds"),
            Self::InvalidSegment => write!(f, "segment out of bounds"),
            Self::InvalidSection => write!(f, "section out of bounds"),
        }
    }
}

/// Contents of the `iopmod` block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IopModInfo<'a> {
    /// Offset of the module info structure, `0xFFFF_FFFF` if absent.
    pub module_info: u32,
    /// Entry point offset.
    pub entry: u32,
    /// gp value relative to the image start.
    pub gp: u32,
    /// Text size in bytes.
    pub text_size: u32,
    /// Data size in bytes.
    pub data_size: u32,
    /// Zero-filled bss size in bytes.
    pub bss_size: u32,
    /// Packed module version.
    pub version: u16,
    /// Module name (may be empty).
    pub name: &'a str,
}

/// Parsed IOP module.
#[derive(Debug)]
pub struct IopElf<'a> {
    data: &'a [u8],
    header: Elf32Header,
    iopmod: IopModInfo<'a>,
    load: Elf32Phdr,
}

impl<'a> IopElf<'a> {
    /// Checks if `data` starts with the ELF magic.
    #[must_use]
    pub fn probe(data: &[u8]) -> bool {
        data.get(..4) == Some(&ELF_MAGIC[..])
    }

    /// Parse an IOP module from raw bytes.
    pub fn parse(data: &'a [u8]) -> Result<Self, ElfError> {
        if data.len() < ELF32_HEADER_SIZE {
            return Err(ElfError::TooSmall);
        }
        let header = Elf32Header::decode(data).ok_or(ElfError::TooSmall)?;

        if header.ident[0..4] != ELF_MAGIC {
            return Err(ElfError::InvalidMagic);
        }
        if header.ident[4] != ELFCLASS32 {
            return Err(ElfError::Not32Bit);
        }
        if header.ident[5] != ELFDATA2LSB {
            return Err(ElfError::NotLittleEndian);
        }
        if header.file_type != ET_IOPRELEXEC {
            return Err(ElfError::NotIopModule(header.file_type));
        }
        if header.machine != EM_MIPS {
            return Err(ElfError::WrongMachine(header.machine));
        }
        if header.phnum != 2 {
            return Err(ElfError::SegmentCount(header.phnum));
        }

        // Validate program header table
        let phentsize = usize::from(header.phentsize).max(ELF32_PHDR_SIZE);
        let phdr_end = (header.phoff as usize)
            .checked_add(2 * phentsize)
            .ok_or(ElfError::InvalidPhdrOffset)?;
        if phdr_end > data.len() {
            return Err(ElfError::InvalidPhdrOffset);
        }
        let phoff = header.phoff as usize;
        let iopmod_phdr =
            Elf32Phdr::decode(data, phoff).ok_or(ElfError::InvalidPhdrOffset)?;
        let load = Elf32Phdr::decode(data, phoff + phentsize).ok_or(ElfError::InvalidPhdrOffset)?;

        if iopmod_phdr.seg_type != PT_IOPMOD {
            return Err(ElfError::MissingIopMod);
        }
        if load.seg_type != PT_LOAD {
            return Err(ElfError::MissingLoad);
        }
        if (load.offset as usize).saturating_add(load.filesz as usize) > data.len()
            || load.memsz < load.filesz
        {
            return Err(ElfError::InvalidSegment);
        }

        let iopmod = Self::parse_iopmod(data, &iopmod_phdr)?;
        Ok(Self {
            data,
            header,
            iopmod,
            load,
        })
    }

    fn parse_iopmod(data: &'a [u8], phdr: &Elf32Phdr) -> Result<IopModInfo<'a>, ElfError> {
        let start = phdr.offset as usize;
        let end = start.saturating_add(phdr.filesz as usize);
        let block = data.get(start..end).ok_or(ElfError::InvalidSegment)?;
        if block.len() < IOPMOD_FIXED_SIZE {
            return Err(ElfError::InvalidSegment);
        }
        let word = |at| get_u32(block, at).ok_or(ElfError::InvalidSegment);

        let raw_name = &block[IOPMOD_FIXED_SIZE..];
        let len = raw_name.iter().position(|&b| b == 0).unwrap_or(raw_name.len());
        let name = core::str::from_utf8(&raw_name[..len]).unwrap_or("");

        Ok(IopModInfo {
            module_info: word(0)?,
            entry: word(4)?,
            gp: word(8)?,
            text_size: word(12)?,
            data_size: word(16)?,
            bss_size: word(20)?,
            version: get_u16(block, 24).ok_or(ElfError::InvalidSegment)?,
            name,
        })
    }

    /// Returns the `iopmod` block.
    #[must_use]
    pub const fn iopmod(&self) -> &IopModInfo<'a> {
        &self.iopmod
    }

    /// File bytes of the loadable segment (text followed by data).
    #[must_use]
    pub fn segment_data(&self) -> &'a [u8] {
        let start = self.load.offset as usize;
        &self.data[start..start + self.load.filesz as usize]
    }

    /// Address the segment was linked at.
    #[must_use]
    pub const fn segment_vaddr(&self) -> u32 {
        self.load.vaddr
    }

    /// Size of the segment in memory, bss included.
    #[must_use]
    pub const fn segment_mem_size(&self) -> u32 {
        self.load.memsz
    }

    /// Collects the entries of all `SHT_REL` sections in table order.
    pub fn relocations(&self) -> Result<Vec<Relocation>, ElfError> {
        let mut relocs = Vec::new();
        if self.header.shoff == 0 || self.header.shnum == 0 {
            return Ok(relocs);
        }
        let shentsize = usize::from(self.header.shentsize).max(ELF32_SHDR_SIZE);
        let shoff = self.header.shoff as usize;
        for index in 0..usize::from(self.header.shnum) {
            let at = shoff + index * shentsize;
            let sh_type = get_u32(self.data, at + 4).ok_or(ElfError::InvalidSection)?;
            if sh_type != SHT_REL {
                continue;
            }
            let offset = get_u32(self.data, at + 16).ok_or(ElfError::InvalidSection)? as usize;
            let size = get_u32(self.data, at + 20).ok_or(ElfError::InvalidSection)? as usize;
            let table = offset
                .checked_add(size)
                .and_then(|end| self.data.get(offset..end))
                .ok_or(ElfError::InvalidSection)?;
            relocs.extend(table.chunks_exact(REL_ENTRY_SIZE).filter_map(|entry| {
                let r_offset = get_u32(entry, 0)?;
                let r_info = get_u32(entry, 4)?;
                Some(Relocation::new(r_offset, (r_info & 0xFF) as u8))
            }));
        }
        Ok(relocs)
    }
}
