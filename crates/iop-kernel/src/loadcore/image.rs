// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Image probing and table discovery.
//!
//! Both image formats are normalized into an [`ImageLayout`] whose offsets
//! are relative to the image start, so the load path does not care which
//! format it came from.

use alloc::vec::Vec;

use iop_abi::bytes::get_u32;
use iop_abi::module::{
    EXPORT_MAGIC, IMPORT_MAGIC, RESERVED_EXPORTS, STUB_JR_RA, STUB_SIZE, TABLE_HEADER_SIZE,
    TableHeader, stub_ordinal,
};
use iop_abi::{Addr, LibVersion};

use super::LoadError;
use super::linker::Stub;
use super::native::ExportTarget;
use crate::coff::{CoffError, CoffImage};
use crate::elf::{ElfError, IopElf};
use crate::reloc::Relocation;

/// Export tables longer than this are treated as corrupt.
const MAX_EXPORTS: usize = 1024;

/// Image file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    /// Relocatable ELF module.
    Elf,
    /// Fixed-address COFF executable.
    Coff,
}

/// Bytes to copy into the image.
#[derive(Debug, Clone, Copy)]
pub struct Segment<'a> {
    /// Offset from the image start.
    pub offset: u32,
    /// Contents.
    pub bytes: &'a [u8],
}

/// Format-independent description of a module image.
#[derive(Debug, Clone)]
pub struct ImageLayout<'a> {
    /// Source format.
    pub format: ImageFormat,
    /// Module name recorded in the image (empty if none).
    pub name: &'a str,
    /// Module version recorded in the image.
    pub version: LibVersion,
    /// Whether the image may be placed anywhere.
    pub relocatable: bool,
    /// Address the image was linked at.
    pub link_addr: u32,
    /// Entry point offset.
    pub entry: u32,
    /// gp offset.
    pub gp: u32,
    /// Text size.
    pub text_size: u32,
    /// Data size.
    pub data_size: u32,
    /// Bss size.
    pub bss_size: u32,
    /// Bytes of memory the image occupies.
    pub mem_size: u32,
    /// Contents to copy.
    pub segments: Vec<Segment<'a>>,
    /// Relocations to apply after copying.
    pub relocs: Vec<Relocation>,
}

impl<'a> ImageLayout<'a> {
    /// Probes the format and parses the headers.
    pub fn parse(bytes: &'a [u8]) -> Result<Self, LoadError> {
        if IopElf::probe(bytes) {
            Self::from_elf(bytes)
        } else if CoffImage::probe(bytes) {
            Self::from_coff(bytes)
        } else {
            Err(LoadError::UnknownFormat)
        }
    }

    fn from_elf(bytes: &'a [u8]) -> Result<Self, LoadError> {
        let elf = IopElf::parse(bytes)?;
        let info = *elf.iopmod();
        let data = elf.segment_data();
        let declared = info
            .text_size
            .checked_add(info.data_size)
            .and_then(|n| n.checked_add(info.bss_size))
            .ok_or(ElfError::InvalidSegment)?;
        let mem_size = declared.max(elf.segment_mem_size());
        if data.len() as u64 > u64::from(mem_size) {
            return Err(ElfError::InvalidSegment.into());
        }
        Ok(Self {
            format: ImageFormat::Elf,
            name: info.name,
            version: LibVersion::from_raw(info.version),
            relocatable: true,
            link_addr: elf.segment_vaddr(),
            entry: info.entry,
            gp: info.gp,
            text_size: info.text_size,
            data_size: info.data_size,
            bss_size: info.bss_size,
            mem_size,
            segments: alloc::vec![Segment {
                offset: 0,
                bytes: data
            }],
            relocs: elf.relocations()?,
        })
    }

    fn from_coff(bytes: &'a [u8]) -> Result<Self, LoadError> {
        let coff = CoffImage::parse(bytes)?;
        let aout = *coff.aout();
        let base = aout.text_start;
        let mem_size = coff.mem_end().wrapping_sub(base);
        let mut segments = Vec::with_capacity(coff.sections().len());
        for section in coff.sections() {
            let offset = section
                .vaddr
                .checked_sub(base)
                .ok_or(CoffError::Truncated)?;
            let end = offset
                .checked_add(section.data.len() as u32)
                .ok_or(CoffError::Truncated)?;
            if end > mem_size {
                return Err(CoffError::Truncated.into());
            }
            segments.push(Segment {
                offset,
                bytes: section.data,
            });
        }
        Ok(Self {
            format: ImageFormat::Coff,
            name: "",
            version: LibVersion::new(1, 1),
            relocatable: false,
            link_addr: base,
            entry: aout.entry.wrapping_sub(base),
            gp: aout.gp.wrapping_sub(base),
            text_size: aout.tsize,
            data_size: aout.dsize,
            bss_size: aout.bsize,
            mem_size,
            segments,
            relocs: Vec::new(),
        })
    }
}

/// Word-aligned offsets in `region` where `magic` is followed by a zero
/// `next` word.
pub(crate) fn find_tables(region: &[u8], magic: u32) -> Vec<usize> {
    (0..region.len().saturating_sub(7))
        .step_by(4)
        .filter(|&off| get_u32(region, off) == Some(magic) && get_u32(region, off + 4) == Some(0))
        .collect()
}

/// Parsed import table.
pub(crate) struct ImportTable {
    pub(crate) header: TableHeader,
    pub(crate) stubs: Vec<Stub>,
}

/// Decodes the import table at `offset` of `region`, which starts at `base`.
pub(crate) fn read_import_table(
    region: &[u8],
    base: Addr,
    offset: usize,
) -> Result<ImportTable, LoadError> {
    let table = base + offset as u32;
    let header = TableHeader::read(region, offset).ok_or(LoadError::BadTable(table))?;
    if header.magic != IMPORT_MAGIC {
        return Err(LoadError::BadTable(table));
    }
    let mut stubs = Vec::new();
    let mut at = offset + TABLE_HEADER_SIZE as usize;
    loop {
        let first = get_u32(region, at).ok_or(LoadError::BadTable(table))?;
        let second = get_u32(region, at + 4).ok_or(LoadError::BadTable(table))?;
        if first == 0 && second == 0 {
            break;
        }
        let ordinal = stub_ordinal(second)
            .filter(|_| first == STUB_JR_RA)
            .ok_or(LoadError::BadTable(table))?;
        stubs.push(Stub::new(Some(base + at as u32), ordinal));
        at += STUB_SIZE as usize;
    }
    Ok(ImportTable { header, stubs })
}

/// Parsed export table.
pub(crate) struct ExportTable {
    pub(crate) header: TableHeader,
    pub(crate) entries: Vec<ExportTarget>,
}

/// Decodes the export table at `addr` in `memory`.
///
/// The reserved slots are read unconditionally; after them the table ends at
/// the first zero word.
pub(crate) fn read_export_table(memory: &[u8], addr: Addr) -> Result<ExportTable, LoadError> {
    let offset = addr.as_usize();
    let header = TableHeader::read(memory, offset).ok_or(LoadError::BadTable(addr))?;
    if header.magic != EXPORT_MAGIC {
        return Err(LoadError::BadTable(addr));
    }
    let mut entries = Vec::new();
    let mut at = offset + TABLE_HEADER_SIZE as usize;
    loop {
        let word = get_u32(memory, at).ok_or(LoadError::BadTable(addr))?;
        if word == 0 && entries.len() >= usize::from(RESERVED_EXPORTS) {
            break;
        }
        if entries.len() >= MAX_EXPORTS {
            return Err(LoadError::BadTable(addr));
        }
        entries.push(if word == 0 {
            ExportTarget::Unused
        } else {
            ExportTarget::Image(Addr::new(word))
        });
        at += 4;
    }
    Ok(ExportTable { header, entries })
}
