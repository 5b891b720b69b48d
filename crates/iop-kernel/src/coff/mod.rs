// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Legacy COFF module images.
//!
//! Older IOP modules are MIPS little-endian COFF executables linked at a
//! fixed address. Only the file header, the a.out optional header and the
//! section table are read; symbols and line numbers are ignored.
//!
//! ```text
//! +0    file header      20 bytes, magic 0x0162
//! +20   optional header  56 bytes, magic 0x0107
//! +76   section headers  40 bytes each
//! ```


use alloc::vec::Vec;
use core::fmt;

use iop_abi::bytes::{get_u16, get_u32};

/// File header magic: MIPS little-endian.
pub const COFF_MAGIC: u16 = 0x0162;

/// Optional header magic.
pub const AOUT_MAGIC: u16 = 0x0107;

/// File header size.
pub const FILE_HEADER_SIZE: usize = 20;

/// Optional header size.
pub const AOUT_HEADER_SIZE: usize = 56;

/// Section header size.
pub const SECTION_HEADER_SIZE: usize = 40;

/// Section flag: uninitialized data.
const STYP_BSS: u32 = 0x80;

/// COFF parse failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoffError {
    /// File too small for the headers.
    TooSmall,
    /// Wrong file header magic.
    InvalidMagic(u16),
    /// Optional header missing, short or with the wrong magic.
    OptionalHeader,
    /// Section table or section data extends beyond the file.
    Truncated,
}

impl fmt::Display for CoffError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooSmall => write!(f, "file too small"),
            Self::InvalidMagic(m) => write!(f, "bad magic {m:#06x}"),
            Self::OptionalHeader => write!(f, "bad optional header"),
            Self::Truncated => write!(f, "section data out of bounds"),
        }
    }
}

/// Contents of the a.out optional header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AoutHeader {
    /// Text size.
    pub tsize: u32,
    /// Initialized data size.
    pub dsize: u32,
    /// Bss size.
    pub bsize: u32,
    /// Entry point address.
    pub entry: u32,
    /// Load address of text.
    pub text_start: u32,
    /// Load address of data.
    pub data_start: u32,
    /// Load address of bss.
    pub bss_start: u32,
    /// gp register value.
    pub gp: u32,
}

/// A section with file contents.
#[derive(Debug, Clone, Copy)]
pub struct CoffSection<'a> {
    /// Section name.
    pub name: [u8; 8],
    /// Load address.
    pub vaddr: u32,
    /// File contents.
    pub data: &'a [u8],
}

/// Parsed COFF image.
#[derive(Debug)]
pub struct CoffImage<'a> {
    aout: AoutHeader,
    sections: Vec<CoffSection<'a>>,
}

impl<'a> CoffImage<'a> {
    /// Checks if `data` starts with the COFF magic.
    #[must_use]
    pub fn probe(data: &[u8]) -> bool {
        get_u16(data, 0) == Some(COFF_MAGIC)
    }

    /// Parses the headers and section table.
    pub fn parse(data: &'a [u8]) -> Result<Self, CoffError> {
        if data.len() < FILE_HEADER_SIZE {
            return Err(CoffError::TooSmall);
        }
        let magic = get_u16(data, 0).ok_or(CoffError::TooSmall)?;
        if magic != COFF_MAGIC {
            return Err(CoffError::InvalidMagic(magic));
        }
        let nscns = usize::from(get_u16(data, 2).ok_or(CoffError::TooSmall)?);
        let opthdr = usize::from(get_u16(data, 16).ok_or(CoffError::TooSmall)?);
        if opthdr < AOUT_HEADER_SIZE {
            return Err(CoffError::OptionalHeader);
        }

        let o = FILE_HEADER_SIZE;
        let word = |at: usize| get_u32(data, o + at).ok_or(CoffError::OptionalHeader);
        if get_u16(data, o) != Some(AOUT_MAGIC) {
            return Err(CoffError::OptionalHeader);
        }
        let aout = AoutHeader {
            tsize: word(4)?,
            dsize: word(8)?,
            bsize: word(12)?,
            entry: word(16)?,
            text_start: word(20)?,
            data_start: word(24)?,
            bss_start: word(28)?,
            gp: word(52)?,
        };

        let table = FILE_HEADER_SIZE + opthdr;
        let mut sections = Vec::with_capacity(nscns);
        for index in 0..nscns {
            let at = table + index * SECTION_HEADER_SIZE;
            let header = data
                .get(at..at + SECTION_HEADER_SIZE)
                .ok_or(CoffError::Truncated)?;
            let field = |off: usize| get_u32(header, off).ok_or(CoffError::Truncated);
            let flags = field(36)?;
            let scnptr = field(20)? as usize;
            if flags & STYP_BSS != 0 || scnptr == 0 {
                continue;
            }
            let size = field(16)? as usize;
            let contents = scnptr
                .checked_add(size)
                .and_then(|end| data.get(scnptr..end))
                .ok_or(CoffError::Truncated)?;
            let mut name = [0u8; 8];
            name.copy_from_slice(&header[..8]);
            sections.push(CoffSection {
                name,
                vaddr: field(12)?,
                data: contents,
            });
        }
        Ok(Self { aout, sections })
    }

    /// The optional header.
    #[must_use]
    pub const fn aout(&self) -> &AoutHeader {
        &self.aout
    }

    /// Sections that carry file contents, in table order.
    #[must_use]
    pub fn sections(&self) -> &[CoffSection<'a>] {
        &self.sections
    }

    /// End of the image in memory (end of bss, or of data if larger).
    #[must_use]
    pub fn mem_end(&self) -> u32 {
        let a = &self.aout;
        let bss_end = a.bss_start.saturating_add(a.bsize);
        let data_end = a.data_start.saturating_add(a.dsize);
        let text_end = a.text_start.saturating_add(a.tsize);
        bss_end.max(data_end).max(text_end)
    }
}
