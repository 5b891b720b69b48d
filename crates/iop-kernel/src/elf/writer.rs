// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Builder for relocatable IOP module images.
//!
//! Produces the exact layout [`super::IopElf`] accepts. Used by tests and by
//! `iop-boot` to synthesize images; real modules come from the IOP toolchain.

use std::string::String;
use std::vec::Vec;

use iop_abi::LibVersion;
use iop_abi::module::{EXPORT_MAGIC, IMPORT_MAGIC, TableHeader, stub_words};

use super::{EM_MIPS, ELF32_HEADER_SIZE, ELF32_PHDR_SIZE, ELF32_SHDR_SIZE, ET_IOPRELEXEC, PT_IOPMOD, PT_LOAD, SHT_REL};
use crate::reloc::Relocation;

/// Builder for one module image.
#[derive(Debug, Clone)]
pub struct IrxWriter {
    name: String,
    version: LibVersion,
    entry: u32,
    gp: u32,
    text: Vec<u8>,
    data: Vec<u8>,
    bss: u32,
    relocs: Vec<Relocation>,
}

impl IrxWriter {
    /// Starts an empty module.
    #[must_use]
    pub fn new(name: &str, version: LibVersion) -> Self {
        Self {
            name: String::from(name),
            version,
            entry: 0,
            gp: 0,
            text: Vec::new(),
            data: Vec::new(),
            bss: 0,
            relocs: Vec::new(),
        }
    }

    /// Current text size; the offset the next appended text lands at.
    #[must_use]
    pub fn text_len(&self) -> u32 {
        self.text.len() as u32
    }

    /// Appends words to the text section.
    #[must_use]
    pub fn text_words(mut self, words: &[u32]) -> Self {
        for word in words {
            self.text.extend_from_slice(&word.to_le_bytes());
        }
        self
    }

    /// Appends raw bytes to the text section, padded to a word.
    #[must_use]
    pub fn text_bytes(mut self, bytes: &[u8]) -> Self {
        self.text.extend_from_slice(bytes);
        while self.text.len() % 4 != 0 {
            self.text.push(0);
        }
        self
    }

    /// Sets the data section.
    #[must_use]
    pub fn data(mut self, bytes: &[u8]) -> Self {
        self.data = bytes.to_vec();
        self
    }

    /// Sets the bss size.
    #[must_use]
    pub const fn bss(mut self, size: u32) -> Self {
        self.bss = size;
        self
    }

    /// Sets the entry point offset.
    #[must_use]
    pub const fn entry(mut self, offset: u32) -> Self {
        self.entry = offset;
        self
    }

    /// Sets the gp value.
    #[must_use]
    pub const fn gp(mut self, gp: u32) -> Self {
        self.gp = gp;
        self
    }

    /// Adds a relocation.
    #[must_use]
    pub fn reloc(mut self, offset: u32, kind: u8) -> Self {
        self.relocs.push(Relocation::new(offset, kind));
        self
    }

    /// Serializes the image.
    #[must_use]
    pub fn build(&self) -> Vec<u8> {
        let phoff = ELF32_HEADER_SIZE;
        let iopmod_off = phoff + 2 * ELF32_PHDR_SIZE;
        let mut iopmod = Vec::new();
        for word in [
            u32::MAX,
            self.entry,
            self.gp,
            self.text.len() as u32,
            self.data.len() as u32,
            self.bss,
        ] {
            iopmod.extend_from_slice(&word.to_le_bytes());
        }
        iopmod.extend_from_slice(&self.version.as_raw().to_le_bytes());
        iopmod.extend_from_slice(self.name.as_bytes());
        iopmod.push(0);

        let seg_off = align16(iopmod_off + iopmod.len());
        let seg_len = self.text.len() + self.data.len();
        let rel_off = align16(seg_off + seg_len);
        let rel_len = self.relocs.len() * 8;
        let sh_off = align16(rel_off + rel_len);
        let shnum: u16 = if self.relocs.is_empty() { 0 } else { 2 };

        let mut out = std::vec![0u8; sh_off + usize::from(shnum) * ELF32_SHDR_SIZE];
        out[..4].copy_from_slice(&[0x7F, b'E', b'L', b'F']);
        out[4] = 1;
        out[5] = 1;
        out[6] = 1;
        put16(&mut out, 16, ET_IOPRELEXEC);
        put16(&mut out, 18, EM_MIPS);
        put32(&mut out, 20, 1);
        put32(&mut out, 24, self.entry);
        put32(&mut out, 28, phoff as u32);
        put32(&mut out, 32, if shnum == 0 { 0 } else { sh_off as u32 });
        put16(&mut out, 40, ELF32_HEADER_SIZE as u16);
        put16(&mut out, 42, ELF32_PHDR_SIZE as u16);
        put16(&mut out, 44, 2);
        put16(&mut out, 46, ELF32_SHDR_SIZE as u16);
        put16(&mut out, 48, shnum);

        // Program header 0: iopmod block.
        put32(&mut out, phoff, PT_IOPMOD);
        put32(&mut out, phoff + 4, iopmod_off as u32);
        put32(&mut out, phoff + 16, iopmod.len() as u32);
        put32(&mut out, phoff + 20, iopmod.len() as u32);
        out[iopmod_off..iopmod_off + iopmod.len()].copy_from_slice(&iopmod);

        // Program header 1: text + data, bss in memsz.
        let load = phoff + ELF32_PHDR_SIZE;
        put32(&mut out, load, PT_LOAD);
        put32(&mut out, load + 4, seg_off as u32);
        put32(&mut out, load + 16, seg_len as u32);
        put32(&mut out, load + 20, (seg_len as u32) + self.bss);
        put32(&mut out, load + 24, 7);
        put32(&mut out, load + 28, 16);
        out[seg_off..seg_off + self.text.len()].copy_from_slice(&self.text);
        out[seg_off + self.text.len()..seg_off + seg_len].copy_from_slice(&self.data);

        for (i, reloc) in self.relocs.iter().enumerate() {
            put32(&mut out, rel_off + i * 8, reloc.offset);
            put32(&mut out, rel_off + i * 8 + 4, u32::from(reloc.kind));
        }
        if shnum > 0 {
            // Section 0 stays null; section 1 is the relocation table.
            let sh = sh_off + ELF32_SHDR_SIZE;
            put32(&mut out, sh + 4, SHT_REL);
            put32(&mut out, sh + 16, rel_off as u32);
            put32(&mut out, sh + 20, rel_len as u32);
            put32(&mut out, sh + 36, 8);
        }
        out
    }
}

/// Encodes an export table with the given entry words (reserved slots
/// included), terminated by a zero word.
#[must_use]
pub fn export_table(name: &str, version: LibVersion, entries: &[u32]) -> Vec<u8> {
    let mut out = table_header(EXPORT_MAGIC, name, version);
    for entry in entries {
        out.extend_from_slice(&entry.to_le_bytes());
    }
    out.extend_from_slice(&0u32.to_le_bytes());
    out
}

/// Encodes an import table with one stub per ordinal, terminated by a pair
/// of zero words.
#[must_use]
pub fn import_table(name: &str, version: LibVersion, ordinals: &[u16]) -> Vec<u8> {
    let mut out = table_header(IMPORT_MAGIC, name, version);
    for &ordinal in ordinals {
        for word in stub_words(ordinal) {
            out.extend_from_slice(&word.to_le_bytes());
        }
    }
    out.extend_from_slice(&[0u8; 8]);
    out
}

fn table_header(magic: u32, name: &str, version: LibVersion) -> Vec<u8> {
    let mut out = std::vec![0u8; 20];
    let header = TableHeader {
        magic,
        version,
        flags: 0,
        name: iop_abi::LibName::new(name),
    };
    header.write(&mut out, 0);
    out
}

const fn align16(n: usize) -> usize {
    (n + 15) & !15
}

fn put16(buf: &mut [u8], at: usize, value: u16) {
    buf[at..at + 2].copy_from_slice(&value.to_le_bytes());
}

fn put32(buf: &mut [u8], at: usize, value: u32) {
    buf[at..at + 4].copy_from_slice(&value.to_le_bytes());
}
