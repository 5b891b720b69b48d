// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Tests for the ELF parser.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use iop_abi::LibVersion;

use super::writer::IrxWriter;
use super::*;
use crate::reloc::{R_MIPS_32, R_MIPS_HI16, R_MIPS_LO16};

fn sample() -> Vec<u8> {
    IrxWriter::new("cdvdman", LibVersion::new(1, 3))
        .text_words(&[0x2402_0000, 0x03E0_0008, 0x0000_0000, 0x0000_0010])
        .data(&[1, 2, 3, 4, 5, 6, 7, 8])
        .bss(0x40)
        .entry(4)
        .gp(0x8000)
        .reloc(12, R_MIPS_32)
        .build()
}

fn put_u16(data: &mut [u8], at: usize, value: u16) {
    data[at..at + 2].copy_from_slice(&value.to_le_bytes());
}

#[test]
fn parse_iopmod_block() {
    let data = sample();
    let elf = IopElf::parse(&data).unwrap();
    let info = elf.iopmod();
    assert_eq!(info.name, "cdvdman");
    assert_eq!(info.version, LibVersion::new(1, 3).as_raw());
    assert_eq!(info.entry, 4);
    assert_eq!(info.gp, 0x8000);
    assert_eq!(info.text_size, 16);
    assert_eq!(info.data_size, 8);
    assert_eq!(info.bss_size, 0x40);
}

#[test]
fn segment_holds_text_then_data() {
    let data = sample();
    let elf = IopElf::parse(&data).unwrap();
    let segment = elf.segment_data();
    assert_eq!(segment.len(), 24);
    assert_eq!(&segment[16..], &[1, 2, 3, 4, 5, 6, 7, 8]);
    assert_eq!(elf.segment_mem_size(), 24 + 0x40);
    assert_eq!(elf.segment_vaddr(), 0);
}

#[test]
fn relocations_from_rel_sections() {
    let data = IrxWriter::new("m", LibVersion::new(1, 1))
        .text_words(&[0x3C04_0000, 0x2484_0010])
        .reloc(0, R_MIPS_HI16)
        .reloc(4, R_MIPS_LO16)
        .build();
    let relocs = IopElf::parse(&data).unwrap().relocations().unwrap();
    assert_eq!(
        relocs,
        vec![Relocation::new(0, R_MIPS_HI16), Relocation::new(4, R_MIPS_LO16)]
    );
}

#[test]
fn no_sections_means_no_relocations() {
    let data = IrxWriter::new("m", LibVersion::new(1, 1))
        .text_words(&[0])
        .build();
    assert!(IopElf::parse(&data).unwrap().relocations().unwrap().is_empty());
}

#[test]
fn probe_checks_magic_only() {
    assert!(IopElf::probe(&sample()));
    assert!(!IopElf::probe(&[0x62, 0x01, 0, 0]));
    assert!(!IopElf::probe(&[]));
}

#[test]
fn parse_too_small() {
    assert_eq!(IopElf::parse(&[0u8; 20]).unwrap_err(), ElfError::TooSmall);
}

#[test]
fn parse_invalid_magic() {
    let mut data = sample();
    data[0] = 0;
    assert_eq!(IopElf::parse(&data).unwrap_err(), ElfError::InvalidMagic);
}

#[test]
fn parse_wrong_class_and_endianness() {
    let mut data = sample();
    data[4] = 2;
    assert_eq!(IopElf::parse(&data).unwrap_err(), ElfError::Not32Bit);
    let mut data = sample();
    data[5] = 2;
    assert_eq!(IopElf::parse(&data).unwrap_err(), ElfError::NotLittleEndian);
}

#[test]
fn parse_rejects_other_types_and_machines() {
    let mut data = sample();
    put_u16(&mut data, 16, 2);
    assert_eq!(IopElf::parse(&data).unwrap_err(), ElfError::NotIopModule(2));
    let mut data = sample();
    put_u16(&mut data, 18, 0x3E);
    assert_eq!(IopElf::parse(&data).unwrap_err(), ElfError::WrongMachine(0x3E));
}

#[test]
fn parse_requires_two_program_headers() {
    let mut data = sample();
    put_u16(&mut data, 44, 3);
    assert_eq!(IopElf::parse(&data).unwrap_err(), ElfError::SegmentCount(3));
}

#[test]
fn parse_requires_iopmod_first() {
    let mut data = sample();
    // Swap the types of the two program headers.
    data[52..56].copy_from_slice(&PT_LOAD.to_le_bytes());
    assert_eq!(IopElf::parse(&data).unwrap_err(), ElfError::MissingIopMod);
}

#[test]
fn parse_truncated_segment() {
    let data = sample();
    // Headers end at 150, the segment spans 160..184.
    let short = &data[..170];
    assert_eq!(IopElf::parse(short).unwrap_err(), ElfError::InvalidSegment);
}
