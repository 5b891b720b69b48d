// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Tests for the module table ABI.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use crate::module::*;

#[test]
fn lib_name_is_nul_padded() {
    let name = LibName::new("sifcmd");
    assert_eq!(name.as_raw(), b"sifcmd\0\0");
    assert_eq!(name.as_str(), "sifcmd");
}

#[test]
fn lib_name_truncates_long_names() {
    assert_eq!(LibName::new("loadcore_extra").as_str(), "loadcore");
}

#[test]
fn version_parts() {
    let v = LibVersion::new(1, 3);
    assert_eq!(v.as_raw(), 0x0103);
    assert_eq!((v.major(), v.minor()), (1, 3));
    assert!(v.is_compatible(LibVersion::new(1, 9)));
    assert!(!v.is_compatible(LibVersion::new(2, 3)));
    assert_eq!(format!("{v}"), "1.3");
}

#[test]
fn start_code_uses_low_bits() {
    assert_eq!(StartCode::from_raw(0), Some(StartCode::ResidentEnd));
    assert_eq!(StartCode::from_raw(0x10 | 2), Some(StartCode::RemovableEnd));
    assert_eq!(StartCode::from_raw(3), None);
    assert_eq!(StartCode::NoResidentEnd.as_raw(), 1);
}

#[test]
fn table_header_layout() {
    let header = TableHeader {
        magic: IMPORT_MAGIC,
        version: LibVersion::new(1, 1),
        flags: NO_AUTO_LINK,
        name: LibName::new("sysmem"),
    };
    let mut buf = [0xAAu8; 24];
    assert!(header.write(&mut buf, 4));
    assert_eq!(&buf[4..8], &IMPORT_MAGIC.to_le_bytes());
    assert_eq!(&buf[8..12], &[0, 0, 0, 0]);
    assert_eq!(&buf[12..14], &[0x01, 0x01]);
    assert_eq!(&buf[14..16], &[0x01, 0x00]);
    assert_eq!(TableHeader::read(&buf, 4), Some(header));
}

#[test]
fn table_header_rejects_short_buffer() {
    let header = TableHeader {
        magic: EXPORT_MAGIC,
        version: LibVersion::default(),
        flags: 0,
        name: LibName::new("x"),
    };
    let mut buf = [0u8; 19];
    assert!(!header.write(&mut buf, 0));
    assert_eq!(TableHeader::read(&buf, 0), None);
}

#[test]
fn stub_encoding() {
    let [jr, op] = stub_words(7);
    assert_eq!(jr, STUB_JR_RA);
    assert_eq!(op, 0x2400_0007);
    assert_eq!(stub_ordinal(op), Some(7));
    assert_eq!(stub_ordinal(0x0C00_0000), None);
}
