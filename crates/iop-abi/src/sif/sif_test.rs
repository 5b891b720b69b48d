// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Tests for SIF wire formats.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use super::*;

#[test]
fn header_packs_sizes_into_first_word() {
    let header = CmdHeader {
        packet_size: 0x38,
        data_size: 0x0012_3456,
        data_addr: Addr::new(0x1000),
        command: CMD_RPC_CALL,
        option: 7,
    };
    let mut buf = [0u8; 16];
    assert!(header.encode(&mut buf));
    assert_eq!(&buf[0..4], &[0x38, 0x56, 0x34, 0x12]);
    assert_eq!(CmdHeader::decode(&buf), Some(header));
}

#[test]
fn header_truncates_data_size_to_24_bits() {
    let header = CmdHeader {
        data_size: 0xFF00_0001,
        ..CmdHeader::new(1, 16)
    };
    let mut buf = [0u8; 16];
    assert!(header.encode(&mut buf));
    assert_eq!(CmdHeader::decode(&buf).unwrap().data_size, 1);
}

#[test]
fn header_rejects_short_buffers() {
    let mut buf = [0u8; 12];
    assert!(!CmdHeader::new(1, 16).encode(&mut buf));
    assert_eq!(CmdHeader::decode(&buf), None);
}

#[test]
fn system_command_index() {
    assert_eq!(system_index(CMD_CHANGE_SADDR), Some(0));
    assert_eq!(system_index(CMD_RPC_CALL), Some(10));
    assert_eq!(system_index(5), None);
}

#[test]
fn dma_attr_bits() {
    let attr = DmaAttr::INT_O | DmaAttr::ERT;
    assert!(attr.contains(DmaAttr::INT_O));
    assert!(!attr.contains(DmaAttr::INT_I));
    assert_eq!(attr.without(DmaAttr::ERT), DmaAttr::INT_O);
    assert_eq!(attr.bits(), 0x44);
}

#[test]
fn dma_status_abi_values() {
    assert_eq!(DmaStatus::Queued.as_abi(), 1);
    assert_eq!(DmaStatus::InFlight.as_abi(), 0);
    assert_eq!(DmaStatus::Done.as_abi(), -1);
    assert_eq!(DmaStatus::Unknown.as_abi(), -2);
}

#[test]
fn sif_reg_numbering() {
    assert_eq!(SifReg::from_u32(3), Some(SifReg::MainFlag));
    assert_eq!(SifReg::from_u32(0), None);
    assert_eq!(SifReg::SubFlag.index(), 3);
}
