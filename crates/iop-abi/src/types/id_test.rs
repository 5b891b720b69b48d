// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Tests for identifier types.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use super::id::{BurstId, ModuleId, PacketId, ThreadId};

#[test]
fn module_id_null() {
    assert!(ModuleId::NULL.is_null());
    assert!(!ModuleId::new(1).is_null());
    assert_eq!(ModuleId::default(), ModuleId::NULL);
}

#[test]
fn burst_id_rejects_zero() {
    assert!(BurstId::new(0).is_none());
    assert_eq!(BurstId::new(7).map(BurstId::as_u32), Some(7));
}

#[test]
fn burst_id_next_skips_zero() {
    let last = BurstId::new(u32::MAX).unwrap();
    assert_eq!(last.next(), BurstId::FIRST);
    assert_eq!(BurstId::FIRST.next().as_u32(), 2);
}

#[test]
fn packet_id_wraps_past_free() {
    assert!(PacketId::FREE.is_free());
    assert_eq!(PacketId::new(u32::MAX).next(), PacketId::new(1));
    assert!(!PacketId::FREE.next().is_free());
}

#[test]
fn thread_ids() {
    assert_eq!(ThreadId::BOOT.as_u32(), 1);
    assert_eq!(ThreadId::default(), ThreadId::NULL);
}

#[test]
fn display_formats() {
    assert_eq!(format!("{}", ModuleId::new(3)), "module:3");
    assert_eq!(format!("{}", BurstId::FIRST), "burst:1");
}
