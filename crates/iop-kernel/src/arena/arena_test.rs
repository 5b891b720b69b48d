// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Tests for the generational arena.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use super::*;

#[test]
fn insert_and_get() {
    let mut arena = Arena::with_capacity(4);
    let a = arena.insert("a").unwrap();
    let b = arena.insert("b").unwrap();
    assert_eq!(arena.get(a), Some(&"a"));
    assert_eq!(arena.get(b), Some(&"b"));
    assert_eq!(arena.len(), 2);
}

#[test]
fn full_arena_hands_value_back() {
    let mut arena = Arena::with_capacity(1);
    arena.insert(1).unwrap();
    assert_eq!(arena.insert(2), Err(2));
}

#[test]
fn stale_key_does_not_resolve_after_reuse() {
    let mut arena = Arena::with_capacity(2);
    let old = arena.insert(10).unwrap();
    assert_eq!(arena.remove(old), Some(10));
    let new = arena.insert(20).unwrap();

    assert_eq!(old.index(), new.index());
    assert_ne!(old, new);
    assert_eq!(arena.get(old), None);
    assert_eq!(arena.get(new), Some(&20));
    assert_eq!(arena.remove(old), None);
}

#[test]
fn keys_pack_to_nonzero_u32() {
    let mut arena = Arena::with_capacity(2);
    let key = arena.insert(()).unwrap();
    let raw = key.to_u32();
    assert_ne!(raw, 0);
    assert_eq!(Key::from_u32(raw), Some(key));
    assert_eq!(Key::from_u32(0), None);
}

#[test]
fn iter_skips_vacant_slots() {
    let mut arena = Arena::with_capacity(3);
    let a = arena.insert('a').unwrap();
    arena.insert('b').unwrap();
    arena.insert('c').unwrap();
    arena.remove(a);
    let values: Vec<char> = arena.iter().map(|(_, v)| *v).collect();
    assert_eq!(values, vec!['b', 'c']);
}
