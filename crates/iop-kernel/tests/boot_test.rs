// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Boot of a linked IOP: kernel bring-up, handshake and boot modules.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::Link;
use iop_abi::LibVersion;
use iop_abi::sif::{SIF_STAT_CMDINIT, SIF_STAT_SIFINIT};
use iop_kernel::elf::writer::{IrxWriter, export_table, import_table};
use iop_kernel::loadcore::ExportScanRunner;
use iop_kernel::sysmem::AllocStrategy;
use iop_kernel::{BootModule, KernelConfig, Side};

const V11: LibVersion = LibVersion::new(1, 1);

fn image(name: &str, text: &[u8]) -> BootModule {
    BootModule::Image {
        name: format!("{name}.irx"),
        bytes: IrxWriter::new(name, V11).text_bytes(text).build(),
    }
}

#[test]
fn both_sides_announce_transport_and_commands() {
    let l = Link::start().unwrap();
    for k in [&l.iop, &l.ee] {
        let side = k.config().side;
        let flags = k.sif_get_reg(side.flag_reg());
        assert_ne!(flags & SIF_STAT_SIFINIT, 0, "{side:?}");
        assert_ne!(flags & SIF_STAT_CMDINIT, 0, "{side:?}");
        assert!(k.sif_peer_alive());
    }
}

#[test]
fn kernel_libraries_are_published_on_both_sides() {
    let l = Link::start().unwrap();
    for name in ["sysmem", "loadcore", "excepman", "intrman", "sifman", "sifcmd", "sifrpc"] {
        assert!(l.iop.find_library(name, V11).is_some(), "iop {name}");
        assert!(l.ee.find_library(name, V11).is_some(), "ee {name}");
    }
}

#[test]
fn boot_images_on_a_linked_iop() {
    let mut l = Link::start().unwrap();
    let modules = vec![
        image("driver", &export_table("driver", V11, &[0, 0, 0, 0, 0x40])),
        image("app", &import_table("driver", V11, &[4])),
        image("rpcuser", &import_table("sifrpc", V11, &[4, 7])),
        image("broken", &import_table("missing", V11, &[4])),
        BootModule::Image {
            name: String::from("noise.bin"),
            bytes: vec![0xFF; 48],
        },
    ];
    let report = l.iop.boot(modules, &mut ExportScanRunner);
    l.pump();

    let loaded: Vec<_> = report
        .loaded
        .iter()
        .map(|&id| l.iop.module(id).unwrap().name.clone())
        .collect();
    assert_eq!(loaded, ["driver", "app", "rpcuser"]);
    let failed: Vec<_> = report.failed.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(failed, ["broken.irx", "noise.bin"]);

    let console = l.bus.console(Side::Iop).lines();
    assert_eq!(console.len(), 2);
    assert!(console[0].starts_with("broken.irx: "));
    assert!(l.bus.console(Side::Ee).lines().is_empty());

    // The link still works after boot.
    l.ee.set_peer_sreg(0, 1).unwrap();
    l.pump();
    assert_eq!(l.iop.get_sreg(0), Some(1));
}

#[test]
fn small_iop_memory_still_boots() {
    let small = KernelConfig::new(Side::Iop).with_memory(512 * 1024, iop_abi::Addr::new(0x1_0000));
    let mut l = Link::with_configs(small, KernelConfig::new(Side::Ee)).unwrap();
    let before = l.iop.sysmem().query_total_free();
    let block = l.iop.alloc_sys_memory(AllocStrategy::Last, 0x1000).unwrap();
    assert!(block.as_u32() < 512 * 1024);
    l.iop.free_sys_memory(block).unwrap();
    assert_eq!(l.iop.sysmem().query_total_free(), before);
}
