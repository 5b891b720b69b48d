// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Integration tests for loading, linking and unloading modules.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use iop_abi::module::{STUB_SIZE, TABLE_HEADER_SIZE};
use iop_abi::{Addr, LibVersion};
use iop_kernel::elf::writer::{IrxWriter, export_table, import_table};
use iop_kernel::loadcore::{
    ExportScanRunner, IopModule, LinkError, LoadError, ModuleContext, ModuleInfo, ModuleRunner,
    NativeLibrary, StartResult, StubCall,
};
use iop_kernel::platform::MockHardware;
use iop_kernel::reloc::R_MIPS_32;
use iop_kernel::{BootModule, KernelConfig, KernelState};

const V11: LibVersion = LibVersion::new(1, 1);

fn kernel() -> KernelState {
    KernelState::start(KernelConfig::default(), MockHardware::new().hardware()).unwrap()
}

/// Address of the `index`-th stub of the first import table in `module`.
fn stub(k: &KernelState, module: &str, index: u32) -> Addr {
    k.find_module_by_name(module).unwrap().text_start + TABLE_HEADER_SIZE + index * STUB_SIZE
}

fn returned(call: StubCall) -> u32 {
    match call {
        StubCall::Returned(v) => v,
        StubCall::Jump(addr) => unreachable!("jump to {addr}"),
    }
}

/// Runner that keeps images resident and removable.
struct Removable;

impl ModuleRunner for Removable {
    fn run_entry(&mut self, _k: &mut KernelState, _module: &ModuleInfo) -> StartResult {
        StartResult::RemovableEnd
    }
}

/// Image exporting `mathlib` ordinal 4 at text offset 0x40.
fn mathlib_image() -> Vec<u8> {
    let table = export_table("mathlib", V11, &[0, 0, 0, 0, 0x40]);
    let mut writer = IrxWriter::new("mathlib", V11).text_bytes(&table);
    let pad = (0x40 - writer.text_len()) / 4;
    writer = writer
        .text_words(&vec![0; pad as usize])
        .text_words(&[0x03E0_0008, 0]);
    writer.reloc(TABLE_HEADER_SIZE + 16, R_MIPS_32).build()
}

fn image_importing(name: &str, lib: &str, ordinals: &[u16]) -> Vec<u8> {
    IrxWriter::new(name, V11)
        .text_bytes(&import_table(lib, LibVersion::new(1, 0), ordinals))
        .bss(0x200)
        .build()
}

fn double(_k: &mut KernelState, args: &[u32]) -> u32 {
    args.first().copied().unwrap_or(0) * 2
}

/// Native module publishing `calc` with `double` at ordinal 4.
struct Calc;

impl IopModule for Calc {
    fn name(&self) -> &str {
        "calc"
    }

    fn version(&self) -> LibVersion {
        V11
    }

    fn start(&mut self, k: &mut KernelState, ctx: &ModuleContext) -> StartResult {
        let lib = NativeLibrary::new("calc", V11).export(4, double);
        match k.register_library_entries(ctx.id, lib) {
            Ok(_) => StartResult::RemovableEnd,
            Err(e) => StartResult::Failed(e.code()),
        }
    }
}

#[test]
fn image_allocates_through_sysmem_stubs() {
    let mut k = kernel();
    let before = k.sysmem().query_total_free();
    k.load_image("user.irx", &image_importing("user", "sysmem", &[4, 5, 8]), &mut Removable)
        .unwrap();
    let resident = k.sysmem().query_total_free();
    assert!(resident < before);

    let (alloc, free, total) = (stub(&k, "user", 0), stub(&k, "user", 1), stub(&k, "user", 2));
    let block = returned(k.call_stub(alloc, &[1, 0x1000, 0]).unwrap());
    assert_ne!(block, 0);
    assert_eq!(returned(k.call_stub(total, &[]).unwrap()), resident - 0x1000);

    assert_eq!(returned(k.call_stub(free, &[block]).unwrap()), 0);
    assert_eq!(returned(k.call_stub(total, &[]).unwrap()), resident);

    let id = k.find_module_by_name("user").unwrap().id;
    k.unload_module(id, &mut Removable).unwrap();
    assert_eq!(k.sysmem().query_total_free(), before);
    assert!(k.call_stub(alloc, &[1, 16, 0]).is_err());
}

#[test]
fn images_link_against_native_libraries() {
    let mut k = kernel();
    let calc = k.load_native(Box::new(Calc)).unwrap();
    k.load_image("user.irx", &image_importing("user", "calc", &[4]), &mut Removable)
        .unwrap();
    let double_stub = stub(&k, "user", 0);
    assert_eq!(returned(k.call_stub(double_stub, &[21]).unwrap()), 42);

    k.unload_module(calc, &mut Removable).unwrap();
    assert_eq!(k.call_stub(double_stub, &[21]), Err(LinkError::UnlinkedStub));
    assert_eq!(k.orphan_imports(), 1);

    k.load_native(Box::new(Calc)).unwrap();
    assert_eq!(k.orphan_imports(), 0);
    assert_eq!(returned(k.call_stub(double_stub, &[5]).unwrap()), 10);
}

#[test]
fn boot_order_decides_what_links() {
    let mut k = kernel();
    let modules = vec![
        BootModule::Image {
            name: String::from("early.irx"),
            bytes: image_importing("early", "mathlib", &[4]),
        },
        BootModule::Image {
            name: String::from("mathlib.irx"),
            bytes: mathlib_image(),
        },
        BootModule::Image {
            name: String::from("late.irx"),
            bytes: image_importing("late", "mathlib", &[4]),
        },
    ];
    let report = k.boot(modules, &mut ExportScanRunner);

    assert_eq!(report.loaded.len(), 2);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].name, "early.irx");
    assert!(matches!(
        report.failed[0].error,
        LoadError::Link(LinkError::LibraryNotFound(_))
    ));

    let base = k.find_module_by_name("mathlib").unwrap().text_start;
    let late = stub(&k, "late", 0);
    assert_eq!(k.call_stub(late, &[]).unwrap(), StubCall::Jump(base + 0x40));
}

#[test]
fn library_versions_follow_the_major_number() {
    let mut k = kernel();
    let v2 = IrxWriter::new("user2", V11)
        .text_bytes(&import_table("sysmem", LibVersion::new(2, 0), &[6]))
        .build();
    let err = k.load_image("user2.irx", &v2, &mut Removable).unwrap_err();
    assert!(matches!(err, LoadError::Link(LinkError::LibraryNotFound(_))));

    let older = k.find_library("sysmem", LibVersion::new(1, 0));
    assert_eq!(older, k.find_library("sysmem", V11));
    assert!(older.is_some());
}
