// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Tests for module loading, linking and unloading.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use alloc::boxed::Box;
use alloc::rc::Rc;
use alloc::vec;
use alloc::vec::Vec;
use core::cell::Cell;

use iop_abi::{Addr, LibVersion, ModuleId};

use super::*;
use crate::coff::{AOUT_HEADER_SIZE, AOUT_MAGIC, COFF_MAGIC, FILE_HEADER_SIZE, SECTION_HEADER_SIZE};
use crate::elf::writer::{IrxWriter, export_table, import_table};
use crate::kernel::test_kernel;
use crate::reloc::R_MIPS_32;

const V11: LibVersion = LibVersion::new(1, 1);

/// Runner that reports a fixed result and counts stop requests.
struct FixedRunner {
    result: StartResult,
    stops: u32,
}

impl FixedRunner {
    const fn new(result: StartResult) -> Self {
        Self { result, stops: 0 }
    }
}

impl ModuleRunner for FixedRunner {
    fn run_entry(&mut self, _k: &mut KernelState, _module: &ModuleInfo) -> StartResult {
        self.result
    }

    fn stop_module(&mut self, _k: &mut KernelState, _module: &ModuleInfo) -> bool {
        self.stops += 1;
        true
    }
}

/// Image importing `sysmem` ordinals 6 and 8.
fn sysmem_client() -> Vec<u8> {
    IrxWriter::new("client", V11)
        .text_bytes(&import_table("sysmem", V11, &[6, 8]))
        .text_words(&[0x03E0_0008, 0])
        .bss(0x100)
        .build()
}

/// Image exporting `mylib` with ordinal 4 at text offset 0x40.
fn library_image() -> Vec<u8> {
    let table = export_table("mylib", V11, &[0, 0, 0, 0, 0x40]);
    let entry_offset = 20 + 16;
    let mut writer = IrxWriter::new("mylib", V11).text_bytes(&table);
    let pad = (0x40 - writer.text_len()) / 4;
    writer = writer.text_words(&vec![0; pad as usize]).text_words(&[0x03E0_0008, 0]);
    writer.reloc(entry_offset, R_MIPS_32).build()
}

/// Image importing `mylib` ordinal 4.
fn mylib_client() -> Vec<u8> {
    IrxWriter::new("user", V11)
        .text_bytes(&import_table("mylib", LibVersion::new(1, 0), &[4]))
        .build()
}

fn put16(buf: &mut [u8], at: usize, v: u16) {
    buf[at..at + 2].copy_from_slice(&v.to_le_bytes());
}

fn put32(buf: &mut [u8], at: usize, v: u32) {
    buf[at..at + 4].copy_from_slice(&v.to_le_bytes());
}

/// COFF image linked at `base` with one text section.
fn coff_image(base: u32, text: &[u8]) -> Vec<u8> {
    let table = FILE_HEADER_SIZE + AOUT_HEADER_SIZE;
    let contents = table + SECTION_HEADER_SIZE;
    let mut buf = vec![0u8; contents + text.len()];
    put16(&mut buf, 0, COFF_MAGIC);
    put16(&mut buf, 2, 1);
    put16(&mut buf, 16, AOUT_HEADER_SIZE as u16);
    let o = FILE_HEADER_SIZE;
    put16(&mut buf, o, AOUT_MAGIC);
    put32(&mut buf, o + 4, text.len() as u32);
    put32(&mut buf, o + 16, base);
    put32(&mut buf, o + 20, base);
    put32(&mut buf, o + 24, base + text.len() as u32);
    put32(&mut buf, o + 28, base + text.len() as u32);
    buf[table..table + 8].copy_from_slice(b".text\0\0\0");
    put32(&mut buf, table + 8, base);
    put32(&mut buf, table + 12, base);
    put32(&mut buf, table + 16, text.len() as u32);
    put32(&mut buf, table + 20, contents as u32);
    put32(&mut buf, table + 36, 0x20);
    buf[contents..].copy_from_slice(text);
    buf
}

fn returned(call: StubCall) -> u32 {
    match call {
        StubCall::Returned(v) => v,
        StubCall::Jump(addr) => panic!("expected a kernel call, got jump to {addr}"),
    }
}

#[test]
fn kernel_services_are_builtin_libraries() {
    let (k, _mock) = test_kernel();
    for name in ["sysmem", "loadcore", "excepman", "intrman", "sifman", "sifcmd", "sifrpc"] {
        assert!(k.find_library(name, LibVersion::new(1, 0)).is_some(), "{name}");
        let module = k.find_module_by_name(name).unwrap();
        assert_eq!(module.kind, ModuleKind::Builtin);
        assert_eq!(module.state, ModuleState::Resident);
    }
}

#[test]
fn image_imports_resolve_to_kernel_exports() {
    let (mut k, _mock) = test_kernel();
    let mut runner = FixedRunner::new(StartResult::ResidentEnd);
    let id = k.load_image("client.irx", &sysmem_client(), &mut runner).unwrap();

    let module = k.module(id).unwrap().clone();
    assert_eq!(module.name, "client");
    assert_eq!(module.kind, ModuleKind::Image(ImageFormat::Elf));
    assert_eq!(module.bss_size, 0x100);
    let stub = module.text_start + 20;
    let mem_size = returned(k.call_stub(stub, &[]).unwrap());
    assert_eq!(mem_size, k.sysmem().query_mem_size());
    let total = returned(k.call_stub(stub + 8, &[]).unwrap());
    assert_eq!(total, k.sysmem().query_total_free());
    assert_eq!(k.call_stub(stub + 16, &[]), Err(LinkError::UnknownStub(stub + 16)));
}

#[test]
fn image_is_zero_filled_and_owned() {
    let (mut k, _mock) = test_kernel();
    let image = sysmem_client();
    let mut runner = FixedRunner::new(StartResult::ResidentEnd);
    let id = k.load_image("client.irx", &image, &mut runner).unwrap();
    let module = k.module(id).unwrap().clone();

    let bss_start = module.text_start + module.text_size;
    let bss = k.read_bytes(bss_start, 0x100).unwrap();
    assert!(bss.iter().all(|&b| b == 0));
    assert_eq!(k.find_module_by_addr(bss_start).map(|m| m.id), Some(id));
    assert!(k.sysmem().query_block_size(module.text_start).unwrap() >= module.mem_size);
}

#[test]
fn exported_library_links_image_to_image() {
    let (mut k, _mock) = test_kernel();
    let lib_id = k.load_image("mylib.irx", &library_image(), &mut ExportScanRunner).unwrap();
    let lib_base = k.module(lib_id).unwrap().text_start;

    let info = k.libraries().into_iter().find(|l| l.name.as_str() == "mylib").unwrap();
    assert_eq!(info.owner, lib_id);

    let mut runner = FixedRunner::new(StartResult::ResidentEnd);
    let user = k.load_image("user.irx", &mylib_client(), &mut runner).unwrap();
    let stub = k.module(user).unwrap().text_start + 20;
    assert_eq!(k.call_stub(stub, &[]).unwrap(), StubCall::Jump(lib_base + 0x40));
}

#[test]
fn unresolved_import_fails_and_releases_memory() {
    let (mut k, _mock) = test_kernel();
    let before = k.sysmem().query_total_free();
    let modules = k.modules().len();
    let mut runner = FixedRunner::new(StartResult::ResidentEnd);

    let err = k.load_image("user.irx", &mylib_client(), &mut runner).unwrap_err();

    assert!(matches!(err, LoadError::Link(LinkError::LibraryNotFound(_))));
    assert_eq!(err.code(), iop_abi::errno::KE_LIBRARY_NOTFOUND);
    assert_eq!(k.sysmem().query_total_free(), before);
    assert_eq!(k.modules().len(), modules);
}

#[test]
fn garbage_is_not_an_image() {
    let (mut k, _mock) = test_kernel();
    let mut runner = FixedRunner::new(StartResult::ResidentEnd);
    let err = k.load_image("junk", &[0u8; 64], &mut runner).unwrap_err();
    assert_eq!(err, LoadError::UnknownFormat);
    assert_eq!(err.code(), iop_abi::errno::KE_ILLEGAL_OBJECT);
}

#[test]
fn no_resident_end_unloads_but_succeeds() {
    let (mut k, _mock) = test_kernel();
    let before = k.sysmem().query_total_free();
    let mut runner = FixedRunner::new(StartResult::NoResidentEnd);
    let id = k.load_image("client.irx", &sysmem_client(), &mut runner).unwrap();
    assert!(k.module(id).is_none());
    assert_eq!(k.sysmem().query_total_free(), before);
}

#[test]
fn failed_start_unwinds() {
    let (mut k, _mock) = test_kernel();
    let before = k.sysmem().query_total_free();
    let mut runner = FixedRunner::new(StartResult::Failed(-5));
    let err = k.load_image("client.irx", &sysmem_client(), &mut runner).unwrap_err();
    assert_eq!(err, LoadError::StartFailed(-5));
    assert_eq!(k.sysmem().query_total_free(), before);
    assert!(k.find_module_by_name("client").is_none());
}

#[test]
fn fixed_address_image_loads_at_link_address() {
    let (mut k, _mock) = test_kernel();
    let text: Vec<u8> = (0..32u8).collect();
    let image = coff_image(0x4_0000, &text);
    let mut runner = FixedRunner::new(StartResult::ResidentEnd);
    let id = k.load_image("fixed.elf", &image, &mut runner).unwrap();

    let module = k.module(id).unwrap();
    assert_eq!(module.text_start, Addr::new(0x4_0000));
    assert_eq!(module.name, "fixed.elf");
    assert_eq!(module.kind, ModuleKind::Image(ImageFormat::Coff));
    assert_eq!(k.read_bytes(Addr::new(0x4_0000), 32).unwrap(), text);

    let err = k.load_image("again.elf", &image, &mut runner).unwrap_err();
    assert_eq!(err, LoadError::AddressInUse(Addr::new(0x4_0000)));
}

#[test]
fn modules_sorted_by_address() {
    let (mut k, _mock) = test_kernel();
    let mut runner = FixedRunner::new(StartResult::ResidentEnd);
    k.load_image("fixed.elf", &coff_image(0x8_0000, &[0; 16]), &mut runner).unwrap();
    k.load_image("client.irx", &sysmem_client(), &mut runner).unwrap();
    let starts: Vec<Addr> = k.modules().iter().map(|m| m.text_start).collect();
    let mut sorted = starts.clone();
    sorted.sort();
    assert_eq!(starts, sorted);
}

#[test]
fn unload_requires_removable() {
    let (mut k, _mock) = test_kernel();
    let mut runner = FixedRunner::new(StartResult::ResidentEnd);
    let id = k.load_image("client.irx", &sysmem_client(), &mut runner).unwrap();
    assert_eq!(k.unload_module(id, &mut runner), Err(LoadError::NotRemovable(id)));
    let missing = ModuleId::new(999);
    assert_eq!(k.unload_module(missing, &mut runner), Err(LoadError::UnknownModule(missing)));
}

#[test]
fn unloading_a_library_orphans_its_importers() {
    let (mut k, _mock) = test_kernel();
    let lib_id = k.load_image("mylib.irx", &library_image(), &mut ExportScanRunner).unwrap();
    let mut runner = FixedRunner::new(StartResult::ResidentEnd);
    let user = k.load_image("user.irx", &mylib_client(), &mut runner).unwrap();
    let stub = k.module(user).unwrap().text_start + 20;

    // Export-scanned images are resident; flip to removable to unload.
    k.loadcore.get_mut(lib_id).unwrap().state = ModuleState::Removable;
    k.unload_module(lib_id, &mut runner).unwrap();

    assert_eq!(runner.stops, 1);
    assert_eq!(k.call_stub(stub, &[]), Err(LinkError::UnlinkedStub));
    assert_eq!(k.orphan_imports(), 1);

    // Loading the library again heals the importer.
    let again = k.load_image("mylib.irx", &library_image(), &mut ExportScanRunner).unwrap();
    let base = k.module(again).unwrap().text_start;
    assert_eq!(k.call_stub(stub, &[]).unwrap(), StubCall::Jump(base + 0x40));
}

#[test]
fn register_library_entries_from_memory() {
    let (mut k, _mock) = test_kernel();
    let table = export_table("memlib", V11, &[0, 0, 0, 0, 0x1234]);
    let addr = k.alloc_sys_memory(crate::sysmem::AllocStrategy::First, 256).unwrap();
    k.memory_mut().write(addr, &table).unwrap();

    k.register_image_library(addr).unwrap();
    let info = k.libraries().into_iter().find(|l| l.name.as_str() == "memlib").unwrap();
    assert_eq!(info.owner, ModuleId::NULL);
    assert_eq!(info.exports, 5);
    assert_eq!(
        k.register_image_library(addr),
        Err(LoadError::Link(LinkError::VersionConflict(info.name)))
    );

    k.release_image_library(addr).unwrap();
    assert_eq!(k.release_image_library(addr), Err(LinkError::UnknownLibrary));
}

#[test]
fn bad_export_table_is_rejected() {
    let (mut k, _mock) = test_kernel();
    let addr = k.alloc_sys_memory(crate::sysmem::AllocStrategy::First, 256).unwrap();
    assert_eq!(k.register_image_library(addr), Err(LoadError::BadTable(addr)));
}

// -----------------------------------------------------------------------------
// Native modules
// -----------------------------------------------------------------------------

fn forty_two(_k: &mut KernelState, args: &[u32]) -> u32 {
    42 + args.first().copied().unwrap_or(0)
}

/// Imports `sysmem` and exports `answer`.
struct Answer {
    mem_size: Rc<Cell<u32>>,
    refuse_stop: bool,
}

impl IopModule for Answer {
    fn name(&self) -> &str {
        "answer"
    }

    fn version(&self) -> LibVersion {
        V11
    }

    fn imports(&self) -> Vec<ImportDecl> {
        vec![ImportDecl::new("sysmem", V11, &[6])]
    }

    fn start(&mut self, k: &mut KernelState, ctx: &ModuleContext) -> StartResult {
        if let Ok(StubCall::Returned(size)) = k.call_import(ctx.imports[0], 6, &[]) {
            self.mem_size.set(size);
        }
        let lib = NativeLibrary::new("answer", V11).export(4, forty_two);
        match k.register_library_entries(ctx.id, lib) {
            Ok(_) => StartResult::RemovableEnd,
            Err(e) => StartResult::Failed(e.code()),
        }
    }

    fn stop(&mut self, _k: &mut KernelState) -> bool {
        !self.refuse_stop
    }
}

/// Imports `answer` and records its handle.
struct Asker {
    handle: Rc<Cell<Option<ImportHandle>>>,
}

impl IopModule for Asker {
    fn name(&self) -> &str {
        "asker"
    }

    fn version(&self) -> LibVersion {
        V11
    }

    fn imports(&self) -> Vec<ImportDecl> {
        vec![ImportDecl::new("answer", V11, &[4])]
    }

    fn start(&mut self, _k: &mut KernelState, ctx: &ModuleContext) -> StartResult {
        self.handle.set(Some(ctx.imports[0]));
        StartResult::ResidentEnd
    }
}

#[test]
fn native_modules_link_against_each_other() {
    let (mut k, _mock) = test_kernel();
    let mem_size = Rc::new(Cell::new(0));
    let answer = Answer {
        mem_size: mem_size.clone(),
        refuse_stop: false,
    };
    let answer_id = k.load_native(Box::new(answer)).unwrap();
    assert_eq!(mem_size.get(), k.sysmem().query_mem_size());
    assert_eq!(k.module(answer_id).unwrap().state, ModuleState::Removable);

    let handle = Rc::new(Cell::new(None));
    k.load_native(Box::new(Asker {
        handle: handle.clone(),
    }))
    .unwrap();
    let handle = handle.get().unwrap();
    assert!(k.import_linked(handle));
    assert_eq!(returned(k.call_import(handle, 4, &[8]).unwrap()), 50);

    let mut runner = FixedRunner::new(StartResult::ResidentEnd);
    k.unload_module(answer_id, &mut runner).unwrap();
    assert_eq!(runner.stops, 0);
    assert!(!k.import_linked(handle));
    assert_eq!(k.call_import(handle, 4, &[]), Err(LinkError::UnlinkedStub));
}

#[test]
fn native_module_may_refuse_to_stop() {
    let (mut k, _mock) = test_kernel();
    let answer = Answer {
        mem_size: Rc::new(Cell::new(0)),
        refuse_stop: true,
    };
    let id = k.load_native(Box::new(answer)).unwrap();
    let mut runner = FixedRunner::new(StartResult::ResidentEnd);
    assert_eq!(k.unload_module(id, &mut runner), Err(LoadError::NotRemovable(id)));
    assert!(k.module(id).is_some());
    assert!(k.find_library("answer", V11).is_some());
}

#[test]
fn native_module_with_missing_import_is_rejected() {
    let (mut k, _mock) = test_kernel();
    let err = k
        .load_native(Box::new(Asker {
            handle: Rc::new(Cell::new(None)),
        }))
        .unwrap_err();
    assert!(matches!(err, LoadError::Link(LinkError::LibraryNotFound(_))));
    assert!(k.find_module_by_name("asker").is_none());
}
