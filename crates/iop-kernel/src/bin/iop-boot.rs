// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Dry-run boot of module images on the host.
//!
//! Starts an IOP kernel and an EE peer on a mock SIF link, loads every
//! image given on the command line in order, and prints the resulting
//! module list and memory usage. Log output is controlled by `RUST_LOG`.
//!
//! ```text
//! iop-boot sio2man.irx padman.irx
//! ```

#![allow(clippy::print_stdout, clippy::print_stderr)] // Command-line report output

use std::process::ExitCode;

use iop_kernel::loadcore::ExportScanRunner;
use iop_kernel::platform::SifBus;
use iop_kernel::{BootModule, KernelConfig, KernelState, Side};
use tracing::error;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let paths: Vec<String> = std::env::args().skip(1).collect();
    if paths.is_empty() {
        eprintln!("usage: iop-boot IMAGE...");
        return ExitCode::FAILURE;
    }

    let mut modules = Vec::with_capacity(paths.len());
    for path in &paths {
        match std::fs::read(path) {
            Ok(bytes) => modules.push(BootModule::Image {
                name: path.clone(),
                bytes,
            }),
            Err(e) => {
                error!(%path, error = %e, "cannot read image");
                return ExitCode::FAILURE;
            }
        }
    }

    let bus = SifBus::new();
    let started = KernelState::start(KernelConfig::new(Side::Iop), bus.hardware(Side::Iop))
        .and_then(|iop| {
            KernelState::start(KernelConfig::new(Side::Ee), bus.hardware(Side::Ee))
                .map(|ee| (iop, ee))
        });
    let (mut iop, mut ee) = match started {
        Ok(pair) => pair,
        Err(e) => {
            error!(error = %e, "kernel start failed");
            return ExitCode::FAILURE;
        }
    };
    bus.pump(&mut iop, &mut ee);

    println!("iop-boot {}", iop_kernel::VERSION);
    let report = iop.boot(modules, &mut ExportScanRunner);
    bus.pump(&mut iop, &mut ee);

    for module in iop.modules() {
        println!(
            "{:>4} {:<16} {:>6} {:?} text={} size={:#x}",
            module.id, module.name, module.version, module.kind, module.text_start, module.mem_size
        );
    }
    for failure in &report.failed {
        println!("FAILED {}: {}", failure.name, failure.error);
    }
    let sysmem = iop.sysmem();
    println!(
        "memory: {} of {} bytes free, largest block {}",
        sysmem.query_total_free(),
        sysmem.pool_size(),
        sysmem.query_max_free()
    );

    if report.failed.is_empty() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
