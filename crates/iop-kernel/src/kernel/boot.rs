// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Kernel bring-up and the boot module list.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt::Write as _;

use iop_abi::ModuleId;
use tracing::{info, warn};

use super::KernelState;
use crate::config::KernelConfig;
use crate::console::ConsoleWriter;
use crate::error::KernelError;
use crate::loadcore::{IopModule, LoadError, ModuleRunner};
use crate::platform::Hardware;
use crate::{excepman, intrman, loadcore, sifcmd, sifman, sifrpc, sysmem};

/// One entry of the boot module list.
pub enum BootModule {
    /// A module built into the host program.
    Native(Box<dyn IopModule>),
    /// An executable image.
    Image {
        /// Name used in logs and failure reports.
        name: String,
        /// Raw image bytes.
        bytes: Vec<u8>,
    },
}

impl BootModule {
    /// Name of the module.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Native(module) => module.name(),
            Self::Image { name, .. } => name,
        }
    }
}

/// A boot module that did not load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootFailure {
    /// Module name.
    pub name: String,
    /// Why it failed.
    pub error: LoadError,
}

/// Outcome of [`KernelState::boot`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootReport {
    /// Modules now resident or removable, in boot order.
    pub loaded: Vec<ModuleId>,
    /// Modules that failed, in boot order.
    pub failed: Vec<BootFailure>,
}

impl KernelState {
    /// Creates a kernel and brings up every service.
    ///
    /// Order: interrupt dispatch, the kernel libraries, the SIF transport,
    /// the command layer, RPC, then the SIF libraries. Afterwards the
    /// kernel exports `sysmem`, `loadcore`, `excepman`, `intrman`, `sifman`,
    /// `sifcmd` and `sifrpc`.
    pub fn start(config: KernelConfig, hw: Hardware) -> Result<Self, KernelError> {
        let mut k = Self::new(config, hw)?;
        k.intr_init()?;
        for lib in [
            sysmem::export_library(),
            loadcore::export_library(),
            excepman::export_library(),
            intrman::export_library(),
        ] {
            k.register_builtin(lib)?;
        }
        k.sif_init()?;
        k.sif_cmd_init()?;
        k.rpc_init()?;
        for lib in [
            sifman::export_library(),
            sifcmd::export_library(),
            sifrpc::export_library(),
        ] {
            k.register_builtin(lib)?;
        }
        info!(
            side = ?k.config().side,
            heap = k.sysmem().pool_size(),
            free = k.sysmem().query_total_free(),
            "kernel started"
        );
        Ok(k)
    }

    /// Loads the boot modules in order.
    ///
    /// A module that fails is reported and skipped; the rest still load.
    pub fn boot(
        &mut self,
        modules: Vec<BootModule>,
        runner: &mut dyn ModuleRunner,
    ) -> BootReport {
        let mut report = BootReport::default();
        for module in modules {
            let name = String::from(module.name());
            let result = match module {
                BootModule::Native(m) => self.load_native(m),
                BootModule::Image { name, bytes } => self.load_image(&name, &bytes, runner),
            };
            match result {
                Ok(id) => report.loaded.push(id),
                Err(error) => {
                    warn!(module = %name, %error, "boot module failed");
                    if self.config().debug_console {
                        // The console cannot fail.
                        let _ = writeln!(ConsoleWriter(self.console()), "{name}: {error}");
                    }
                    report.failed.push(BootFailure { name, error });
                }
            }
        }
        info!(
            loaded = report.loaded.len(),
            failed = report.failed.len(),
            "boot complete"
        );
        report
    }
}
