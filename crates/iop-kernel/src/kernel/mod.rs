// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! The kernel context.
//!
//! [`KernelState`] owns every table the kernel services share: the allocator,
//! the interrupt and exception tables, the linker, and the SIF and RPC state.
//! Each service adds its operations as `impl KernelState` blocks in its own
//! module. Mutating operations run inside [`KernelState::critical`], which
//! masks interrupts for the duration and restores the previous enable
//! exactly.


mod boot;

pub use boot::{BootFailure, BootModule, BootReport};

use iop_abi::Addr;

use crate::config::KernelConfig;
use crate::console::Console;
use crate::error::KernelError;
use crate::excepman::{EXC_INTERRUPT, ExcepRegistry, ExceptionFrame};
use crate::intrman::IntrTable;
use crate::loadcore::LoadCore;
use crate::memory::Memory;
use crate::platform::{Hardware, IntcReg, InterruptController, SifPort};
use crate::sifcmd::CmdState;
use crate::sifman::SifTransport;
use crate::sifrpc::RpcState;
use crate::sysmem::SysMem;

/// State of one kernel instance.
pub struct KernelState {
    config: KernelConfig,
    memory: Memory,
    hw: Hardware,
    pub(crate) sysmem: SysMem,
    pub(crate) intr: IntrTable,
    pub(crate) excep: ExcepRegistry,
    pub(crate) loadcore: LoadCore,
    pub(crate) sif: SifTransport,
    pub(crate) cmd: CmdState,
    pub(crate) rpc: RpcState,
}

impl KernelState {
    /// Creates a kernel with empty tables.
    ///
    /// Only the allocator is live afterwards; [`Self::start`] brings up the
    /// remaining services.
    pub fn new(config: KernelConfig, hw: Hardware) -> Result<Self, KernelError> {
        let sysmem = SysMem::new(config.heap_base, config.heap_size())?;
        Ok(Self {
            memory: Memory::new(config.mem_size),
            hw,
            sysmem,
            intr: IntrTable::new(),
            excep: ExcepRegistry::new(config.exception_records),
            loadcore: LoadCore::new(),
            sif: SifTransport::new(config.dma_ring_capacity),
            cmd: CmdState::new(config.user_cmds, config.dma_ring_capacity),
            rpc: RpcState::new(&config),
            config,
        })
    }

    /// Configuration this kernel was created with.
    #[must_use]
    pub const fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// Physical memory.
    #[must_use]
    pub const fn memory(&self) -> &Memory {
        &self.memory
    }

    /// Physical memory, mutably.
    pub const fn memory_mut(&mut self) -> &mut Memory {
        &mut self.memory
    }

    /// The block allocator.
    #[must_use]
    pub const fn sysmem(&self) -> &SysMem {
        &self.sysmem
    }

    /// The debug console.
    pub fn console(&mut self) -> &mut dyn Console {
        &mut *self.hw.console
    }

    pub(crate) fn intc(&self) -> &dyn InterruptController {
        &*self.hw.intc
    }

    pub(crate) fn intc_mut(&mut self) -> &mut dyn InterruptController {
        &mut *self.hw.intc
    }

    pub(crate) fn sif_port(&self) -> &dyn SifPort {
        &*self.hw.sif
    }

    pub(crate) fn sif_port_mut(&mut self) -> &mut dyn SifPort {
        &mut *self.hw.sif
    }

    /// Runs `f` with interrupts masked.
    ///
    /// The global enable is restored to the value it had on entry, so
    /// critical sections nest.
    pub fn critical<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        let saved = self.hw.intc.swap_ctrl(0);
        let result = f(self);
        self.hw.intc.write(IntcReg::Ctrl, saved);
        result
    }

    /// Takes the interrupt exception if interrupts are enabled and an
    /// unmasked line is pending.
    ///
    /// Stands in for the CPU's exception entry; returns whether the
    /// dispatcher ran.
    pub fn poll_interrupts(&mut self) -> bool {
        let intc = self.intc();
        if intc.read(IntcReg::Ctrl) == 0 {
            return false;
        }
        if intc.read(IntcReg::Stat) & intc.read(IntcReg::Mask) == 0 {
            return false;
        }
        let mut frame = ExceptionFrame::new(EXC_INTERRUPT);
        self.raise_exception(EXC_INTERRUPT, &mut frame).is_ok()
    }

    /// Copies `len` bytes out of physical memory.
    pub fn read_bytes(&self, addr: Addr, len: u32) -> Result<alloc::vec::Vec<u8>, KernelError> {
        Ok(self.memory.slice(addr, len)?.to_vec())
    }
}

/// Started kernel on fresh mocks, for unit tests.
#[cfg(test)]
#[allow(clippy::expect_used)]
pub(crate) fn test_kernel() -> (KernelState, crate::platform::MockHardware) {
    let mock = crate::platform::MockHardware::new();
    let kernel =
        KernelState::start(KernelConfig::default(), mock.hardware()).expect("kernel start");
    (kernel, mock)
}
