// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Shared infrastructure for integration tests.
//!
//! [`Link`] starts an IOP kernel and an EE kernel on one host SIF bus and
//! completes the handshake between them.
//!
//! This module is **not** a test file, so it must comply with full clippy
//! rules.

#![allow(dead_code, reason = "each test binary uses a subset")]

use iop_abi::Addr;
use iop_kernel::platform::SifBus;
use iop_kernel::{KernelConfig, KernelError, KernelState, Side};

/// Two kernels wired back to back.
pub struct Link {
    /// The simulated link.
    pub bus: SifBus,
    /// I/O processor side.
    pub iop: KernelState,
    /// Main CPU side.
    pub ee: KernelState,
}

impl Link {
    /// Starts both kernels with default configurations.
    pub fn start() -> Result<Self, KernelError> {
        Self::with_configs(KernelConfig::new(Side::Iop), KernelConfig::new(Side::Ee))
    }

    /// Starts both kernels, IOP first, and delivers the handshake traffic.
    pub fn with_configs(iop: KernelConfig, ee: KernelConfig) -> Result<Self, KernelError> {
        let bus = SifBus::new();
        let mut iop = KernelState::start(iop, bus.hardware(Side::Iop))?;
        let mut ee = KernelState::start(ee, bus.hardware(Side::Ee))?;
        bus.pump(&mut iop, &mut ee);
        Ok(Self { bus, iop, ee })
    }

    /// Delivers traffic in both directions until the link is quiet.
    pub fn pump(&mut self) -> usize {
        self.bus.pump(&mut self.iop, &mut self.ee)
    }
}

/// RPC server function returning its argument buffer as the reply.
pub fn echo(_k: &mut KernelState, _rpc_number: u32, buff: Addr, _size: u32) -> Option<Addr> {
    Some(buff)
}

/// RPC server function that reverses the argument bytes in place.
pub fn reverse(k: &mut KernelState, _rpc_number: u32, buff: Addr, size: u32) -> Option<Addr> {
    let bytes = k.memory_mut().slice_mut(buff, size).ok()?;
    bytes.reverse();
    Some(buff)
}
