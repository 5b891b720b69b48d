// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Integration tests for the SIF transport and command layer across a
//! linked IOP and EE kernel.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::Link;
use iop_abi::bytes::get_u32;
use iop_abi::sif::DmaStatus;
use iop_abi::{Addr, CmdHeader, DmaAttr, DmaTransfer, SifReg};
use iop_kernel::sifcmd::ExtraData;
use iop_kernel::sysmem::AllocStrategy;
use iop_kernel::{KernelConfig, KernelState, Side};
use proptest::prelude::*;

/// Where the command handler records what it saw.
const SEEN: Addr = Addr::new(0x300);
const USER_CMD: u32 = 3;

/// Records the first payload word and the first word of the extra data.
fn record(k: &mut KernelState, packet: &[u8], arg: u32) {
    let word = get_u32(packet, 16).unwrap_or(0);
    let header = CmdHeader::decode(packet).unwrap();
    let data = k.memory().read_u32(header.data_addr).unwrap_or(0);
    let memory = k.memory_mut();
    memory.write_u32(SEEN, word).unwrap();
    memory.write_u32(SEEN + 4, data).unwrap();
    memory.write_u32(SEEN + 8, arg).unwrap();
}

#[test]
fn handshake_publishes_both_sides() {
    let l = Link::start().unwrap();
    assert!(l.iop.sif_peer_alive());
    assert!(l.ee.sif_peer_alive());
    assert_eq!(
        l.iop.sif_get_reg(SifReg::SubAddr),
        l.iop.cmd_buffer().unwrap().as_u32()
    );
    assert_eq!(
        l.ee.sif_get_reg(SifReg::MainAddr),
        l.ee.cmd_buffer().unwrap().as_u32()
    );
}

#[test]
fn software_registers_cross_the_link() {
    let mut l = Link::start().unwrap();
    l.ee.set_peer_sreg(4, 0xCAFE).unwrap();
    l.iop.set_peer_sreg(5, 0xF00D).unwrap();
    l.pump();
    assert_eq!(l.iop.get_sreg(4), Some(0xCAFE));
    assert_eq!(l.ee.get_sreg(5), Some(0xF00D));
}

#[test]
fn user_command_carries_extra_data() {
    let mut l = Link::start().unwrap();
    l.iop.add_cmd_handler(USER_CMD, record, 11).unwrap();

    let src = l.ee.alloc_sys_memory(AllocStrategy::First, 64).unwrap();
    let dest = l.iop.alloc_sys_memory(AllocStrategy::First, 64).unwrap();
    l.ee.memory_mut().write_u32(src, 0x1234_5678).unwrap();
    let extra = ExtraData { src, dest, size: 64 };
    let burst = l
        .ee
        .send_cmd_bytes(USER_CMD, &0xAA55_u32.to_le_bytes(), Some(extra))
        .unwrap();
    l.pump();

    assert_eq!(l.ee.dma_stat(burst), DmaStatus::Done);
    let memory = l.iop.memory();
    assert_eq!(memory.read_u32(SEEN).unwrap(), 0xAA55);
    assert_eq!(memory.read_u32(SEEN + 4).unwrap(), 0x1234_5678);
    assert_eq!(memory.read_u32(SEEN + 8).unwrap(), 11);
}

#[test]
fn commands_without_a_handler_are_dropped() {
    let mut l = Link::start().unwrap();
    l.ee.send_cmd_bytes(USER_CMD, &[1, 2, 3, 4], None).unwrap();
    l.pump();
    assert_eq!(l.iop.memory().read_u32(SEEN).unwrap(), 0);

    // The receive channel is re-armed, so later commands still arrive.
    l.iop.add_cmd_handler(USER_CMD, record, 0).unwrap();
    l.ee.send_cmd_bytes(USER_CMD, &7u32.to_le_bytes(), None).unwrap();
    l.pump();
    assert_eq!(l.iop.memory().read_u32(SEEN).unwrap(), 7);
}

// =============================================================================
// Properties
// =============================================================================

const RING: usize = 4;
const CHUNK: u32 = 16;

fn small_rings() -> Link {
    Link::with_configs(
        KernelConfig::new(Side::Iop).with_ring_capacity(RING),
        KernelConfig::new(Side::Ee).with_ring_capacity(RING),
    )
    .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Accepted batches arrive whole; rejected ones leave no trace.
    #[test]
    fn batches_arrive_whole_or_not_at_all(
        ops in proptest::collection::vec((1usize..=RING + 2, any::<bool>()), 1..24),
    ) {
        let mut l = small_rings();
        let src = l.iop.alloc_sys_memory(AllocStrategy::First, 4096).unwrap();
        let dest = l.ee.alloc_sys_memory(AllocStrategy::First, 4096).unwrap();
        l.ee.memory_mut().fill(dest, 4096, 0).unwrap();

        let mut next = 0u32;
        let mut batches = Vec::new();
        for (len, pump) in ops {
            let transfers: Vec<DmaTransfer> = (next..next + len as u32)
                .map(|j| {
                    let at = j * CHUNK;
                    l.iop.memory_mut().fill(src + at, CHUNK, j as u8 + 1).unwrap();
                    DmaTransfer::new(src + at, dest + at, CHUNK, DmaAttr::NONE)
                })
                .collect();
            let id = l.iop.set_dma(&transfers);
            prop_assert!(len <= RING || id.is_none());
            batches.push((next, len as u32, id));
            next += len as u32;
            if pump {
                l.pump();
            }
        }
        l.pump();

        for (first, len, id) in batches {
            for j in first..first + len {
                let bytes = l.ee.read_bytes(dest + j * CHUNK, CHUNK).unwrap();
                let expected = if id.is_some() { j as u8 + 1 } else { 0 };
                prop_assert!(bytes.iter().all(|&b| b == expected), "transfer {}", j);
            }
            if let Some(id) = id {
                prop_assert_eq!(l.iop.dma_stat(id), DmaStatus::Done);
            }
        }
    }
}
