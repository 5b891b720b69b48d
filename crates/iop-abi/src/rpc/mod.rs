// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! RPC packet formats layered on SIF command packets.
//!
//! Every RPC packet extends the command header with a common 12-byte block:
//!
//! | Offset | Field |
//! |--------|-------|
//! | 16 | `packet_id` (non-zero while the slot is in use) |
//! | 20 | `packet_addr` (the packet's own address on the sender) |
//! | 24 | `thread_id` (thread waiting for the reply) |
//!
//! Client and server records are referred to by opaque 32-bit handles that
//! only the side owning the record interprets.

use crate::bytes::{get_u32, put_u32};
use crate::sif::{CMD_RPC_BIND, CMD_RPC_CALL, CMD_RPC_END, CMD_RPC_RDATA, CmdHeader};
use crate::{Addr, PacketId, ThreadId};


/// Size of the common RPC header including the command header.
pub const RPC_HEADER_SIZE: usize = 28;

/// Size of a BIND packet.
pub const BIND_PACKET_SIZE: usize = 36;

/// Size of a CALL packet.
pub const CALL_PACKET_SIZE: usize = 56;

/// Size of an END packet.
pub const END_PACKET_SIZE: usize = 48;

/// Size of an RDATA packet.
pub const RDATA_PACKET_SIZE: usize = 44;

/// Call mode: return immediately instead of waiting for END.
pub const MODE_NOWAIT: u32 = 0x01;

/// Call mode: skip the data cache write-back before sending.
pub const MODE_NOWBDC: u32 = 0x02;

/// RPC failure: no free packet slot.
pub const RPCE_GETP: i32 = 1;

/// RPC failure: packet could not be queued for sending.
pub const RPCE_SENDP: i32 = 2;

// =============================================================================
// Common Header
// =============================================================================

/// Common header of every RPC packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RpcHeader {
    /// SIF command header.
    pub cmd: CmdHeader,
    /// Packet slot id.
    pub packet_id: PacketId,
    /// Address of the packet on the sending side.
    pub packet_addr: Addr,
    /// Thread waiting on this request.
    pub thread_id: ThreadId,
}

impl RpcHeader {
    /// Creates a header for `command` with the given total packet size.
    #[must_use]
    pub const fn new(command: u32, size: usize, packet_id: PacketId, packet_addr: Addr) -> Self {
        Self {
            cmd: CmdHeader::new(command, size as u8),
            packet_id,
            packet_addr,
            thread_id: ThreadId::BOOT,
        }
    }

    /// Decodes the header from the start of `buf`.
    #[must_use]
    pub fn decode(buf: &[u8]) -> Option<Self> {
        Some(Self {
            cmd: CmdHeader::decode(buf)?,
            packet_id: PacketId::new(get_u32(buf, 16)?),
            packet_addr: Addr::new(get_u32(buf, 20)?),
            thread_id: ThreadId::new(get_u32(buf, 24)?),
        })
    }

    /// Encodes the header to the start of `buf`.
    pub fn encode(&self, buf: &mut [u8]) -> bool {
        self.cmd.encode(buf)
            && put_u32(buf, 16, self.packet_id.as_u32())
            && put_u32(buf, 20, self.packet_addr.as_u32())
            && put_u32(buf, 24, self.thread_id.as_u32())
    }
}

/// Encodes trailing words after the common header.
fn put_words(buf: &mut [u8], words: &[u32]) -> bool {
    words
        .iter()
        .enumerate()
        .all(|(i, &w)| put_u32(buf, RPC_HEADER_SIZE + i * 4, w))
}

/// Reads the `index`-th trailing word after the common header.
fn word(buf: &[u8], index: usize) -> Option<u32> {
    get_u32(buf, RPC_HEADER_SIZE + index * 4)
}

// =============================================================================
// Packets
// =============================================================================

/// BIND: look up a server id on the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindPacket {
    /// Common header.
    pub header: RpcHeader,
    /// Client record handle on the sender.
    pub client: u32,
    /// Server id to bind to.
    pub sid: u32,
}

impl BindPacket {
    /// Decodes a BIND packet.
    #[must_use]
    pub fn decode(buf: &[u8]) -> Option<Self> {
        Some(Self {
            header: RpcHeader::decode(buf)?,
            client: word(buf, 0)?,
            sid: word(buf, 1)?,
        })
    }

    /// Encodes the packet, fixing up the command id and size.
    pub fn encode(&self, buf: &mut [u8]) -> bool {
        let mut header = self.header;
        header.cmd.command = CMD_RPC_BIND;
        header.cmd.packet_size = BIND_PACKET_SIZE as u8;
        header.encode(buf) && put_words(buf, &[self.client, self.sid])
    }
}

/// CALL: run a function on a bound server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallPacket {
    /// Common header; `cmd.data_addr`/`cmd.data_size` describe the arguments.
    pub header: RpcHeader,
    /// Client record handle on the sender.
    pub client: u32,
    /// Function number passed to the server handler.
    pub rpc_number: u32,
    /// Size of the argument data sent ahead of the packet.
    pub send_size: u32,
    /// Where the reply goes in the sender's memory.
    pub recv_addr: Addr,
    /// Size of the reply buffer.
    pub recv_size: u32,
    /// Call mode bits.
    pub mode: u32,
    /// Server record handle on the receiver (from the bind reply).
    pub server: u32,
}

impl CallPacket {
    /// Decodes a CALL packet.
    #[must_use]
    pub fn decode(buf: &[u8]) -> Option<Self> {
        Some(Self {
            header: RpcHeader::decode(buf)?,
            client: word(buf, 0)?,
            rpc_number: word(buf, 1)?,
            send_size: word(buf, 2)?,
            recv_addr: Addr::new(word(buf, 3)?),
            recv_size: word(buf, 4)?,
            mode: word(buf, 5)?,
            server: word(buf, 6)?,
        })
    }

    /// Encodes the packet, fixing up the command id and size.
    pub fn encode(&self, buf: &mut [u8]) -> bool {
        let mut header = self.header;
        header.cmd.command = CMD_RPC_CALL;
        header.cmd.packet_size = CALL_PACKET_SIZE as u8;
        header.encode(buf)
            && put_words(
                buf,
                &[
                    self.client,
                    self.rpc_number,
                    self.send_size,
                    self.recv_addr.as_u32(),
                    self.recv_size,
                    self.mode,
                    self.server,
                ],
            )
    }
}

/// END: completes a BIND or CALL on the client side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndPacket {
    /// Common header; `packet_addr` echoes the request packet.
    pub header: RpcHeader,
    /// Client record handle (echoed from the request).
    pub client: u32,
    /// The command being completed (`CMD_RPC_BIND` or `CMD_RPC_CALL`).
    pub command: u32,
    /// Server record handle, zero if a bind found no server.
    pub server: u32,
    /// Server receive buffer (bind replies).
    pub buff: Addr,
    /// Server client-data buffer (bind replies).
    pub cbuff: Addr,
}

impl EndPacket {
    /// Decodes an END packet.
    #[must_use]
    pub fn decode(buf: &[u8]) -> Option<Self> {
        Some(Self {
            header: RpcHeader::decode(buf)?,
            client: word(buf, 0)?,
            command: word(buf, 1)?,
            server: word(buf, 2)?,
            buff: Addr::new(word(buf, 3)?),
            cbuff: Addr::new(word(buf, 4)?),
        })
    }

    /// Encodes the packet, fixing up the command id and size.
    pub fn encode(&self, buf: &mut [u8]) -> bool {
        let mut header = self.header;
        header.cmd.command = CMD_RPC_END;
        header.cmd.packet_size = END_PACKET_SIZE as u8;
        header.encode(buf)
            && put_words(
                buf,
                &[
                    self.client,
                    self.command,
                    self.server,
                    self.buff.as_u32(),
                    self.cbuff.as_u32(),
                ],
            )
    }
}

/// RDATA: ask the peer to send a block of its memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RdataPacket {
    /// Common header.
    pub header: RpcHeader,
    /// Client record handle on the sender.
    pub client: u32,
    /// Source address in the receiver's memory.
    pub src: Addr,
    /// Destination address in the sender's memory.
    pub dest: Addr,
    /// Number of bytes.
    pub size: u32,
}

impl RdataPacket {
    /// Decodes an RDATA packet.
    #[must_use]
    pub fn decode(buf: &[u8]) -> Option<Self> {
        Some(Self {
            header: RpcHeader::decode(buf)?,
            client: word(buf, 0)?,
            src: Addr::new(word(buf, 1)?),
            dest: Addr::new(word(buf, 2)?),
            size: word(buf, 3)?,
        })
    }

    /// Encodes the packet, fixing up the command id and size.
    pub fn encode(&self, buf: &mut [u8]) -> bool {
        let mut header = self.header;
        header.cmd.command = CMD_RPC_RDATA;
        header.cmd.packet_size = RDATA_PACKET_SIZE as u8;
        header.encode(buf)
            && put_words(
                buf,
                &[self.client, self.src.as_u32(), self.dest.as_u32(), self.size],
            )
    }
}
