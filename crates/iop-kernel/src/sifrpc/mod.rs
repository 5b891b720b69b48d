// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Remote procedure calls over SIF commands.
//!
//! # Client side
//!
//! A client record is bound to a server id on the peer with
//! [`KernelState::bind_rpc`], then issues calls with
//! [`KernelState::call_rpc`]. Each request occupies one packet slot of the
//! client pool; the slot is tagged with a non-zero packet id while in use and
//! released when the peer's END packet arrives.
//!
//! ```text
//! Free -> Reserved(pid) -> Sent -> END received -> Free
//! ```
//!
//! # Server side
//!
//! Servers are registered on a queue. A CALL from the peer is appended to
//! the queue of the addressed server; the owner of the queue pops requests
//! with [`KernelState::get_next_request`] and runs them with
//! [`KernelState::exec_request`], which sends the reply data and the END
//! packet in one burst. END packets come from a separate ring of packets that
//! is reused round robin.
//!
//! # Waiting
//!
//! There is one cooperative thread. Operations that wait (a synchronous
//! bind or call, a reply that does not fit the send ring) call the
//! caller's idle hook until the condition holds. There is no timeout.
//!
//! Command handlers run with interrupts masked and never wait. An END they
//! cannot queue is parked and goes out from the next send completion.


mod exports;

pub(crate) use exports::library as export_library;

use alloc::collections::VecDeque;
use alloc::vec::Vec;
use core::fmt;

use iop_abi::errno::KE_ERROR;
use iop_abi::layout::RPC_PACKET_SIZE;
use iop_abi::rpc::{
    BIND_PACKET_SIZE, BindPacket, CALL_PACKET_SIZE, CallPacket, END_PACKET_SIZE, EndPacket,
    MODE_NOWAIT, RDATA_PACKET_SIZE, RPCE_GETP, RPCE_SENDP, RdataPacket, RpcHeader,
};
use iop_abi::sif::{CMD_RPC_BIND, CMD_RPC_CALL, CMD_RPC_END, CMD_RPC_RDATA};
use iop_abi::{Addr, PacketId};
use tracing::{debug, trace, warn};

use crate::arena::{Arena, Key};
use crate::config::KernelConfig;
use crate::error::{ErrorKind, MemoryFault};
use crate::kernel::KernelState;
use crate::sifcmd::{ExtraData, SifError};
use crate::sysmem::AllocStrategy;

/// Offset of the packet id inside a packet slot.
const PID_OFFSET: u32 = 16;

/// Maximum number of client, server or queue records.
const RECORD_CAPACITY: usize = 256;

/// Server function.
///
/// Receives the function number, the server's receive buffer and the size
/// of the argument data in it. Returns the address of the reply data, which
/// is sent back if the caller asked for a reply.
pub type ServerFn = fn(&mut KernelState, u32, Addr, u32) -> Option<Addr>;

/// Callback run on the client when a call completes.
pub type EndFn = fn(&mut KernelState, u32);

/// Idle hook run while waiting for the peer.
pub type Idle<'a> = &'a mut dyn FnMut(&mut KernelState);

// =============================================================================
// Errors
// =============================================================================

/// RPC failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcError {
    /// Every packet slot is in use.
    NoPacket,
    /// The packet could not be queued for sending.
    Send(SifError),
    /// The client still waits for a previous request.
    ClientBusy,
    /// The client is not bound to a server.
    NotBound,
    /// No such client record.
    UnknownClient,
    /// No such server record.
    UnknownServer,
    /// No such queue.
    UnknownQueue,
    /// Record table full.
    TableFull,
    /// No memory for the packet pools.
    NoMemory(u32),
    /// Packet memory out of range.
    Memory(MemoryFault),
}

impl RpcError {
    /// Error class.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NoPacket | Self::TableFull | Self::NoMemory(_) => ErrorKind::ResourceExhausted,
            Self::Send(e) => e.kind(),
            Self::ClientBusy | Self::NotBound => ErrorKind::Argument,
            Self::UnknownClient | Self::UnknownServer | Self::UnknownQueue => ErrorKind::NotFound,
            Self::Memory(e) => e.kind(),
        }
    }

    /// Kernel status code.
    #[must_use]
    pub const fn code(&self) -> i32 {
        match self {
            Self::NoPacket => -RPCE_GETP,
            Self::Send(_) => -RPCE_SENDP,
            Self::Memory(e) => e.code(),
            Self::ClientBusy
            | Self::NotBound
            | Self::UnknownClient
            | Self::UnknownServer
            | Self::UnknownQueue
            | Self::TableFull
            | Self::NoMemory(_) => KE_ERROR,
        }
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoPacket => write!(f, "no free packet"),
            Self::Send(e) => write!(f, "send failed: {e}"),
            Self::ClientBusy => write!(f, "client busy"),
            Self::NotBound => write!(f, "client not bound"),
            Self::UnknownClient => write!(f, "unknown client"),
            Self::UnknownServer => write!(f, "unknown server"),
            Self::UnknownQueue => write!(f, "unknown queue"),
            Self::TableFull => write!(f, "record table full"),
            Self::NoMemory(size) => write!(f, "no memory for {size} bytes of packets"),
            Self::Memory(e) => write!(f, "{e}"),
        }
    }
}

impl From<SifError> for RpcError {
    fn from(e: SifError) -> Self {
        Self::Send(e)
    }
}

impl From<MemoryFault> for RpcError {
    fn from(e: MemoryFault) -> Self {
        Self::Memory(e)
    }
}

// =============================================================================
// Handles
// =============================================================================

macro_rules! handle {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(Key);

        impl $name {
            /// Packs the handle for the wire.
            #[must_use]
            pub const fn as_u32(self) -> u32 {
                self.0.to_u32()
            }

            /// Unpacks a handle; zero is never valid.
            #[must_use]
            pub const fn from_u32(raw: u32) -> Option<Self> {
                match Key::from_u32(raw) {
                    Some(key) => Some(Self(key)),
                    None => None,
                }
            }
        }
    };
}

handle!(
    /// Client record handle.
    ClientId
);
handle!(
    /// Server record handle.
    ServerId
);
handle!(
    /// Server queue handle.
    QueueId
);

// =============================================================================
// Records
// =============================================================================

struct Client {
    /// Command waiting for END, zero when idle.
    command: u32,
    /// Server handle on the peer, zero while unbound.
    server: u32,
    buff: Addr,
    cbuff: Addr,
    end: Option<(EndFn, u32)>,
}

struct Server {
    sid: u32,
    func: ServerFn,
    buff: Addr,
    cbuff: Addr,
    queue: QueueId,
}

struct Queue {
    servers: Vec<ServerId>,
    pending: VecDeque<Request>,
}

/// A call waiting on a server queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request {
    /// Server the call is for.
    pub server: ServerId,
    /// Function number.
    pub rpc_number: u32,
    /// Size of the argument data in the server's receive buffer.
    pub size: u32,
    /// Reply buffer in the caller's memory.
    pub recv_addr: Addr,
    /// Reply buffer size.
    pub recv_size: u32,
    /// Call mode bits.
    pub mode: u32,
    client: u32,
    packet_id: PacketId,
    packet_addr: Addr,
}

/// Parameters of one call.
#[derive(Debug, Clone, Copy)]
pub struct RpcCall {
    rpc_number: u32,
    mode: u32,
    send: Addr,
    send_size: u32,
    recv: Addr,
    recv_size: u32,
    end: Option<(EndFn, u32)>,
}

impl RpcCall {
    /// Call of function `rpc_number` without data.
    #[must_use]
    pub const fn new(rpc_number: u32) -> Self {
        Self {
            rpc_number,
            mode: 0,
            send: Addr::null(),
            send_size: 0,
            recv: Addr::null(),
            recv_size: 0,
            end: None,
        }
    }

    /// Sends `size` bytes at `addr` into the server's receive buffer.
    #[must_use]
    pub const fn send(mut self, addr: Addr, size: u32) -> Self {
        self.send = addr;
        self.send_size = size;
        self
    }

    /// Receives up to `size` bytes of reply at `addr`.
    #[must_use]
    pub const fn receive(mut self, addr: Addr, size: u32) -> Self {
        self.recv = addr;
        self.recv_size = size;
        self
    }

    /// Returns as soon as the request is queued.
    #[must_use]
    pub const fn nowait(mut self) -> Self {
        self.mode |= MODE_NOWAIT;
        self
    }

    /// Runs `f(arg)` when the END packet arrives.
    #[must_use]
    pub const fn on_end(mut self, f: EndFn, arg: u32) -> Self {
        self.end = Some((f, arg));
        self
    }
}

/// RPC layer state.
pub struct RpcState {
    initialized: bool,
    pool: Option<Addr>,
    packets: u32,
    next_pid: PacketId,
    free_pool: Option<Addr>,
    free_packets: u32,
    free_next: u32,
    queue_depth: usize,
    clients: Arena<Client>,
    servers: Arena<Server>,
    queues: Arena<Queue>,
    /// Queues in creation order, the order binds search them in.
    queue_order: Vec<QueueId>,
    /// END packets from command handlers waiting for room in the send ring.
    deferred: VecDeque<(Addr, Option<ExtraData>)>,
}

impl RpcState {
    /// Creates empty tables; packet pools are allocated by
    /// [`KernelState::rpc_init`].
    #[must_use]
    pub fn new(config: &KernelConfig) -> Self {
        Self {
            initialized: false,
            pool: None,
            packets: u32::try_from(config.rpc_packets).unwrap_or(u32::MAX),
            next_pid: PacketId::new(1),
            free_pool: None,
            free_packets: u32::try_from(config.rpc_free_packets)
                .unwrap_or(u32::MAX)
                .max(1),
            free_next: 0,
            queue_depth: config.rpc_queue_depth,
            clients: Arena::with_capacity(RECORD_CAPACITY),
            servers: Arena::with_capacity(RECORD_CAPACITY),
            queues: Arena::with_capacity(RECORD_CAPACITY),
            queue_order: Vec::new(),
            deferred: VecDeque::new(),
        }
    }

    fn find_server(&self, sid: u32) -> Option<(ServerId, &Server)> {
        self.queue_order
            .iter()
            .filter_map(|&q| self.queues.get(q.0))
            .flat_map(|queue| queue.servers.iter())
            .find_map(|&id| {
                self.servers
                    .get(id.0)
                    .filter(|s| s.sid == sid)
                    .map(|s| (id, s))
            })
    }
}

// =============================================================================
// Kernel Operations
// =============================================================================

impl KernelState {
    /// Allocates the packet pools and installs the RPC command handlers.
    pub fn rpc_init(&mut self) -> Result<(), RpcError> {
        if self.rpc.initialized {
            return Ok(());
        }
        self.sif_cmd_init()?;
        let pool_size = self.rpc.packets.max(1) * RPC_PACKET_SIZE;
        let free_size = self.rpc.free_packets * RPC_PACKET_SIZE;
        let pool = self
            .alloc_sys_memory(AllocStrategy::First, pool_size)
            .map_err(|_| RpcError::NoMemory(pool_size))?;
        let free_pool = match self.alloc_sys_memory(AllocStrategy::First, free_size) {
            Ok(addr) => addr,
            Err(_) => {
                // Just allocated, so the free cannot fail.
                let _ = self.free_sys_memory(pool);
                return Err(RpcError::NoMemory(free_size));
            }
        };
        self.memory_mut().fill(pool, pool_size, 0)?;
        self.memory_mut().fill(free_pool, free_size, 0)?;
        self.rpc.pool = Some(pool);
        self.rpc.free_pool = Some(free_pool);

        self.add_cmd_handler(CMD_RPC_END, on_end, 0)?;
        self.add_cmd_handler(CMD_RPC_BIND, on_bind, 0)?;
        self.add_cmd_handler(CMD_RPC_CALL, on_call, 0)?;
        self.add_cmd_handler(CMD_RPC_RDATA, on_rdata, 0)?;
        self.rpc.initialized = true;
        debug!(%pool, packets = self.rpc.packets, "sif rpc initialised");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Packets
    // -------------------------------------------------------------------------

    /// Reserves a client packet slot and tags it with a fresh packet id.
    fn alloc_packet(&mut self) -> Result<(Addr, PacketId), RpcError> {
        let pool = self.rpc.pool.ok_or(RpcError::NoPacket)?;
        self.critical(|k| {
            for slot in 0..k.rpc.packets {
                let addr = pool + slot * RPC_PACKET_SIZE;
                if k.memory().read_u32(addr + PID_OFFSET)? != 0 {
                    continue;
                }
                let pid = k.rpc.next_pid;
                k.rpc.next_pid = pid.next();
                k.memory_mut().fill(addr, RPC_PACKET_SIZE, 0)?;
                k.memory_mut().write_u32(addr + PID_OFFSET, pid.as_u32())?;
                return Ok((addr, pid));
            }
            Err(RpcError::NoPacket)
        })
    }

    fn free_packet(&mut self, addr: Addr) {
        let in_pool = self.rpc.pool.is_some_and(|pool| {
            addr >= pool && addr.diff(pool) < self.rpc.packets * RPC_PACKET_SIZE
        });
        if !in_pool {
            warn!(%addr, "END for a packet outside the pool");
            return;
        }
        if let Err(e) = self.memory_mut().write_u32(addr + PID_OFFSET, 0) {
            warn!(%addr, error = %e, "packet not released");
        }
    }

    /// Next packet of the reply ring.
    fn next_free_packet(&mut self) -> Result<Addr, RpcError> {
        let pool = self.rpc.free_pool.ok_or(RpcError::NoPacket)?;
        let slot = self.rpc.free_next;
        self.rpc.free_next = (slot + 1) % self.rpc.free_packets;
        Ok(pool + slot * RPC_PACKET_SIZE)
    }

    /// Packet id of the client packet at `addr`, zero when the slot is free.
    pub fn rpc_packet_id(&self, addr: Addr) -> Result<PacketId, MemoryFault> {
        Ok(PacketId::new(self.memory().read_u32(addr + PID_OFFSET)?))
    }

    // -------------------------------------------------------------------------
    // Client
    // -------------------------------------------------------------------------

    /// Creates an unbound client record.
    pub fn new_client(&mut self) -> Result<ClientId, RpcError> {
        let client = Client {
            command: 0,
            server: 0,
            buff: Addr::null(),
            cbuff: Addr::null(),
            end: None,
        };
        self.rpc
            .clients
            .insert(client)
            .map(ClientId)
            .map_err(|_| RpcError::TableFull)
    }

    /// Checks if the client waits for an END packet.
    #[must_use]
    pub fn check_stat(&self, client: ClientId) -> bool {
        self.rpc
            .clients
            .get(client.0)
            .is_some_and(|c| c.command != 0)
    }

    /// Checks if the client is bound to a server.
    #[must_use]
    pub fn client_bound(&self, client: ClientId) -> bool {
        self.rpc.clients.get(client.0).is_some_and(|c| c.server != 0)
    }

    /// Binds `client` to server id `sid` on the peer.
    ///
    /// Without [`MODE_NOWAIT`] the call runs `idle` until the END packet
    /// arrives. A bind that finds no server leaves the client unbound.
    pub fn bind_rpc(
        &mut self,
        client: ClientId,
        sid: u32,
        mode: u32,
        idle: Idle<'_>,
    ) -> Result<(), RpcError> {
        self.ready_client(client)?;
        let (addr, pid) = self.alloc_packet()?;
        let packet = BindPacket {
            header: RpcHeader::new(CMD_RPC_BIND, BIND_PACKET_SIZE, pid, addr),
            client: client.as_u32(),
            sid,
        };
        packet.encode(self.memory_mut().slice_mut(addr, RPC_PACKET_SIZE)?);
        self.submit(client, CMD_RPC_BIND, addr, BIND_PACKET_SIZE, None, None)?;
        trace!(sid, pid = pid.as_u32(), "rpc bind sent");
        if mode & MODE_NOWAIT == 0 {
            self.wait_client(client, idle);
        }
        Ok(())
    }

    /// Calls a function on the bound server.
    ///
    /// Without [`RpcCall::nowait`] the call runs `idle` until the END packet
    /// arrives and the reply is in place.
    pub fn call_rpc(
        &mut self,
        client: ClientId,
        call: &RpcCall,
        idle: Idle<'_>,
    ) -> Result<(), RpcError> {
        let (server, buff) = self.ready_client(client)?;
        if server == 0 {
            return Err(RpcError::NotBound);
        }
        let (addr, pid) = self.alloc_packet()?;
        let packet = CallPacket {
            header: RpcHeader::new(CMD_RPC_CALL, CALL_PACKET_SIZE, pid, addr),
            client: client.as_u32(),
            rpc_number: call.rpc_number,
            send_size: call.send_size,
            recv_addr: call.recv,
            recv_size: call.recv_size,
            mode: call.mode,
            server,
        };
        packet.encode(self.memory_mut().slice_mut(addr, RPC_PACKET_SIZE)?);
        let extra = ExtraData {
            src: call.send,
            dest: buff,
            size: call.send_size,
        };
        self.submit(client, CMD_RPC_CALL, addr, CALL_PACKET_SIZE, Some(extra), call.end)?;
        trace!(rpc_number = call.rpc_number, pid = pid.as_u32(), "rpc call sent");
        if call.mode & MODE_NOWAIT == 0 {
            self.wait_client(client, idle);
        }
        Ok(())
    }

    /// Asks the peer to send `size` bytes at its address `src` to local
    /// address `dest`.
    pub fn get_other_data(
        &mut self,
        client: ClientId,
        src: Addr,
        dest: Addr,
        size: u32,
        mode: u32,
        idle: Idle<'_>,
    ) -> Result<(), RpcError> {
        self.ready_client(client)?;
        let (addr, pid) = self.alloc_packet()?;
        let packet = RdataPacket {
            header: RpcHeader::new(CMD_RPC_RDATA, RDATA_PACKET_SIZE, pid, addr),
            client: client.as_u32(),
            src,
            dest,
            size,
        };
        packet.encode(self.memory_mut().slice_mut(addr, RPC_PACKET_SIZE)?);
        self.submit(client, CMD_RPC_RDATA, addr, RDATA_PACKET_SIZE, None, None)?;
        if mode & MODE_NOWAIT == 0 {
            self.wait_client(client, idle);
        }
        Ok(())
    }

    /// Checks the client can take a request; returns its server handle and
    /// receive buffer.
    fn ready_client(&self, client: ClientId) -> Result<(u32, Addr), RpcError> {
        let record = self
            .rpc
            .clients
            .get(client.0)
            .ok_or(RpcError::UnknownClient)?;
        if record.command != 0 {
            return Err(RpcError::ClientBusy);
        }
        Ok((record.server, record.buff))
    }

    /// Marks the client busy and sends its packet; undoes both on failure.
    fn submit(
        &mut self,
        client: ClientId,
        command: u32,
        packet: Addr,
        size: usize,
        extra: Option<ExtraData>,
        end: Option<(EndFn, u32)>,
    ) -> Result<(), RpcError> {
        if let Some(record) = self.rpc.clients.get_mut(client.0) {
            record.command = command;
            record.end = end;
        }
        if let Err(e) = self.send_cmd(command, packet, size as u32, extra) {
            if let Some(record) = self.rpc.clients.get_mut(client.0) {
                record.command = 0;
                record.end = None;
            }
            self.free_packet(packet);
            return Err(e.into());
        }
        Ok(())
    }

    fn wait_client(&mut self, client: ClientId, idle: Idle<'_>) {
        while self.check_stat(client) {
            idle(self);
        }
    }

    // -------------------------------------------------------------------------
    // Server
    // -------------------------------------------------------------------------

    /// Creates an empty server queue.
    pub fn set_rpc_queue(&mut self) -> Result<QueueId, RpcError> {
        let queue = Queue {
            servers: Vec::new(),
            pending: VecDeque::new(),
        };
        let id = self
            .rpc
            .queues
            .insert(queue)
            .map(QueueId)
            .map_err(|_| RpcError::TableFull)?;
        self.rpc.queue_order.push(id);
        Ok(id)
    }

    /// Registers server id `sid` on `queue`.
    ///
    /// Argument data of calls lands in `buff`; `cbuff` is handed to clients
    /// on bind.
    pub fn register_rpc(
        &mut self,
        queue: QueueId,
        sid: u32,
        func: ServerFn,
        buff: Addr,
        cbuff: Addr,
    ) -> Result<ServerId, RpcError> {
        if !self.rpc.queues.contains(queue.0) {
            return Err(RpcError::UnknownQueue);
        }
        let server = Server {
            sid,
            func,
            buff,
            cbuff,
            queue,
        };
        self.critical(|k| {
            let id = k
                .rpc
                .servers
                .insert(server)
                .map(ServerId)
                .map_err(|_| RpcError::TableFull)?;
            if let Some(q) = k.rpc.queues.get_mut(queue.0) {
                q.servers.push(id);
            }
            debug!(sid, %buff, "rpc server registered");
            Ok(id)
        })
    }

    /// Unregisters a server and drops its pending calls.
    pub fn remove_rpc(&mut self, server: ServerId) -> Result<(), RpcError> {
        self.critical(|k| {
            let record = k
                .rpc
                .servers
                .remove(server.0)
                .ok_or(RpcError::UnknownServer)?;
            if let Some(q) = k.rpc.queues.get_mut(record.queue.0) {
                q.servers.retain(|&s| s != server);
                q.pending.retain(|r| r.server != server);
            }
            debug!(sid = record.sid, "rpc server removed");
            Ok(())
        })
    }

    /// Removes a queue and every server registered on it.
    pub fn remove_rpc_queue(&mut self, queue: QueueId) -> Result<(), RpcError> {
        self.critical(|k| {
            let record = k
                .rpc
                .queues
                .remove(queue.0)
                .ok_or(RpcError::UnknownQueue)?;
            for server in record.servers {
                k.rpc.servers.remove(server.0);
            }
            k.rpc.queue_order.retain(|&q| q != queue);
            Ok(())
        })
    }

    /// Pops the oldest call waiting on `queue`.
    pub fn get_next_request(&mut self, queue: QueueId) -> Option<Request> {
        self.critical(|k| k.rpc.queues.get_mut(queue.0)?.pending.pop_front())
    }

    /// Runs a call and sends the reply.
    ///
    /// The reply data, if the caller wants any, and the END packet go out as
    /// one burst. If the send ring is full, `idle` runs until it takes the
    /// burst.
    pub fn exec_request(&mut self, request: &Request, idle: Idle<'_>) -> Result<(), RpcError> {
        let server = self
            .rpc
            .servers
            .get(request.server.0)
            .ok_or(RpcError::UnknownServer)?;
        let (func, buff, cbuff) = (server.func, server.buff, server.cbuff);
        let reply = func(self, request.rpc_number, buff, request.size);

        let end = EndPacket {
            header: RpcHeader::new(
                CMD_RPC_END,
                END_PACKET_SIZE,
                request.packet_id,
                request.packet_addr,
            ),
            client: request.client,
            command: CMD_RPC_CALL,
            server: request.server.as_u32(),
            buff,
            cbuff,
        };
        let extra = reply
            .filter(|_| request.recv_size > 0 && !request.recv_addr.is_null())
            .map(|src| ExtraData {
                src,
                dest: request.recv_addr,
                size: request.recv_size,
            });
        self.send_end(&end, extra, idle)
    }

    /// Executes every call waiting on `queue`; returns how many ran.
    pub fn serve_pending(&mut self, queue: QueueId, idle: Idle<'_>) -> Result<usize, RpcError> {
        let mut served = 0;
        while let Some(request) = self.get_next_request(queue) {
            self.exec_request(&request, idle)?;
            served += 1;
        }
        Ok(served)
    }

    /// Sends an END packet from the reply ring, retrying while the send ring
    /// is full.
    fn send_end(
        &mut self,
        end: &EndPacket,
        extra: Option<ExtraData>,
        idle: Idle<'_>,
    ) -> Result<(), RpcError> {
        let addr = self.next_free_packet()?;
        end.encode(self.memory_mut().slice_mut(addr, RPC_PACKET_SIZE)?);
        loop {
            match self.send_cmd(CMD_RPC_END, addr, END_PACKET_SIZE as u32, extra) {
                Ok(_) => return Ok(()),
                Err(SifError::RingFull) => idle(self),
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Sends an END packet from a command handler.
    ///
    /// If the send ring is full, or earlier replies still wait, the packet is
    /// parked until [`Self::flush_deferred_replies`] finds room for it.
    fn send_end_deferred(
        &mut self,
        end: &EndPacket,
        extra: Option<ExtraData>,
    ) -> Result<(), RpcError> {
        let addr = self.next_free_packet()?;
        if self.rpc.deferred.iter().any(|&(parked, _)| parked == addr) {
            return Err(RpcError::NoPacket);
        }
        end.encode(self.memory_mut().slice_mut(addr, RPC_PACKET_SIZE)?);
        if self.rpc.deferred.is_empty() {
            match self.send_cmd(CMD_RPC_END, addr, END_PACKET_SIZE as u32, extra) {
                Ok(_) => return Ok(()),
                Err(SifError::RingFull) => {}
                Err(e) => return Err(e.into()),
            }
        }
        self.rpc.deferred.push_back((addr, extra));
        trace!(%addr, parked = self.rpc.deferred.len(), "rpc END parked");
        Ok(())
    }

    /// Queues parked END packets, oldest first, while the send ring has
    /// room. Runs from the send completion interrupt.
    pub(crate) fn flush_deferred_replies(&mut self) {
        while let Some(&(addr, extra)) = self.rpc.deferred.front() {
            match self.send_cmd(CMD_RPC_END, addr, END_PACKET_SIZE as u32, extra) {
                Ok(_) => {}
                Err(SifError::RingFull) => return,
                Err(e) => warn!(%addr, error = %e, "parked rpc END dropped"),
            }
            self.rpc.deferred.pop_front();
        }
    }

    /// Number of END packets waiting for room in the send ring.
    #[must_use]
    pub fn deferred_replies(&self) -> usize {
        self.rpc.deferred.len()
    }
}

// =============================================================================
// Command Handlers
// =============================================================================

/// END: a bind, call or data request of ours completed.
fn on_end(k: &mut KernelState, packet: &[u8], _arg: u32) {
    let Some(end) = EndPacket::decode(packet) else {
        return;
    };
    let Some(client) = ClientId::from_u32(end.client) else {
        warn!(client = end.client, "rpc END for an invalid client");
        return;
    };
    let callback = match k.rpc.clients.get_mut(client.0) {
        Some(record) => {
            if end.command == CMD_RPC_BIND {
                record.server = end.server;
                record.buff = end.buff;
                record.cbuff = end.cbuff;
            }
            record.command = 0;
            record.end.take()
        }
        None => {
            warn!(client = end.client, "rpc END for an unknown client");
            None
        }
    };
    k.free_packet(end.header.packet_addr);
    trace!(pid = end.header.packet_id.as_u32(), command = end.command, "rpc END");
    if let Some((f, arg)) = callback {
        f(k, arg);
    }
}

/// BIND: look up the server id and reply with its buffers.
fn on_bind(k: &mut KernelState, packet: &[u8], _arg: u32) {
    let Some(bind) = BindPacket::decode(packet) else {
        return;
    };
    let (server, buff, cbuff) = match k.rpc.find_server(bind.sid) {
        Some((id, s)) => (id.as_u32(), s.buff, s.cbuff),
        None => {
            debug!(sid = bind.sid, "rpc bind to unknown server id");
            (0, Addr::null(), Addr::null())
        }
    };
    let end = EndPacket {
        header: RpcHeader::new(
            CMD_RPC_END,
            END_PACKET_SIZE,
            bind.header.packet_id,
            bind.header.packet_addr,
        ),
        client: bind.client,
        command: CMD_RPC_BIND,
        server,
        buff,
        cbuff,
    };
    if let Err(e) = k.send_end_deferred(&end, None) {
        warn!(error = %e, "rpc bind reply not sent");
    }
}

/// CALL: queue the request on the server's queue.
fn on_call(k: &mut KernelState, packet: &[u8], _arg: u32) {
    let Some(call) = CallPacket::decode(packet) else {
        return;
    };
    let Some(server) = ServerId::from_u32(call.server) else {
        warn!(server = call.server, "rpc call for an invalid server");
        return;
    };
    let Some(queue) = k.rpc.servers.get(server.0).map(|s| s.queue) else {
        warn!(server = call.server, "rpc call for an unknown server");
        return;
    };
    let request = Request {
        server,
        rpc_number: call.rpc_number,
        size: call.send_size,
        recv_addr: call.recv_addr,
        recv_size: call.recv_size,
        mode: call.mode,
        client: call.client,
        packet_id: call.header.packet_id,
        packet_addr: call.header.packet_addr,
    };
    let depth = k.rpc.queue_depth;
    let Some(q) = k.rpc.queues.get_mut(queue.0) else {
        return;
    };
    if q.pending.len() >= depth {
        warn!(
            server = call.server,
            rpc_number = call.rpc_number,
            "rpc queue full, request dropped"
        );
        return;
    }
    q.pending.push_back(request);
}

/// RDATA: send a block of our memory back with the END packet.
fn on_rdata(k: &mut KernelState, packet: &[u8], _arg: u32) {
    let Some(rdata) = RdataPacket::decode(packet) else {
        return;
    };
    let end = EndPacket {
        header: RpcHeader::new(
            CMD_RPC_END,
            END_PACKET_SIZE,
            rdata.header.packet_id,
            rdata.header.packet_addr,
        ),
        client: rdata.client,
        command: CMD_RPC_RDATA,
        server: 0,
        buff: Addr::null(),
        cbuff: Addr::null(),
    };
    let extra = ExtraData {
        src: rdata.src,
        dest: rdata.dest,
        size: rdata.size,
    };
    if let Err(e) = k.send_end_deferred(&end, Some(extra)) {
        warn!(error = %e, "rpc data reply not sent");
    }
}
