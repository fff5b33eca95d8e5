//! Per-connection state and the application-facing connection API.
//!
//! A [`Connection`] is created by [`crate::server::Server`] when a SYN
//! arrives and lives in that server's table until it is closed.  It tracks:
//! - `seq_no`: the next sequence number this side will send.
//! - `ack_no`: the next sequence number expected from the peer.
//! - The application's receive callback and optional timeout hook.
//! - At most one armed timer.
//!
//! Applications never hold a `Connection` directly.  Inside callbacks, and
//! through [`crate::stack::Stack::with_connection`], they get a
//! [`ConnectionHandle`]: the connection bound to the segment sender and timer
//! scheduler it needs to act.
//!
//! # Delivery policy
//!
//! Stop-and-wait, in order only: a segment is accepted iff its sequence
//! number equals `ack_no`.  Every accepted segment, a pure ACK included, is
//! handed to the receive callback and acknowledged.  Anything else is dropped
//! without buffering and without a duplicate ACK.  Retransmission is not implemented; the timer is
//! the hook where a policy would go.

use std::fmt;
use std::net::Ipv4Addr;
use std::time::Duration;

use thiserror::Error;

use crate::network::{NetworkError, SegmentSender};
use crate::state::ConnectionState;
use crate::timer::{Scheduler, TimerHandle};
use crate::wire::{flag_names, flags, TcpHeader};

/// Default maximum segment size: an Ethernet MTU minus IPv4 and TCP headers.
pub const DEFAULT_MSS: usize = 1460;

/// Called with each in-order segment's payload, which is empty for a pure ACK
/// or the peer's FIN.  [`ConnectionHandle::peer_finished`] tells the two apart.
pub type ReceiveCallback = Box<dyn FnMut(&mut ConnectionHandle<'_>, &[u8])>;

/// Called when the connection's timer fires.
pub type TimeoutCallback = Box<dyn FnMut(&mut ConnectionHandle<'_>)>;

/// Four-tuple identifying a connection, from this host's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId {
    pub peer_addr: Ipv4Addr,
    pub peer_port: u16,
    pub local_addr: Ipv4Addr,
    pub local_port: u16,
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} -> {}:{}",
            self.peer_addr, self.peer_port, self.local_addr, self.local_port
        )
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection {0} is closed")]
    Closed(ConnectionId),
    #[error(transparent)]
    Network(#[from] NetworkError),
}

pub struct Connection {
    pub(crate) id: ConnectionId,
    pub(crate) state: ConnectionState,
    pub(crate) seq_no: u32,
    pub(crate) ack_no: u32,
    pub(crate) mss: usize,
    pub(crate) timer: Option<TimerHandle>,
    fin_received: bool,
    on_receive: Option<ReceiveCallback>,
    on_timeout: Option<TimeoutCallback>,
}

impl Connection {
    /// A connection answering a SYN whose sequence number was `peer_seq`.
    ///
    /// `isn` becomes `seq_no`; the SYN consumes one peer sequence number, so
    /// `ack_no` starts at `peer_seq + 1`.
    pub(crate) fn new(id: ConnectionId, isn: u32, peer_seq: u32, mss: usize) -> Self {
        Self {
            id,
            state: ConnectionState::SynReceived,
            seq_no: isn,
            ack_no: peer_seq.wrapping_add(1),
            mss: mss.max(1),
            timer: None,
            fin_received: false,
            on_receive: None,
            on_timeout: None,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn seq_no(&self) -> u32 {
        self.seq_no
    }

    pub fn ack_no(&self) -> u32 {
        self.ack_no
    }

    pub fn timer(&self) -> Option<TimerHandle> {
        self.timer
    }

    /// Whether the peer's FIN has been accepted.
    pub fn peer_finished(&self) -> bool {
        self.fin_received
    }

    fn window(&self) -> u16 {
        (8 * self.mss).min(usize::from(u16::MAX)) as u16
    }

    /// Build a segment with the current numbers and send it to the peer.
    pub(crate) fn transmit(
        &self,
        out: &mut dyn SegmentSender,
        bits: u8,
        payload: &[u8],
    ) -> Result<(), NetworkError> {
        let header = TcpHeader::new(
            self.id.local_port,
            self.id.peer_port,
            self.seq_no,
            self.ack_no,
            bits,
            self.window(),
        );
        let segment = header.encode(payload, self.id.local_addr, self.id.peer_addr);
        out.send_segment(&segment, self.id.peer_addr)?;
        log::debug!(
            "[tcp {}] → {} seq={} ack={} len={}",
            self.id,
            flag_names(bits),
            self.seq_no,
            self.ack_no,
            payload.len()
        );
        Ok(())
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("seq_no", &self.seq_no)
            .field("ack_no", &self.ack_no)
            .field("timer", &self.timer)
            .finish_non_exhaustive()
    }
}

/// A [`Connection`] together with the means to send and arm timers.
pub struct ConnectionHandle<'a> {
    conn: &'a mut Connection,
    out: &'a mut dyn SegmentSender,
    timers: &'a mut dyn Scheduler<ConnectionId>,
}

impl<'a> ConnectionHandle<'a> {
    pub(crate) fn new(
        conn: &'a mut Connection,
        out: &'a mut dyn SegmentSender,
        timers: &'a mut dyn Scheduler<ConnectionId>,
    ) -> Self {
        Self { conn, out, timers }
    }

    pub fn id(&self) -> ConnectionId {
        self.conn.id
    }

    pub fn state(&self) -> ConnectionState {
        self.conn.state
    }

    pub fn seq_no(&self) -> u32 {
        self.conn.seq_no
    }

    pub fn ack_no(&self) -> u32 {
        self.conn.ack_no
    }

    /// True once the peer has sent FIN.  Inside a receive callback this
    /// distinguishes the end of the stream from a pure ACK.
    pub fn peer_finished(&self) -> bool {
        self.conn.fin_received
    }

    /// Register the callback for in-order data.  Replaces any previous one.
    pub fn on_receive<F>(&mut self, callback: F)
    where
        F: FnMut(&mut ConnectionHandle<'_>, &[u8]) + 'static,
    {
        self.conn.on_receive = Some(Box::new(callback));
    }

    /// Register the hook run when this connection's timer fires.
    pub fn on_timeout<F>(&mut self, callback: F)
    where
        F: FnMut(&mut ConnectionHandle<'_>) + 'static,
    {
        self.conn.on_timeout = Some(Box::new(callback));
    }

    /// Arm the connection's timer, replacing one already armed.
    pub fn set_timer(&mut self, delay: Duration) {
        self.cancel_timer();
        self.conn.timer = Some(self.timers.schedule(delay, self.conn.id));
    }

    /// Disarm the connection's timer.  Returns `false` if none was armed.
    pub fn cancel_timer(&mut self) -> bool {
        match self.conn.timer.take() {
            Some(handle) => self.timers.cancel(handle),
            None => false,
        }
    }

    /// Send `data` as consecutive MSS-sized segments and return how many
    /// were sent.
    ///
    /// The final segment carries whatever is left, so every byte goes out.
    /// Nothing waits for acknowledgement.
    pub fn send(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        if !self.conn.state.is_open() {
            return Err(TransportError::Closed(self.conn.id));
        }
        let mut segments = 0;
        for piece in data.chunks(self.conn.mss) {
            self.conn.transmit(self.out, flags::ACK, piece)?;
            self.conn.seq_no = self.conn.seq_no.wrapping_add(piece.len() as u32);
            segments += 1;
        }
        Ok(segments)
    }

    /// Send FIN and mark the connection closed.
    ///
    /// The timer is cancelled first.  The owning server drops the connection
    /// from its table as soon as control returns to it.  A failure to send
    /// the FIN is reported but the connection is closed regardless.
    pub fn close(&mut self) -> Result<(), TransportError> {
        if !self.conn.state.is_open() {
            return Err(TransportError::Closed(self.conn.id));
        }
        self.cancel_timer();
        self.conn.state = ConnectionState::Closed;
        let sent = self.conn.transmit(self.out, flags::FIN | flags::ACK, &[]);
        self.conn.seq_no = self.conn.seq_no.wrapping_add(1);
        log::info!("[tcp {}] closed", self.conn.id);
        sent.map_err(TransportError::from)
    }

    /// Apply one inbound segment already demultiplexed to this connection.
    pub(crate) fn handle_segment(&mut self, header: &TcpHeader, payload: &[u8]) {
        let id = self.conn.id;
        if !self.conn.state.is_open() {
            return;
        }
        if header.seq != self.conn.ack_no {
            log::debug!(
                "[tcp {id}] ← seq={} but expecting {}; dropped",
                header.seq,
                self.conn.ack_no
            );
            return;
        }

        if self.conn.state == ConnectionState::SynReceived && header.has(flags::ACK) {
            self.conn.state = ConnectionState::Established;
            log::info!("[tcp {id}] established");
        }

        let payload = if header.has(flags::FIN) {
            self.conn.fin_received = true;
            self.conn.ack_no = self.conn.ack_no.wrapping_add(1);
            &[][..]
        } else {
            payload
        };
        log::debug!(
            "[tcp {id}] ← {} seq={} len={}",
            flag_names(header.flags),
            header.seq,
            payload.len()
        );

        self.deliver(payload);
        self.conn.ack_no = self.conn.ack_no.wrapping_add(payload.len() as u32);

        if let Err(e) = self.conn.transmit(self.out, flags::ACK, &[]) {
            log::warn!("[tcp {id}] could not send ACK: {e}");
        }
    }

    fn deliver(&mut self, payload: &[u8]) {
        let Some(mut callback) = self.conn.on_receive.take() else {
            log::debug!("[tcp {}] no receiver; {} bytes discarded", self.conn.id, payload.len());
            return;
        };
        callback(self, payload);
        // The callback may have registered a replacement.
        if self.conn.on_receive.is_none() {
            self.conn.on_receive = Some(callback);
        }
    }

    /// Run the timeout hook, if any.
    pub(crate) fn fire_timeout(&mut self) {
        let Some(mut callback) = self.conn.on_timeout.take() else {
            log::debug!("[tcp {}] timer expired with no hook", self.conn.id);
            return;
        };
        callback(self);
        if self.conn.on_timeout.is_none() {
            self.conn.on_timeout = Some(callback);
        }
    }
}
