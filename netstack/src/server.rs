//! Passive-open transport endpoint for one local port.
//!
//! The [`Server`] is the transport layer's [`SegmentReceiver`].  For every
//! segment the network layer delivers it:
//! 1. parses the header and ignores other ports;
//! 2. verifies the pseudo-header checksum (unless configured not to);
//! 3. on SYN, creates a fresh [`Connection`], answers SYN+ACK and runs the
//!    accept callback;
//! 4. otherwise hands the segment to the matching connection, or logs and
//!    drops it when the four-tuple is unknown.
//!
//! The server owns the connection table and the timer queue.  A connection
//! leaves the table only when it is closed, and its timer is cancelled
//! before it goes.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::time::Instant;

use rand::Rng;

use crate::connection::{Connection, ConnectionHandle, ConnectionId, DEFAULT_MSS};
use crate::network::{SegmentReceiver, SegmentSender};
use crate::state::ConnectionState;
use crate::timer::{Scheduler, TimerQueue};
use crate::wire::{flags, transport_checksum, TcpHeader};

/// Called once for every accepted SYN, after the SYN+ACK has been sent.
pub type AcceptCallback = Box<dyn FnMut(&mut ConnectionHandle<'_>)>;

pub struct Server {
    port: u16,
    mss: usize,
    ignore_checksum: bool,
    connections: HashMap<ConnectionId, Connection>,
    timers: TimerQueue<ConnectionId>,
    on_accept: Option<AcceptCallback>,
}

impl Server {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            mss: DEFAULT_MSS,
            ignore_checksum: false,
            connections: HashMap::new(),
            timers: TimerQueue::new(),
            on_accept: None,
        }
    }

    pub fn with_mss(mut self, mss: usize) -> Self {
        self.mss = mss.max(1);
        self
    }

    pub fn with_ignore_checksum(mut self, ignore: bool) -> Self {
        self.ignore_checksum = ignore;
        self
    }

    /// Use `timers` instead of a queue started at construction time.
    pub fn with_timers(mut self, timers: TimerQueue<ConnectionId>) -> Self {
        self.timers = timers;
        self
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Register the callback run for each new connection.
    pub fn on_accept<F>(&mut self, callback: F)
    where
        F: FnMut(&mut ConnectionHandle<'_>) + 'static,
    {
        self.on_accept = Some(Box::new(callback));
    }

    pub fn connection(&self, id: &ConnectionId) -> Option<&Connection> {
        self.connections.get(id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Run `f` against the live connection `id`, sending through `out`.
    ///
    /// Returns `None` if no such connection exists.  If `f` closes the
    /// connection it is removed before this returns.
    pub fn with_connection<R>(
        &mut self,
        id: ConnectionId,
        out: &mut dyn SegmentSender,
        f: impl FnOnce(&mut ConnectionHandle<'_>) -> R,
    ) -> Option<R> {
        let conn = self.connections.get_mut(&id)?;
        let result = f(&mut ConnectionHandle::new(conn, out, &mut self.timers));
        self.reap(id);
        Some(result)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    /// Fire every connection timer due by `now`.
    ///
    /// Timers whose connection has gone, or which were re-armed since, are
    /// ignored.
    pub fn expire_timers(&mut self, now: Instant, out: &mut dyn SegmentSender) {
        for (fired, id) in self.timers.expire(now) {
            let Some(conn) = self.connections.get_mut(&id) else {
                continue;
            };
            if conn.timer != Some(fired) {
                continue;
            }
            conn.timer = None;
            ConnectionHandle::new(conn, &mut *out, &mut self.timers).fire_timeout();
            self.reap(id);
        }
    }

    /// Remove `id` from the table if its connection has been closed.
    fn reap(&mut self, id: ConnectionId) {
        let closed = self
            .connections
            .get(&id)
            .is_some_and(|conn| conn.state == ConnectionState::Closed);
        if !closed {
            return;
        }
        if let Some(conn) = self.connections.remove(&id) {
            if let Some(timer) = conn.timer {
                self.timers.cancel(timer);
            }
            log::debug!("[tcp] {id} removed; {} connection(s) left", self.connections.len());
        }
    }

    fn accept(
        &mut self,
        id: ConnectionId,
        header: &TcpHeader,
        out: &mut dyn SegmentSender,
    ) {
        if let Some(old) = self.connections.remove(&id) {
            if let Some(timer) = old.timer {
                self.timers.cancel(timer);
            }
            log::info!("[tcp] {id} repeated SYN; replacing connection");
        }

        let isn = u32::from(rand::rng().random::<u16>());
        let mut conn = Connection::new(id, isn, header.seq, self.mss);
        if let Err(e) = conn.transmit(out, flags::SYN | flags::ACK, &[]) {
            log::warn!("[tcp] {id} could not answer SYN: {e}");
            return;
        }
        // The SYN+ACK consumes one of our sequence numbers.
        conn.seq_no = conn.seq_no.wrapping_add(1);
        log::info!("[tcp] {id} accepted (isn={isn})");

        let conn = self.connections.entry(id).or_insert(conn);
        if let Some(callback) = self.on_accept.as_mut() {
            callback(&mut ConnectionHandle::new(conn, out, &mut self.timers));
        }
        self.reap(id);
    }
}

impl SegmentReceiver for Server {
    fn receive_segment(
        &mut self,
        src: Ipv4Addr,
        dst: Ipv4Addr,
        segment: &[u8],
        out: &mut dyn SegmentSender,
    ) {
        let (header, payload) = match TcpHeader::parse(segment) {
            Ok(parsed) => parsed,
            Err(e) => {
                log::warn!("[tcp] dropping malformed segment from {src}: {e}");
                return;
            }
        };
        if header.dst_port != self.port {
            return;
        }
        if !self.ignore_checksum && transport_checksum(segment, src, dst) != 0 {
            log::warn!("[tcp] dropping segment from {src}:{} with bad checksum", header.src_port);
            return;
        }

        let id = ConnectionId {
            peer_addr: src,
            peer_port: header.src_port,
            local_addr: dst,
            local_port: header.dst_port,
        };

        if header.has(flags::SYN) {
            self.accept(id, &header, out);
        } else if let Some(conn) = self.connections.get_mut(&id) {
            ConnectionHandle::new(conn, out, &mut self.timers).handle_segment(&header, payload);
            self.reap(id);
        } else {
            log::info!("[tcp] {id} (segment for unknown connection)");
        }
    }
}
