//! One complete stack instance: links, network layer and transport server.
//!
//! A [`Stack`] owns every table the three layers use, so independent
//! instances can run side by side in one process (a router and two hosts in
//! a test, for example).  All mutation goes through `&mut Stack`, one event
//! at a time:
//! - a raw block arriving from a neighbor ([`Stack::receive_bytes`]);
//! - a timer deadline passing ([`Stack::poll_timers`]);
//! - the application acting on a connection ([`Stack::with_connection`]).

use std::net::Ipv4Addr;
use std::time::Instant;

use crate::connection::{ConnectionHandle, ConnectionId, DEFAULT_MSS};
use crate::link::{ByteTransport, LinkError, LinkLayer, LinkStats};
use crate::network::{
    Disposition, NetworkError, NetworkLayer, Outbound, SegmentReceiver,
};
use crate::route::RoutingTable;
use crate::server::Server;
use crate::wire::DEFAULT_TTL;

/// Per-instance tunables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackConfig {
    /// Largest payload placed in one outbound segment.
    pub mss: usize,
    /// Accept datagrams and segments whose checksums do not verify.
    pub ignore_checksum: bool,
    /// TTL on datagrams this host originates.
    pub ttl: u8,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            mss: DEFAULT_MSS,
            ignore_checksum: false,
            ttl: DEFAULT_TTL,
        }
    }
}

pub struct Stack {
    config: StackConfig,
    link: LinkLayer,
    network: NetworkLayer,
    server: Option<Server>,
}

impl Default for Stack {
    fn default() -> Self {
        Self::new(StackConfig::default())
    }
}

impl Stack {
    pub fn new(config: StackConfig) -> Self {
        Self {
            config,
            link: LinkLayer::new(),
            network: NetworkLayer::new()
                .with_ignore_checksum(config.ignore_checksum)
                .with_ttl(config.ttl),
            server: None,
        }
    }

    // -----------------------------------------------------------------------
    // Configuration
    // -----------------------------------------------------------------------

    pub fn add_link(&mut self, neighbor: Ipv4Addr, transport: Box<dyn ByteTransport>) {
        self.link.add_link(neighbor, transport);
    }

    pub fn remove_link(&mut self, neighbor: Ipv4Addr) -> bool {
        self.link.remove_link(neighbor)
    }

    pub fn link_stats(&self, neighbor: Ipv4Addr) -> Option<LinkStats> {
        self.link.stats(neighbor)
    }

    pub fn set_local_address(&mut self, addr: Ipv4Addr) {
        self.network.set_local_address(addr);
    }

    pub fn set_routing_table(&mut self, routes: RoutingTable) {
        self.network.set_routing_table(routes);
    }

    /// Start accepting connections on `port`.
    ///
    /// A stack serves one port.  Listening again replaces the previous
    /// server and drops its connections.
    pub fn listen(&mut self, port: u16) -> &mut Server {
        let server = Server::new(port)
            .with_mss(self.config.mss)
            .with_ignore_checksum(self.config.ignore_checksum);
        if let Some(old) = self.server.take() {
            log::info!(
                "[tcp] listener on {} replaced by {port}; {} connection(s) dropped",
                old.port(),
                old.len()
            );
        }
        log::info!("[tcp] listening on port {port}");
        self.server.insert(server)
    }

    pub fn server(&self) -> Option<&Server> {
        self.server.as_ref()
    }

    // -----------------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------------

    /// Feed a raw block received from `neighbor` and process every datagram
    /// it completes.
    pub fn receive_bytes(
        &mut self,
        neighbor: Ipv4Addr,
        bytes: &[u8],
    ) -> Result<Vec<Disposition>, LinkError> {
        let datagrams = self.link.receive(neighbor, bytes)?;
        Ok(datagrams
            .iter()
            .map(|datagram| self.receive_datagram(datagram))
            .collect())
    }

    /// Process one already-deframed datagram.
    pub fn receive_datagram(&mut self, datagram: &[u8]) -> Disposition {
        let upper = self
            .server
            .as_mut()
            .map(|server| server as &mut dyn SegmentReceiver);
        self.network.receive(datagram, &mut self.link, upper)
    }

    /// Originate `segment` to `dst` from this host.
    pub fn send_segment(&mut self, segment: &[u8], dst: Ipv4Addr) -> Result<(), NetworkError> {
        self.network.send(&mut self.link, segment, dst)
    }

    /// Act on connection `id` from outside any callback.
    ///
    /// Returns `None` when nothing is listening or the connection is unknown.
    pub fn with_connection<R>(
        &mut self,
        id: ConnectionId,
        f: impl FnOnce(&mut ConnectionHandle<'_>) -> R,
    ) -> Option<R> {
        let server = self.server.as_mut()?;
        let mut out = Outbound {
            network: &self.network,
            link: &mut self.link,
        };
        server.with_connection(id, &mut out, f)
    }

    /// Earliest armed connection timer.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.server.as_ref().and_then(Server::next_deadline)
    }

    /// Fire every connection timer due by `now`.
    pub fn poll_timers(&mut self, now: Instant) {
        let Some(server) = self.server.as_mut() else {
            return;
        };
        let mut out = Outbound {
            network: &self.network,
            link: &mut self.link,
        };
        server.expire_timers(now, &mut out);
    }
}
