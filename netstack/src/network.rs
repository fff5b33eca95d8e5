//! IPv4-subset network layer.
//!
//! A [`NetworkLayer`] is a host and a router at the same time:
//! - Datagrams addressed to the configured local address are handed to the
//!   registered [`SegmentReceiver`] if they carry TCP.
//! - Everything else is forwarded: longest-prefix match picks the next hop,
//!   TTL is decremented, and the header is rebuilt with a fresh checksum.
//!
//! Outbound, [`NetworkLayer::send`] wraps a transport segment in a new header
//! and hands it to the link layer.  The transport reaches that path through
//! the [`SegmentSender`] capability so it never sees the link layer itself.
//!
//! Fragmentation and ICMP are not implemented: fragment fields are carried
//! through unchanged and expired datagrams are dropped silently.

use std::net::Ipv4Addr;

use thiserror::Error;

use crate::link::{DatagramSender, LinkError};
use crate::route::RoutingTable;
use crate::wire::{protocol, Ipv4Header, WireError, DEFAULT_TTL, IPV4_HEADER_LEN};

/// Largest transport segment that fits in one datagram.
pub const MAX_SEGMENT: usize = u16::MAX as usize - IPV4_HEADER_LEN;

/// Capability to send a transport segment to a destination host.
pub trait SegmentSender {
    fn send_segment(&mut self, segment: &[u8], dst: Ipv4Addr) -> Result<(), NetworkError>;
}

/// Upper-layer consumer of segments addressed to this host.
pub trait SegmentReceiver {
    /// `out` sends replies back down through the same network layer.
    fn receive_segment(
        &mut self,
        src: Ipv4Addr,
        dst: Ipv4Addr,
        segment: &[u8],
        out: &mut dyn SegmentSender,
    );
}

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("no route to {0}")]
    NoRoute(Ipv4Addr),
    #[error("local address is not configured")]
    NoLocalAddress,
    #[error("segment of {0} bytes does not fit in a datagram")]
    SegmentTooLarge(usize),
    #[error(transparent)]
    Link(#[from] LinkError),
}

/// Why an inbound datagram was not delivered or forwarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    Malformed(WireError),
    BadChecksum,
    UnsupportedProtocol(u8),
    NoReceiver,
    NoRoute,
    TtlExceeded,
    LinkFailure,
}

/// Outcome of [`NetworkLayer::receive`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Delivered,
    Forwarded { next_hop: Ipv4Addr },
    Dropped(DropReason),
}

#[derive(Debug, Clone)]
pub struct NetworkLayer {
    local: Option<Ipv4Addr>,
    routes: RoutingTable,
    ignore_checksum: bool,
    ttl: u8,
}

impl Default for NetworkLayer {
    fn default() -> Self {
        Self {
            local: None,
            routes: RoutingTable::new(),
            ignore_checksum: false,
            ttl: DEFAULT_TTL,
        }
    }
}

impl NetworkLayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Skip header checksum verification on receive.
    pub fn with_ignore_checksum(mut self, ignore: bool) -> Self {
        self.ignore_checksum = ignore;
        self
    }

    /// TTL placed on datagrams this host originates.
    pub fn with_ttl(mut self, ttl: u8) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn set_local_address(&mut self, addr: Ipv4Addr) {
        self.local = Some(addr);
    }

    pub fn set_routing_table(&mut self, routes: RoutingTable) {
        self.routes = routes;
    }

    pub fn next_hop(&self, dst: Ipv4Addr) -> Option<Ipv4Addr> {
        self.routes.lookup(dst)
    }

    /// Originate a datagram carrying `segment` to `dst`.
    pub fn send(
        &self,
        link: &mut dyn DatagramSender,
        segment: &[u8],
        dst: Ipv4Addr,
    ) -> Result<(), NetworkError> {
        let src = self.local.ok_or(NetworkError::NoLocalAddress)?;
        if segment.len() > MAX_SEGMENT {
            return Err(NetworkError::SegmentTooLarge(segment.len()));
        }
        let next_hop = self.next_hop(dst).ok_or(NetworkError::NoRoute(dst))?;

        let mut header = Ipv4Header::new(src, dst, protocol::TCP, segment.len());
        header.ttl = self.ttl;
        let mut datagram = Vec::with_capacity(IPV4_HEADER_LEN + segment.len());
        datagram.extend_from_slice(&header.encode());
        datagram.extend_from_slice(segment);

        link.send_datagram(&datagram, next_hop)?;
        log::debug!("[ip] → {src} → {dst} via {next_hop} len={}", segment.len());
        Ok(())
    }

    /// Process one inbound datagram: deliver it, forward it, or drop it.
    pub fn receive(
        &self,
        datagram: &[u8],
        link: &mut dyn DatagramSender,
        upper: Option<&mut dyn SegmentReceiver>,
    ) -> Disposition {
        let (header, payload) = match Ipv4Header::parse(datagram) {
            Ok(parsed) => parsed,
            Err(e) => {
                log::warn!("[ip] dropping malformed datagram: {e}");
                return Disposition::Dropped(DropReason::Malformed(e));
            }
        };
        if !self.ignore_checksum && !Ipv4Header::checksum_valid(datagram) {
            log::warn!("[ip] dropping datagram from {} with bad checksum", header.src);
            return Disposition::Dropped(DropReason::BadChecksum);
        }

        if Some(header.dst) == self.local {
            return self.deliver(&header, payload, link, upper);
        }
        self.forward(header, payload, link)
    }

    fn deliver(
        &self,
        header: &Ipv4Header,
        payload: &[u8],
        link: &mut dyn DatagramSender,
        upper: Option<&mut dyn SegmentReceiver>,
    ) -> Disposition {
        if header.protocol != protocol::TCP {
            log::debug!("[ip] ignoring protocol {} from {}", header.protocol, header.src);
            return Disposition::Dropped(DropReason::UnsupportedProtocol(header.protocol));
        }
        let Some(upper) = upper else {
            log::debug!("[ip] no transport registered; dropping segment from {}", header.src);
            return Disposition::Dropped(DropReason::NoReceiver);
        };

        let mut out = Outbound {
            network: self,
            link,
        };
        upper.receive_segment(header.src, header.dst, payload, &mut out);
        Disposition::Delivered
    }

    fn forward(
        &self,
        header: Ipv4Header,
        payload: &[u8],
        link: &mut dyn DatagramSender,
    ) -> Disposition {
        let Some(next_hop) = self.next_hop(header.dst) else {
            log::warn!("[ip] no route to {}; dropping", header.dst);
            return Disposition::Dropped(DropReason::NoRoute);
        };
        if header.ttl <= 1 {
            log::debug!("[ip] TTL expired for {} → {}", header.src, header.dst);
            return Disposition::Dropped(DropReason::TtlExceeded);
        }

        let rebuilt = Ipv4Header {
            ttl: header.ttl - 1,
            total_len: (IPV4_HEADER_LEN + payload.len()) as u16,
            ..header
        };
        let mut datagram = Vec::with_capacity(IPV4_HEADER_LEN + payload.len());
        datagram.extend_from_slice(&rebuilt.encode());
        datagram.extend_from_slice(payload);

        match link.send_datagram(&datagram, next_hop) {
            Ok(()) => {
                log::debug!(
                    "[ip] forwarded {} → {} via {next_hop} ttl={}",
                    rebuilt.src,
                    rebuilt.dst,
                    rebuilt.ttl
                );
                Disposition::Forwarded { next_hop }
            }
            Err(e) => {
                log::warn!("[ip] forwarding to {next_hop} failed: {e}");
                Disposition::Dropped(DropReason::LinkFailure)
            }
        }
    }
}

/// The send path as seen from the transport: a network layer bound to the
/// link it transmits on.
pub struct Outbound<'a> {
    pub network: &'a NetworkLayer,
    pub link: &'a mut dyn DatagramSender,
}

impl SegmentSender for Outbound<'_> {
    fn send_segment(&mut self, segment: &[u8], dst: Ipv4Addr) -> Result<(), NetworkError> {
        self.network.send(self.link, segment, dst)
    }
}
