//! Link layer: one framed byte stream per neighbor.
//!
//! [`LinkLayer`] maps a neighbor's IPv4 address to the [`Link`] that reaches
//! it.  Each link owns the physical [`ByteTransport`] and the
//! [`FrameDecoder`] that reassembles that neighbor's inbound bytes.
//!
//! Outbound, the network layer hands a datagram and a next hop to
//! [`DatagramSender::send_datagram`]; the datagram is framed and written to
//! the neighbor's transport.  Inbound, the owner of the physical transport
//! feeds raw blocks to [`LinkLayer::receive`] and gets back whole datagrams.

use std::collections::HashMap;
use std::io;
use std::net::Ipv4Addr;

use thiserror::Error;

use crate::framing::{self, FrameDecoder};

/// A physical byte transport (serial line, pipe, socket).
///
/// Only the send half lives here: inbound blocks are pushed into the stack by
/// whoever owns the read side.
pub trait ByteTransport {
    fn send(&mut self, bytes: &[u8]) -> io::Result<()>;
}

/// Capability to transmit a datagram towards a next hop.
pub trait DatagramSender {
    fn send_datagram(&mut self, datagram: &[u8], next_hop: Ipv4Addr) -> Result<(), LinkError>;
}

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("no link to neighbor {0}")]
    UnknownNeighbor(Ipv4Addr),
    #[error("link transport error: {0}")]
    Io(#[from] io::Error),
}

/// Per-link counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    pub frames_in: u64,
    pub frames_out: u64,
    pub malformed: u64,
}

/// One neighbor's transport and reassembly state.
pub struct Link {
    transport: Box<dyn ByteTransport>,
    decoder: FrameDecoder,
    frames_in: u64,
    frames_out: u64,
}

impl Link {
    pub fn new(transport: Box<dyn ByteTransport>) -> Self {
        Self {
            transport,
            decoder: FrameDecoder::new(),
            frames_in: 0,
            frames_out: 0,
        }
    }

    fn send(&mut self, datagram: &[u8]) -> io::Result<()> {
        self.transport.send(&framing::encode(datagram))?;
        self.frames_out += 1;
        Ok(())
    }

    fn receive(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        let frames = self.decoder.push(bytes);
        self.frames_in += frames.len() as u64;
        frames
    }

    pub fn stats(&self) -> LinkStats {
        LinkStats {
            frames_in: self.frames_in,
            frames_out: self.frames_out,
            malformed: self.decoder.malformed(),
        }
    }
}

/// The neighbor map.
#[derive(Default)]
pub struct LinkLayer {
    links: HashMap<Ipv4Addr, Link>,
}

impl LinkLayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `transport` as the link to `neighbor`, replacing any previous one.
    pub fn add_link(&mut self, neighbor: Ipv4Addr, transport: Box<dyn ByteTransport>) {
        if self.links.insert(neighbor, Link::new(transport)).is_some() {
            log::info!("[link] replaced link to {neighbor}");
        }
    }

    /// Detach the link to `neighbor`, discarding any partial frame.
    pub fn remove_link(&mut self, neighbor: Ipv4Addr) -> bool {
        self.links.remove(&neighbor).is_some()
    }

    pub fn stats(&self, neighbor: Ipv4Addr) -> Option<LinkStats> {
        self.links.get(&neighbor).map(Link::stats)
    }

    /// Feed a raw block received from `neighbor` and return the datagrams it
    /// completes.
    pub fn receive(&mut self, neighbor: Ipv4Addr, bytes: &[u8]) -> Result<Vec<Vec<u8>>, LinkError> {
        let link = self
            .links
            .get_mut(&neighbor)
            .ok_or(LinkError::UnknownNeighbor(neighbor))?;
        Ok(link.receive(bytes))
    }
}

impl DatagramSender for LinkLayer {
    fn send_datagram(&mut self, datagram: &[u8], next_hop: Ipv4Addr) -> Result<(), LinkError> {
        let link = self
            .links
            .get_mut(&next_hop)
            .ok_or(LinkError::UnknownNeighbor(next_hop))?;
        link.send(datagram)?;
        log::debug!("[link] → {} bytes to {next_hop}", datagram.len());
        Ok(())
    }
}
