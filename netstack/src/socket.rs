//! UDP-backed physical links and the async event loop.
//!
//! Each configured neighbor is reached through one shared
//! `tokio::net::UdpSocket`.  A [`UdpLink`] is the [`ByteTransport`] for one
//! neighbor: it queues framed blocks addressed to that neighbor's UDP
//! address, and the [`Driver`] writes the queue out after every event.
//! Inbound, the driver maps the source address of each block back to the
//! neighbor it came from.
//!
//! The driver is the only async code in the crate.  It waits on the socket
//! and on the stack's next timer deadline, then calls into the synchronous
//! [`Stack`] one event at a time.
//!
//! Socket errors after binding are logged and only the block involved is
//! dropped; the loop keeps serving every other neighbor.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::pin::pin;
use std::rc::Rc;

use thiserror::Error;
use tokio::net::UdpSocket;

use crate::link::ByteTransport;
use crate::stack::Stack;

/// Largest block read from the socket in one go.
const MAX_DATAGRAM: usize = 65_535;

/// Blocks waiting to be written, with their UDP destination.
type Outbox = Rc<RefCell<VecDeque<(SocketAddr, Vec<u8>)>>>;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("socket I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("waiting for shutdown signal failed: {0}")]
    Signal(io::Error),
}

// ---------------------------------------------------------------------------
// UdpLink
// ---------------------------------------------------------------------------

/// Byte transport to one neighbor over the driver's UDP socket.
#[derive(Debug, Clone)]
pub struct UdpLink {
    peer: SocketAddr,
    outbox: Outbox,
}

impl ByteTransport for UdpLink {
    fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.outbox.borrow_mut().push_back((self.peer, bytes.to_vec()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

/// Owns the UDP socket and knows which neighbor each UDP peer is.
#[derive(Debug)]
pub struct Driver {
    socket: UdpSocket,
    peers: HashMap<SocketAddr, Ipv4Addr>,
    outbox: Outbox,
}

impl Driver {
    /// Bind the shared socket.  Port 0 lets the OS choose.
    pub async fn bind(addr: SocketAddr) -> Result<Self, DriverError> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self {
            socket,
            peers: HashMap::new(),
            outbox: Outbox::default(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, DriverError> {
        Ok(self.socket.local_addr()?)
    }

    /// Install a link on `stack` reaching `neighbor` at UDP address `peer`.
    pub fn connect_link(&mut self, stack: &mut Stack, neighbor: Ipv4Addr, peer: SocketAddr) {
        let link = UdpLink {
            peer,
            outbox: self.outbox.clone(),
        };
        stack.add_link(neighbor, Box::new(link));
        self.peers.insert(peer, neighbor);
        log::info!("[udp] neighbor {neighbor} is at {peer}");
    }

    /// Number of blocks queued by links and not yet written.
    pub fn queued(&self) -> usize {
        self.outbox.borrow().len()
    }

    /// Write every queued block to the socket, oldest first, and return how
    /// many were sent.  A block the socket refuses is logged and dropped.
    pub async fn flush(&self) -> usize {
        let mut sent = 0;
        loop {
            let next = self.outbox.borrow_mut().pop_front();
            let Some((peer, block)) = next else {
                return sent;
            };
            match self.socket.send_to(&block, peer).await {
                Ok(_) => {
                    sent += 1;
                    log::trace!("[udp] → {} bytes to {peer}", block.len());
                }
                Err(e) => log::warn!("[udp] dropping {} bytes to {peer}: {e}", block.len()),
            }
        }
    }

    /// Run `stack` until ctrl-c.
    pub async fn run(&self, stack: &mut Stack) -> Result<(), DriverError> {
        let mut failure = None;
        self.run_until(stack, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                failure = Some(e);
            }
        })
        .await;
        match failure {
            Some(e) => Err(DriverError::Signal(e)),
            None => Ok(()),
        }
    }

    /// Run `stack` until `shutdown` completes.
    pub async fn run_until<F>(&self, stack: &mut Stack, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut shutdown = pin!(shutdown);
        let mut buf = vec![0u8; MAX_DATAGRAM];

        loop {
            self.flush().await;
            let deadline = stack.next_deadline();
            let timer = async {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at.into()).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok((n, from)) => self.dispatch(stack, from, &buf[..n]),
                    Err(e) => log::warn!("[udp] receive failed: {e}"),
                },
                () = timer => {
                    stack.poll_timers(std::time::Instant::now());
                }
                () = &mut shutdown => {
                    log::info!("[udp] shutting down");
                    return;
                }
            }
        }
    }

    fn dispatch(&self, stack: &mut Stack, from: SocketAddr, block: &[u8]) {
        let Some(&neighbor) = self.peers.get(&from) else {
            log::warn!("[udp] ignoring {} bytes from unknown peer {from}", block.len());
            return;
        };
        match stack.receive_bytes(neighbor, block) {
            Ok(outcomes) => {
                for outcome in outcomes {
                    log::trace!("[udp] datagram from {neighbor}: {outcome:?}");
                }
            }
            Err(e) => log::warn!("[udp] block from {neighbor} dropped: {e}"),
        }
    }
}
