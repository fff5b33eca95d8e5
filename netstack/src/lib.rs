//! `netstack`: a small internetworking stack built from first principles.
//!
//! # Architecture
//!
//! ```text
//!  ┌────────────────────────────────────┐
//!  │  application callbacks             │  on_accept / on_receive / on_timeout
//!  └────┬───────────────────────────────┘
//!       │ ConnectionHandle::{send, close}
//!  ┌────▼───────────────────────────────┐
//!  │  Server + Connection  (TCP subset) │  demux, handshake, in-order delivery
//!  └────┬───────────────────────────────┘
//!       │ SegmentSender / SegmentReceiver
//!  ┌────▼───────────────────────────────┐
//!  │  NetworkLayer         (IPv4 subset)│  deliver locally or forward (LPM, TTL)
//!  └────┬───────────────────────────────┘
//!       │ DatagramSender
//!  ┌────▼───────────────────────────────┐
//!  │  LinkLayer            (framing)    │  one framed byte stream per neighbor
//!  └────┬───────────────────────────────┘
//!       │ ByteTransport
//!  ┌────▼──────┐
//!  │  socket   │  (UDP-backed links + tokio driver)
//!  └───────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`wire`]        : IPv4/TCP header codecs and the Internet checksum
//! - [`framing`]     : END/ESC frame encoding and incremental decoding
//! - [`link`]        : neighbor map over physical byte transports
//! - [`route`]       : CIDR prefixes and the longest-prefix routing table
//! - [`network`]     : host delivery and router forwarding
//! - [`state`]       : connection state machine types
//! - [`timer`]       : cancellable timers behind the `Scheduler` seam
//! - [`connection`]  : per-connection numbers and the application API
//! - [`server`]      : passive open, demultiplexing and the connection table
//! - [`stack`]       : one self-contained instance of all of the above
//! - [`socket`]      : UDP links and the async event loop

pub mod connection;
pub mod framing;
pub mod link;
pub mod network;
pub mod route;
pub mod server;
pub mod socket;
pub mod stack;
pub mod state;
pub mod timer;
pub mod wire;

pub use connection::{ConnectionHandle, ConnectionId, TransportError};
pub use link::{ByteTransport, LinkError};
pub use network::{Disposition, DropReason, NetworkError};
pub use route::{Cidr, RoutingTable};
pub use server::Server;
pub use stack::{Stack, StackConfig};
