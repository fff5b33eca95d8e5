//! Connection finite-state machine types.
//!
//! Only the passive-open half of the TCP state diagram (RFC 793 §3.2) is
//! modelled.  The listening role belongs to [`crate::server::Server`] as a
//! whole, so no per-connection `LISTEN` state exists, and closing is
//! unilateral, so there is no `FIN_WAIT`/`TIME_WAIT` ladder.
//!
//! ```text
//!   SYN rcvd           first in-order ACK          local close
//! ───────────▶ SYN_RECEIVED ──────────▶ ESTABLISHED ──────────▶ CLOSED
//!                    │                                            ▲
//!                    └──────────────── local close ───────────────┘
//! ```

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// SYN received and SYN+ACK sent; waiting for the peer's ACK.
    SynReceived,
    /// Handshake complete; data transfer in progress.
    Established,
    /// FIN sent.  The connection is about to leave its server's table.
    Closed,
}

impl ConnectionState {
    /// `true` while the application may still send.
    pub fn is_open(self) -> bool {
        !matches!(self, Self::Closed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::SynReceived => "SYN_RECEIVED",
            Self::Established => "ESTABLISHED",
            Self::Closed => "CLOSED",
        })
    }
}
