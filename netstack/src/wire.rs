//! Header and checksum codec for the network and transport layers.
//!
//! This module is the byte-layout contract between layers.  It knows how to:
//! - Parse and build the 20-byte IPv4 header used by [`crate::network`].
//! - Parse and build the 20-byte TCP header used by [`crate::server`] and
//!   [`crate::connection`].
//! - Compute the Internet checksum (RFC 1071), including the TCP
//!   pseudo-header variant.
//!
//! No I/O and no protocol decisions happen here.
//!
//! # IPv4 header
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |Version|  IHL  |   DSCP    |ECN|          Total Length         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |         Identification        |Flags|     Fragment Offset     |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |  Time to Live |    Protocol   |        Header Checksum        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                         Source Address                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                      Destination Address                      |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! # TCP header
//!
//! ```text
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |          Source Port          |       Destination Port        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Sequence Number                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                    Acknowledgment Number                      |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |  Data |       |U|A|P|R|S|F|                                   |
//! | Offset|       |R|C|S|S|Y|I|            Window                 |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |           Checksum            |         Urgent Pointer        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! All multi-byte integers are big-endian on the wire.

use std::net::Ipv4Addr;

use thiserror::Error;

/// IANA protocol numbers carried in the IPv4 `protocol` field.
pub mod protocol {
    pub const ICMP: u8 = 1;
    pub const TCP: u8 = 6;
    pub const UDP: u8 = 17;
}

/// Bit-flag constants for the TCP flags field.
pub mod flags {
    /// Sender has finished sending.
    pub const FIN: u8 = 0x01;
    /// Synchronise sequence numbers.
    pub const SYN: u8 = 0x02;
    /// Reset the connection.
    pub const RST: u8 = 0x04;
    /// Push buffered data to the application.
    pub const PSH: u8 = 0x08;
    /// Acknowledgement field is significant.
    pub const ACK: u8 = 0x10;
    /// Urgent pointer is significant.  Carried in the layout only.
    pub const URG: u8 = 0x20;
}

/// Length of an IPv4 header without options.
pub const IPV4_HEADER_LEN: usize = 20;

/// Length of a TCP header without options.
pub const TCP_HEADER_LEN: usize = 20;

/// TTL placed on datagrams originated by this host.
pub const DEFAULT_TTL: u8 = 64;

/// Errors raised while parsing a header.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    #[error("buffer of {0} bytes is too short for the header")]
    Truncated(usize),
    #[error("unsupported IP version {0}")]
    BadVersion(u8),
    #[error("header length field {0} is out of range")]
    BadHeaderLength(usize),
    #[error("total length field {declared} disagrees with {actual} received bytes")]
    LengthMismatch { declared: usize, actual: usize },
}

// ---------------------------------------------------------------------------
// IPv4
// ---------------------------------------------------------------------------

/// IPv4 header fields, in host byte order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ipv4Header {
    pub dscp: u8,
    pub ecn: u8,
    /// Header plus payload, in bytes.
    pub total_len: u16,
    pub identification: u16,
    /// The three flag bits (reserved, DF, MF).
    pub flags: u8,
    /// Fragment offset in 8-byte units.
    pub frag_offset: u16,
    pub ttl: u8,
    pub protocol: u8,
    /// Checksum as read from the wire; ignored by [`Ipv4Header::encode`].
    pub checksum: u16,
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
}

impl Ipv4Header {
    /// A header for a fresh, unfragmented datagram carrying `payload_len` bytes.
    pub fn new(src: Ipv4Addr, dst: Ipv4Addr, protocol: u8, payload_len: usize) -> Self {
        Self {
            dscp: 0,
            ecn: 0,
            total_len: (IPV4_HEADER_LEN + payload_len) as u16,
            identification: 0,
            flags: 0,
            frag_offset: 0,
            ttl: DEFAULT_TTL,
            protocol,
            checksum: 0,
            src,
            dst,
        }
    }

    /// Parse the header at the start of `buf` and return it with the payload.
    ///
    /// The payload is bounded by the `total_len` field, so link-level padding
    /// after the datagram is discarded.  Options, if any, are skipped.
    pub fn parse(buf: &[u8]) -> Result<(Self, &[u8]), WireError> {
        if buf.len() < IPV4_HEADER_LEN {
            return Err(WireError::Truncated(buf.len()));
        }
        let version = buf[0] >> 4;
        if version != 4 {
            return Err(WireError::BadVersion(version));
        }
        let header_len = usize::from(buf[0] & 0x0f) * 4;
        if header_len < IPV4_HEADER_LEN || header_len > buf.len() {
            return Err(WireError::BadHeaderLength(header_len));
        }
        let total_len = u16::from_be_bytes([buf[2], buf[3]]);
        let declared = usize::from(total_len);
        if declared < header_len || declared > buf.len() {
            return Err(WireError::LengthMismatch {
                declared,
                actual: buf.len(),
            });
        }

        let flags_frag = u16::from_be_bytes([buf[6], buf[7]]);
        let header = Self {
            dscp: buf[1] >> 2,
            ecn: buf[1] & 0x03,
            total_len,
            identification: u16::from_be_bytes([buf[4], buf[5]]),
            flags: (flags_frag >> 13) as u8,
            frag_offset: flags_frag & 0x1fff,
            ttl: buf[8],
            protocol: buf[9],
            checksum: u16::from_be_bytes([buf[10], buf[11]]),
            src: Ipv4Addr::new(buf[12], buf[13], buf[14], buf[15]),
            dst: Ipv4Addr::new(buf[16], buf[17], buf[18], buf[19]),
        };
        Ok((header, &buf[header_len..declared]))
    }

    /// `true` if the header at the start of `datagram` sums to zero.
    ///
    /// Call only on a buffer [`Ipv4Header::parse`] accepted.
    pub fn checksum_valid(datagram: &[u8]) -> bool {
        let header_len = usize::from(datagram[0] & 0x0f) * 4;
        internet_checksum(&datagram[..header_len]) == 0
    }

    /// Serialise to 20 bytes with a freshly computed checksum.
    ///
    /// The checksum is taken over the header alone with its own field zeroed.
    pub fn encode(&self) -> [u8; IPV4_HEADER_LEN] {
        let mut buf = [0u8; IPV4_HEADER_LEN];
        buf[0] = (4 << 4) | (IPV4_HEADER_LEN / 4) as u8;
        buf[1] = (self.dscp << 2) | (self.ecn & 0x03);
        buf[2..4].copy_from_slice(&self.total_len.to_be_bytes());
        buf[4..6].copy_from_slice(&self.identification.to_be_bytes());
        let flags_frag = (u16::from(self.flags) << 13) | (self.frag_offset & 0x1fff);
        buf[6..8].copy_from_slice(&flags_frag.to_be_bytes());
        buf[8] = self.ttl;
        buf[9] = self.protocol;
        buf[12..16].copy_from_slice(&self.src.octets());
        buf[16..20].copy_from_slice(&self.dst.octets());

        let csum = internet_checksum(&buf);
        buf[10..12].copy_from_slice(&csum.to_be_bytes());
        buf
    }
}

// ---------------------------------------------------------------------------
// TCP
// ---------------------------------------------------------------------------

/// TCP header fields, in host byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpHeader {
    pub src_port: u16,
    pub dst_port: u16,
    pub seq: u32,
    pub ack: u32,
    /// Bitmask of [`flags`] constants.
    pub flags: u8,
    pub window: u16,
    /// Checksum as read from the wire; ignored by [`TcpHeader::encode`].
    pub checksum: u16,
    pub urg_ptr: u16,
}

impl TcpHeader {
    pub fn new(src_port: u16, dst_port: u16, seq: u32, ack: u32, flags: u8, window: u16) -> Self {
        Self {
            src_port,
            dst_port,
            seq,
            ack,
            flags,
            window,
            checksum: 0,
            urg_ptr: 0,
        }
    }

    /// Parse the header at the start of `segment` and return it with the
    /// payload that follows the data offset.
    pub fn parse(segment: &[u8]) -> Result<(Self, &[u8]), WireError> {
        if segment.len() < TCP_HEADER_LEN {
            return Err(WireError::Truncated(segment.len()));
        }
        let offset_flags = u16::from_be_bytes([segment[12], segment[13]]);
        let data_offset = usize::from(offset_flags >> 12) * 4;
        if data_offset < TCP_HEADER_LEN || data_offset > segment.len() {
            return Err(WireError::BadHeaderLength(data_offset));
        }

        let header = Self {
            src_port: u16::from_be_bytes([segment[0], segment[1]]),
            dst_port: u16::from_be_bytes([segment[2], segment[3]]),
            seq: u32::from_be_bytes([segment[4], segment[5], segment[6], segment[7]]),
            ack: u32::from_be_bytes([segment[8], segment[9], segment[10], segment[11]]),
            flags: (offset_flags & 0x3f) as u8,
            window: u16::from_be_bytes([segment[14], segment[15]]),
            checksum: u16::from_be_bytes([segment[16], segment[17]]),
            urg_ptr: u16::from_be_bytes([segment[18], segment[19]]),
        };
        Ok((header, &segment[data_offset..]))
    }

    /// Build a complete segment (header + `payload`) with the checksum
    /// computed over the pseudo-header for `src` → `dst`.
    pub fn encode(&self, payload: &[u8], src: Ipv4Addr, dst: Ipv4Addr) -> Vec<u8> {
        let mut buf = vec![0u8; TCP_HEADER_LEN + payload.len()];
        buf[0..2].copy_from_slice(&self.src_port.to_be_bytes());
        buf[2..4].copy_from_slice(&self.dst_port.to_be_bytes());
        buf[4..8].copy_from_slice(&self.seq.to_be_bytes());
        buf[8..12].copy_from_slice(&self.ack.to_be_bytes());
        let offset_flags = ((TCP_HEADER_LEN as u16 / 4) << 12) | u16::from(self.flags);
        buf[12..14].copy_from_slice(&offset_flags.to_be_bytes());
        buf[14..16].copy_from_slice(&self.window.to_be_bytes());
        buf[18..20].copy_from_slice(&self.urg_ptr.to_be_bytes());
        buf[TCP_HEADER_LEN..].copy_from_slice(payload);

        let csum = transport_checksum(&buf, src, dst);
        buf[16..18].copy_from_slice(&csum.to_be_bytes());
        buf
    }

    pub fn has(&self, flag: u8) -> bool {
        self.flags & flag == flag
    }
}

/// Render a flags byte as e.g. `SYN|ACK` for log lines.
pub fn flag_names(bits: u8) -> String {
    const NAMES: [(u8, &str); 6] = [
        (flags::SYN, "SYN"),
        (flags::FIN, "FIN"),
        (flags::RST, "RST"),
        (flags::PSH, "PSH"),
        (flags::ACK, "ACK"),
        (flags::URG, "URG"),
    ];
    let names: Vec<&str> = NAMES
        .iter()
        .filter(|(bit, _)| bits & bit != 0)
        .map(|(_, name)| *name)
        .collect();
    if names.is_empty() {
        "-".to_string()
    } else {
        names.join("|")
    }
}

// ---------------------------------------------------------------------------
// Checksums
// ---------------------------------------------------------------------------

/// Internet checksum (RFC 1071) over `data`.
///
/// Over a buffer that already holds a correct checksum the result is zero.
pub fn internet_checksum(data: &[u8]) -> u16 {
    fold(sum_words(0, data))
}

/// TCP checksum over the pseudo-header (`src`, `dst`, zero, protocol,
/// segment length) followed by `segment`.
///
/// A received segment verifies when this returns zero.
pub fn transport_checksum(segment: &[u8], src: Ipv4Addr, dst: Ipv4Addr) -> u16 {
    let mut pseudo = [0u8; 12];
    pseudo[0..4].copy_from_slice(&src.octets());
    pseudo[4..8].copy_from_slice(&dst.octets());
    pseudo[9] = protocol::TCP;
    pseudo[10..12].copy_from_slice(&(segment.len() as u16).to_be_bytes());

    // The pseudo-header is an even number of bytes, so summing the two
    // slices separately keeps word alignment.
    fold(sum_words(sum_words(0, &pseudo), segment))
}

fn sum_words(mut sum: u32, data: &[u8]) -> u32 {
    let mut words = data.chunks_exact(2);
    for word in &mut words {
        sum += u32::from(u16::from_be_bytes([word[0], word[1]]));
    }
    // Odd trailing byte is padded with a zero on the right.
    if let [last] = words.remainder() {
        sum += u32::from(*last) << 8;
    }
    sum
}

fn fold(mut sum: u32) -> u16 {
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}
