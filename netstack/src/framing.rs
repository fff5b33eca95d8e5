//! Byte-stuffing framing (SLIP, RFC 1055).
//!
//! A serial line delivers an unstructured byte stream.  Datagram boundaries
//! are marked with [`END`]; literal `END` and [`ESC`] bytes inside a datagram
//! are replaced by two-byte escape sequences:
//!
//! | literal | on the wire        |
//! |---------|--------------------|
//! | `0xC0`  | `0xDB 0xDC`        |
//! | `0xDB`  | `0xDB 0xDD`        |
//!
//! Because `END` never appears inside an escaped frame, every `END` on the
//! wire is a boundary.  [`FrameDecoder`] exploits this: it only has to find
//! the next `END`, regardless of how the transport chunked the bytes.
//!
//! # Malformed escapes
//!
//! `ESC` followed by anything other than `ESC_END` or `ESC_ESC` (including an
//! `ESC` directly before the closing `END`) invalidates the whole frame.  The
//! frame is dropped with a warning and counted in
//! [`FrameDecoder::malformed`]; decoding resumes at the next frame.
//!
//! # Runaway frames
//!
//! A stream that never sends `END` would grow the buffer forever.  Once more
//! than [`MAX_PENDING`] bytes wait for a delimiter, no legal frame can still
//! complete: the buffer is discarded, the frame counted as malformed, and
//! everything up to the next `END` is skipped.

/// Frame delimiter.
pub const END: u8 = 0xC0;
/// Escape marker.
pub const ESC: u8 = 0xDB;
/// Substitute for a literal [`END`] after [`ESC`].
pub const ESC_END: u8 = 0xDC;
/// Substitute for a literal [`ESC`] after [`ESC`].
pub const ESC_ESC: u8 = 0xDD;

/// Longest escaped body of a 65535-byte datagram.
pub const MAX_PENDING: usize = 2 * 65_535;

/// Escape `datagram` and wrap it in delimiters.
///
/// The leading `END` flushes any line noise the receiver may have buffered;
/// an empty frame it creates is skipped by the decoder.
pub fn encode(datagram: &[u8]) -> Vec<u8> {
    let mut framed = Vec::with_capacity(datagram.len() + 2);
    framed.push(END);
    for &byte in datagram {
        match byte {
            END => framed.extend_from_slice(&[ESC, ESC_END]),
            ESC => framed.extend_from_slice(&[ESC, ESC_ESC]),
            _ => framed.push(byte),
        }
    }
    framed.push(END);
    framed
}

/// Reverse the escaping of one frame body (delimiters already stripped).
///
/// Returns `None` if the body contains a malformed escape sequence.
pub fn unescape(body: &[u8]) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(body.len());
    let mut bytes = body.iter();
    while let Some(&byte) = bytes.next() {
        if byte != ESC {
            out.push(byte);
            continue;
        }
        match bytes.next() {
            Some(&ESC_END) => out.push(END),
            Some(&ESC_ESC) => out.push(ESC),
            _ => return None,
        }
    }
    Some(out)
}

/// Per-neighbor reassembly buffer.
///
/// Holds bytes received but not yet terminated by an `END`.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    /// Prefix of `buf` already known to contain no `END`.
    scanned: usize,
    malformed: u64,
    /// Skipping the rest of an oversized frame.
    overflowed: bool,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `bytes` and return every datagram completed by them, in order.
    ///
    /// Empty frames (back-to-back delimiters) produce nothing.  Bytes after
    /// the last delimiter stay buffered for the next call.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        self.buf.extend_from_slice(bytes);

        let mut frames = Vec::new();
        let mut start = 0;
        let mut pos = self.scanned;
        while let Some(offset) = self.buf[pos..].iter().position(|&b| b == END) {
            let end = pos + offset;
            let body = &self.buf[start..end];
            if self.overflowed {
                self.overflowed = false;
            } else if !body.is_empty() {
                match unescape(body) {
                    Some(frame) => frames.push(frame),
                    None => {
                        self.malformed += 1;
                        log::warn!(
                            "[slip] dropping frame of {} bytes with malformed escape",
                            body.len()
                        );
                    }
                }
            }
            start = end + 1;
            pos = start;
        }

        self.buf.drain(..start);
        if self.buf.len() > MAX_PENDING {
            if !self.overflowed {
                self.malformed += 1;
                log::warn!(
                    "[slip] dropping frame: {} bytes without a delimiter",
                    self.buf.len()
                );
            }
            self.overflowed = true;
            self.buf.clear();
        }
        self.scanned = self.buf.len();
        frames
    }

    /// Bytes waiting for a closing delimiter.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Number of frames dropped because of malformed escapes or overflow.
    pub fn malformed(&self) -> u64 {
        self.malformed
    }
}
