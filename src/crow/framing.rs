//! Packet framing and line decoding for the crow serial stream.
//!
//! crow terminates every packet with the two bytes `\n\r` (note the order,
//! this is not the usual CRLF). The framer accumulates raw reads and yields
//! each complete packet with the terminator stripped; a trailing fragment
//! stays buffered until more bytes arrive.
//!
//! # Wire Format
//!
//! ```text
//! ^^stream(1,2.5)\n\r^^change(2,1)\n\r> ready\n\r
//! ```
//!
//! Decoding is strict 7-bit ASCII. A packet containing any byte above 0x7F
//! is rejected with a [`DecodeError`] so the caller can drop it and carry on
//! with the next packet.

use thiserror::Error;

/// Packet terminator used by crow.
pub const TERMINATOR: &[u8; 2] = b"\n\r";

/// A packet is not valid 7-bit text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid ASCII byte 0x{byte:02x} at position {position}")]
pub struct DecodeError {
    /// Offset of the first offending byte.
    pub position: usize,
    /// The offending byte.
    pub byte: u8,
}

/// Splits a byte stream into terminator-delimited packets.
///
/// One framer lives for exactly one connection. Bytes left in the buffer
/// when the connection closes are discarded along with the framer.
#[derive(Debug, Default)]
pub struct LineFramer {
    buffer: Vec<u8>,
    /// Length of the buffer prefix already searched without a match.
    scanned: usize,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `data` and iterate over every packet completed by it.
    ///
    /// The returned iterator is lazy: packets are split off the buffer as
    /// they are pulled. Packets not pulled stay buffered for the next call.
    pub fn feed(&mut self, data: &[u8]) -> Packets<'_> {
        self.buffer.extend_from_slice(data);
        Packets { framer: self }
    }

    /// Split the next complete packet off the front of the buffer.
    ///
    /// Searching resumes where the previous unsuccessful search stopped,
    /// backed up far enough to catch a terminator split across reads.
    pub fn next_packet(&mut self) -> Option<Vec<u8>> {
        let from = self.scanned.saturating_sub(TERMINATOR.len() - 1);
        let Some(offset) = find_terminator(&self.buffer[from..]) else {
            self.scanned = self.buffer.len();
            return None;
        };

        let end = from + offset;
        let mut packet: Vec<u8> = self.buffer.drain(..end + TERMINATOR.len()).collect();
        packet.truncate(end);
        self.scanned = 0;
        Some(packet)
    }

    /// Bytes received but not yet terminated.
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }
}

/// Iterator over the packets completed by one [`LineFramer::feed`] call.
pub struct Packets<'a> {
    framer: &'a mut LineFramer,
}

impl Iterator for Packets<'_> {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Self::Item> {
        self.framer.next_packet()
    }
}

fn find_terminator(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(TERMINATOR.len())
        .position(|window| window == TERMINATOR)
}

/// Decode a packet as strict 7-bit ASCII text.
pub fn decode_packet(packet: &[u8]) -> Result<String, DecodeError> {
    if let Some(position) = packet.iter().position(|b| !b.is_ascii()) {
        return Err(DecodeError {
            position,
            byte: packet[position],
        });
    }

    // Every byte is below 0x80, so each one maps to exactly one char.
    Ok(packet.iter().map(|&b| b as char).collect())
}
