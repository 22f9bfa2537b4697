//! Packet header with zero-copy parsing.
//!
//! Every transport transaction carries exactly one packet: this fixed
//! 12-byte header followed by `payload_len` bytes. All fields are big-endian
//! signed 32-bit integers, stored as raw byte arrays so the struct has no
//! alignment requirements and any 12-byte buffer parses without copying.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::errors::HeaderError;

/// Fixed 12-byte packet header (network byte order).
///
/// An `uncompressed_len` of zero means the payload travels as-is; a positive
/// value means the payload is zlib-compressed and inflates to exactly that
/// many bytes.
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct PacketHeader {
    seq: [u8; 4],
    payload_len: [u8; 4],
    uncompressed_len: [u8; 4],
}

impl PacketHeader {
    /// Size of the serialized header.
    pub const SIZE: usize = 12;

    /// Build a header for an outgoing packet.
    pub fn new(seq: i32, payload_len: i32, uncompressed_len: i32) -> Self {
        Self {
            seq: seq.to_be_bytes(),
            payload_len: payload_len.to_be_bytes(),
            uncompressed_len: uncompressed_len.to_be_bytes(),
        }
    }

    /// Parse and validate a header from network bytes.
    ///
    /// # Errors
    ///
    /// Rejects negative payload or uncompressed lengths; a negative length
    /// field means the peer is not speaking this protocol.
    pub fn parse(bytes: [u8; Self::SIZE]) -> Result<Self, HeaderError> {
        let header = Self {
            seq: [bytes[0], bytes[1], bytes[2], bytes[3]],
            payload_len: [bytes[4], bytes[5], bytes[6], bytes[7]],
            uncompressed_len: [bytes[8], bytes[9], bytes[10], bytes[11]],
        };
        if header.payload_len() < 0 {
            return Err(HeaderError::NegativeLength(header.payload_len()));
        }
        if header.uncompressed_len() < 0 {
            return Err(HeaderError::NegativeUncompressed(header.uncompressed_len()));
        }
        Ok(header)
    }

    /// The sequence number the peer attached to this packet.
    pub fn seq(&self) -> i32 {
        i32::from_be_bytes(self.seq)
    }

    /// Bytes that follow the header on the wire.
    pub fn payload_len(&self) -> i32 {
        i32::from_be_bytes(self.payload_len)
    }

    /// Inflated payload size; zero when the payload is not compressed.
    pub fn uncompressed_len(&self) -> i32 {
        i32::from_be_bytes(self.uncompressed_len)
    }

    /// Whether the payload must pass through a zlib decoder.
    pub fn is_compressed(&self) -> bool {
        self.uncompressed_len() > 0
    }
}

impl std::fmt::Debug for PacketHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketHeader")
            .field("seq", &self.seq())
            .field("payload_len", &self.payload_len())
            .field("uncompressed_len", &self.uncompressed_len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use zerocopy::IntoBytes as _;

    use super::*;

    #[test]
    fn header_layout_is_big_endian() {
        let header = PacketHeader::new(1, 0x0102_0304, 0);
        let bytes = header.as_bytes();
        assert_eq!(bytes, &[0, 0, 0, 1, 1, 2, 3, 4, 0, 0, 0, 0]);
    }

    #[test]
    fn parse_round_trips() {
        let header = PacketHeader::new(-7, 4096, 128);
        let mut raw = [0u8; PacketHeader::SIZE];
        raw.copy_from_slice(header.as_bytes());

        let parsed = PacketHeader::parse(raw).unwrap();
        assert_eq!(parsed.seq(), -7);
        assert_eq!(parsed.payload_len(), 4096);
        assert_eq!(parsed.uncompressed_len(), 128);
        assert!(parsed.is_compressed());
    }

    #[test]
    fn negative_lengths_are_rejected() {
        let mut raw = [0u8; PacketHeader::SIZE];
        raw.copy_from_slice(PacketHeader::new(1, -1, 0).as_bytes());
        assert_eq!(PacketHeader::parse(raw), Err(HeaderError::NegativeLength(-1)));

        raw.copy_from_slice(PacketHeader::new(1, 1, -2).as_bytes());
        assert_eq!(PacketHeader::parse(raw), Err(HeaderError::NegativeUncompressed(-2)));
    }
}
