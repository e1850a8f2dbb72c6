//! Fixed-size frame header that precedes every payload on the wire.
//!
//! Wire format:
//! ```text
//! [component_id:2][msg_type:2][payload_size:4][payload:N]
//! ```
//! Total header size: 8 bytes. All multi-byte integers are big-endian
//! (network byte order).
//!
//! A connection carries an unbounded sequence of frames.  There is no
//! end-of-stream marker: closing the connection terminates the stream.

/// Total size of the frame header in bytes.
pub const HEADER_SIZE: usize = 8;

/// Decoded frame header.
///
/// `payload_size` is the exact number of payload bytes that follow the
/// header before the next header starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameHeader {
    /// Component the message is addressed to.
    pub component_id: u16,
    /// Numeric message type within the component.
    pub msg_type: u16,
    /// Byte length of the payload following this header.
    pub payload_size: u32,
}

impl FrameHeader {
    /// Creates a header from its three fields.
    pub fn new(component_id: u16, msg_type: u16, payload_size: u32) -> Self {
        Self {
            component_id,
            msg_type,
            payload_size,
        }
    }

    /// Encodes the header into its 8-byte wire representation.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        encode_header(self.component_id, self.msg_type, self.payload_size)
    }

    /// Decodes a header from its 8-byte wire representation.
    pub fn from_bytes(bytes: &[u8; HEADER_SIZE]) -> Self {
        decode_header(bytes)
    }

    /// Payload length as a `usize`, ready for buffer sizing.
    pub fn payload_len(&self) -> usize {
        self.payload_size as usize
    }
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes the three header fields into 8 bytes in network byte order.
///
/// # Examples
///
/// ```rust
/// use msgstream_core::protocol::frame::{decode_header, encode_header};
///
/// let bytes = encode_header(5, 10, 1);
/// assert_eq!(bytes, [0x00, 0x05, 0x00, 0x0A, 0x00, 0x00, 0x00, 0x01]);
///
/// let header = decode_header(&bytes);
/// assert_eq!((header.component_id, header.msg_type, header.payload_size), (5, 10, 1));
/// ```
pub fn encode_header(component_id: u16, msg_type: u16, payload_size: u32) -> [u8; HEADER_SIZE] {
    let mut buf = [0u8; HEADER_SIZE];
    buf[0..2].copy_from_slice(&component_id.to_be_bytes());
    buf[2..4].copy_from_slice(&msg_type.to_be_bytes());
    buf[4..8].copy_from_slice(&payload_size.to_be_bytes());
    buf
}

/// Decodes 8 header bytes.  Every bit pattern is a valid header.
pub fn decode_header(bytes: &[u8; HEADER_SIZE]) -> FrameHeader {
    FrameHeader {
        component_id: u16::from_be_bytes([bytes[0], bytes[1]]),
        msg_type: u16::from_be_bytes([bytes[2], bytes[3]]),
        payload_size: u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_header_uses_network_byte_order() {
        // Arrange / Act
        let bytes = encode_header(0x0102, 0x0304, 0x0506_0708);

        // Assert
        assert_eq!(bytes, [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]);
    }

    #[test]
    fn test_decode_header_reads_big_endian_fields() {
        let header = decode_header(&[0xFF, 0xFE, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00]);

        assert_eq!(header.component_id, 0xFFFE);
        assert_eq!(header.msg_type, 0x0001);
        assert_eq!(header.payload_size, 0x0001_0000);
    }

    #[test]
    fn test_header_survives_extreme_values() {
        let header = FrameHeader::new(u16::MAX, 0, u32::MAX);
        assert_eq!(FrameHeader::from_bytes(&header.to_bytes()), header);
    }

    #[test]
    fn test_payload_len_matches_payload_size() {
        let header = FrameHeader::new(1, 2, 4096);
        assert_eq!(header.payload_len(), 4096);
    }
}
