//! Inbound half of a connection: header-then-payload frame reading.
//!
//! Each frame is read in two phases.  First exactly [`HEADER_SIZE`] bytes are
//! read and decoded; then exactly `payload_size` bytes are read into a
//! receive buffer that is grown on demand.  The reader is then re-armed for
//! the next header.  A failure in either phase moves the reader to
//! [`ReadState::Disconnected`] for good.
//!
//! ```text
//!  AwaitingHeader ──8 bytes──► AwaitingPayload(h) ──h.payload_size bytes──► AwaitingHeader
//!        │                            │
//!        └──────── error ─────────────┴──────────────► Disconnected
//! ```

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::protocol::frame::{FrameHeader, HEADER_SIZE};
use crate::transport::TransportError;

/// Receive buffer size used when none is configured.
pub const DEFAULT_INITIAL_BUFFER_SIZE: usize = 1024;

/// Where the reader is in the frame cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadState {
    AwaitingHeader,
    AwaitingPayload(FrameHeader),
    Disconnected,
}

// ── InboundBuffer ─────────────────────────────────────────────────────────────

/// Grow-only payload buffer.
///
/// The buffer starts at the configured size and grows to fit the largest
/// payload seen so far.  It never shrinks during the life of a connection.
#[derive(Debug)]
pub struct InboundBuffer {
    data: Vec<u8>,
}

impl InboundBuffer {
    pub fn new(initial_size: usize) -> Self {
        Self {
            data: vec![0u8; initial_size],
        }
    }

    /// Current usable size of the buffer.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Makes room for at least `len` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::OutOfMemory`] if the allocation fails.  The
    /// buffer is left as it was.
    pub fn ensure(&mut self, len: usize) -> Result<(), TransportError> {
        let current = self.data.len();
        if len <= current {
            return Ok(());
        }
        self.data
            .try_reserve_exact(len - current)
            .map_err(|_| TransportError::OutOfMemory { requested: len })?;
        self.data.resize(len, 0);
        tracing::trace!("receive buffer grown from {current} to {len} bytes");
        Ok(())
    }

    fn slice_mut(&mut self, len: usize) -> &mut [u8] {
        &mut self.data[..len]
    }

    fn slice(&self, len: usize) -> &[u8] {
        &self.data[..len]
    }
}

impl Default for InboundBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_INITIAL_BUFFER_SIZE)
    }
}

// ── FrameReader ───────────────────────────────────────────────────────────────

/// Reads complete frames from a byte stream.
///
/// The returned payload slice borrows the reader's buffer and is valid until
/// the next call to [`FrameReader::read_frame`].
#[derive(Debug)]
pub struct FrameReader<R> {
    reader: R,
    header: [u8; HEADER_SIZE],
    buffer: InboundBuffer,
    max_payload_size: usize,
    state: ReadState,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Creates a reader with the given initial buffer size and payload limit.
    pub fn new(reader: R, initial_buffer_size: usize, max_payload_size: usize) -> Self {
        Self {
            reader,
            header: [0u8; HEADER_SIZE],
            buffer: InboundBuffer::new(initial_buffer_size),
            max_payload_size,
            state: ReadState::AwaitingHeader,
        }
    }

    pub fn state(&self) -> ReadState {
        self.state
    }

    pub fn buffer_capacity(&self) -> usize {
        self.buffer.capacity()
    }

    /// Reads the next complete frame.
    ///
    /// # Errors
    ///
    /// - [`TransportError::Closed`] when the peer closed the stream, or when
    ///   the reader already failed earlier.
    /// - [`TransportError::PayloadTooLarge`] when the header announces more
    ///   than the configured limit.
    /// - [`TransportError::OutOfMemory`] when the buffer cannot grow.
    /// - [`TransportError::Io`] for any other read failure.
    ///
    /// Any error leaves the reader in [`ReadState::Disconnected`].
    pub async fn read_frame(&mut self) -> Result<(FrameHeader, &[u8]), TransportError> {
        match self.advance().await {
            Ok(header) => Ok((header, self.buffer.slice(header.payload_len()))),
            Err(error) => {
                self.state = ReadState::Disconnected;
                Err(error)
            }
        }
    }

    async fn advance(&mut self) -> Result<FrameHeader, TransportError> {
        loop {
            match self.state {
                ReadState::Disconnected => return Err(TransportError::Closed),
                ReadState::AwaitingHeader => {
                    self.reader
                        .read_exact(&mut self.header)
                        .await
                        .map_err(TransportError::from_read)?;
                    let header = FrameHeader::from_bytes(&self.header);
                    let len = header.payload_len();
                    if len > self.max_payload_size {
                        return Err(TransportError::PayloadTooLarge {
                            size: len,
                            limit: self.max_payload_size,
                        });
                    }
                    self.buffer.ensure(len)?;
                    self.state = ReadState::AwaitingPayload(header);
                }
                ReadState::AwaitingPayload(header) => {
                    let len = header.payload_len();
                    if len > 0 {
                        self.reader
                            .read_exact(self.buffer.slice_mut(len))
                            .await
                            .map_err(TransportError::from_read)?;
                    }
                    self.state = ReadState::AwaitingHeader;
                    return Ok(header);
                }
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    fn frame(component_id: u16, msg_type: u16, payload: &[u8]) -> Vec<u8> {
        let mut bytes = FrameHeader::new(component_id, msg_type, payload.len() as u32)
            .to_bytes()
            .to_vec();
        bytes.extend_from_slice(payload);
        bytes
    }

    #[test]
    fn test_buffer_grows_but_never_shrinks() {
        // Arrange
        let mut buffer = InboundBuffer::new(16);

        // Act
        buffer.ensure(100).unwrap();
        buffer.ensure(8).unwrap();

        // Assert
        assert_eq!(buffer.capacity(), 100);
    }

    #[test]
    fn test_buffer_growth_failure_reports_out_of_memory() {
        let mut buffer = InboundBuffer::new(16);

        let result = buffer.ensure(usize::MAX);

        assert!(matches!(
            result,
            Err(TransportError::OutOfMemory { requested }) if requested == usize::MAX
        ));
        assert_eq!(buffer.capacity(), 16);
    }

    #[tokio::test]
    async fn test_reads_consecutive_frames() {
        // Arrange
        let mut wire = frame(5, 10, b"X");
        wire.extend(frame(5, 11, b"second"));
        let mut reader = FrameReader::new(wire.as_slice(), 1024, usize::MAX);

        // Act / Assert
        let (header, payload) = reader.read_frame().await.unwrap();
        assert_eq!(header, FrameHeader::new(5, 10, 1));
        assert_eq!(payload, b"X");

        let (header, payload) = reader.read_frame().await.unwrap();
        assert_eq!(header.msg_type, 11);
        assert_eq!(payload, b"second");
        assert_eq!(reader.state(), ReadState::AwaitingHeader);
    }

    #[tokio::test]
    async fn test_zero_length_payload_yields_empty_slice() {
        let wire = frame(1, 2, b"");
        let mut reader = FrameReader::new(wire.as_slice(), 4, usize::MAX);

        let (header, payload) = reader.read_frame().await.unwrap();

        assert_eq!(header.payload_size, 0);
        assert!(payload.is_empty());
    }

    #[tokio::test]
    async fn test_payload_larger_than_buffer_grows_it() {
        let big = vec![0xAB; 5000];
        let wire = frame(1, 1, &big);
        let mut reader = FrameReader::new(wire.as_slice(), 16, usize::MAX);

        let (_, payload) = reader.read_frame().await.unwrap();

        assert_eq!(payload, big.as_slice());
        assert_eq!(reader.buffer_capacity(), 5000);
    }

    #[tokio::test]
    async fn test_eof_before_header_is_clean_close() {
        let wire: &[u8] = &[];
        let mut reader = FrameReader::new(wire, 1024, usize::MAX);

        let result = reader.read_frame().await;

        assert!(matches!(result, Err(TransportError::Closed)));
        assert_eq!(reader.state(), ReadState::Disconnected);
    }

    #[tokio::test]
    async fn test_eof_mid_payload_is_close() {
        let mut wire = frame(1, 1, b"abcdef");
        wire.truncate(HEADER_SIZE + 2);
        let mut reader = FrameReader::new(wire.as_slice(), 1024, usize::MAX);

        assert!(matches!(reader.read_frame().await, Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn test_oversized_payload_is_rejected_before_allocating() {
        let header = FrameHeader::new(1, 1, 1_000_000).to_bytes();
        let mut reader = FrameReader::new(&header[..], 64, 1024);

        let result = reader.read_frame().await;

        assert!(matches!(
            result,
            Err(TransportError::PayloadTooLarge { size: 1_000_000, limit: 1024 })
        ));
        assert_eq!(reader.buffer_capacity(), 64);
    }

    #[tokio::test]
    async fn test_reader_stays_disconnected_after_error() {
        let wire: &[u8] = &[0, 1];
        let mut reader = FrameReader::new(wire, 1024, usize::MAX);
        let _ = reader.read_frame().await;

        assert!(matches!(reader.read_frame().await, Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn test_frame_split_across_writes_is_reassembled() {
        // Arrange
        let (mut tx, rx) = tokio::io::duplex(64);
        let wire = frame(7, 8, b"split payload");
        let mut reader = FrameReader::new(rx, 1024, usize::MAX);

        // Act
        let writer = tokio::spawn(async move {
            for chunk in wire.chunks(3) {
                tx.write_all(chunk).await.unwrap();
                tokio::task::yield_now().await;
            }
        });
        let (header, payload) = reader.read_frame().await.unwrap();
        let payload = payload.to_vec();
        writer.await.unwrap();

        // Assert
        assert_eq!(header, FrameHeader::new(7, 8, 13));
        assert_eq!(payload, b"split payload");
    }
}
