//! Connection building blocks shared by the server sessions and the client.
//!
//! Nothing here opens a socket.  Both halves are generic over Tokio's
//! `AsyncRead` / `AsyncWrite`, so tests can drive them with
//! `tokio::io::duplex` instead of TCP.
//!
//! # Sub-modules
//!
//! - **`outbound`** – the per-connection FIFO of serialized frames.  It
//!   guarantees that at most one write is in flight on a socket and that
//!   frames leave in the order `send` was called.
//!
//! - **`inbound`** – the two-phase read state machine (header, then payload)
//!   and the grow-only receive buffer.

pub mod inbound;
pub mod outbound;

use std::io;

use thiserror::Error;

use crate::protocol::codec::CodecError;

pub use inbound::{FrameReader, InboundBuffer, ReadState};
pub use outbound::{drain, OutboundEntry, OutboundQueue, QueueAbandoned};

/// Why a connection ended.
///
/// Carried by disconnection notifications so the application can tell a
/// clean peer close from a transport fault or a local decision.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The peer closed the connection.
    #[error("connection closed by peer")]
    Closed,

    /// A read or write on the socket failed.
    #[error("connection I/O error: {0}")]
    Io(#[from] io::Error),

    /// The receive buffer could not be grown to fit an announced payload.
    #[error("out of memory: could not grow receive buffer to {requested} bytes")]
    OutOfMemory { requested: usize },

    /// The peer announced a payload above the configured limit.
    #[error("frame payload of {size} bytes exceeds the limit of {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },

    /// A received payload could not be decoded.  The stream may be out of
    /// sync, so the connection is not kept.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// This side closed the connection.
    #[error("connection closed locally")]
    ClosedLocally,
}

impl TransportError {
    /// Maps a read failure, treating end-of-stream as a peer close.
    pub fn from_read(error: io::Error) -> Self {
        if error.kind() == io::ErrorKind::UnexpectedEof {
            TransportError::Closed
        } else {
            TransportError::Io(error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_read_maps_eof_to_closed() {
        let err = TransportError::from_read(io::Error::from(io::ErrorKind::UnexpectedEof));
        assert!(matches!(err, TransportError::Closed));
    }

    #[test]
    fn test_from_read_keeps_other_io_errors() {
        let err = TransportError::from_read(io::Error::from(io::ErrorKind::ConnectionReset));
        assert!(matches!(err, TransportError::Io(e) if e.kind() == io::ErrorKind::ConnectionReset));
    }
}
