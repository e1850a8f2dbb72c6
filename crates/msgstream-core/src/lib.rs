//! # msgstream-core
//!
//! Shared library for msgstream containing the frame format, the message
//! codec seam, and the connection building blocks used by both the server
//! and the client.
//!
//! This crate never opens a socket.  Everything that touches I/O is generic
//! over Tokio's `AsyncRead` / `AsyncWrite` traits.
//!
//! # Architecture overview
//!
//! msgstream carries typed messages over plain TCP.  Every message travels as
//! one frame: an 8-byte header naming the component, the message type and
//! the payload size, followed by the payload itself.  Many message types can
//! share one connection; the `(component_id, msg_type)` pair tells the
//! receiver how to decode each payload.
//!
//! - **`protocol`** – The wire header, client identifiers, and the
//!   [`MessageCodec`] trait with its two shipped implementations:
//!   [`RawCodec`] (bytes in, bytes out) and [`MessageRegistry`] (registered
//!   serde types encoded with bincode).
//!
//! - **`transport`** – The two halves of a connection: [`FrameReader`] reads
//!   header-then-payload into a grow-only buffer, and [`OutboundQueue`]
//!   keeps at most one write in flight while preserving send order.

pub mod protocol;
pub mod transport;

// Re-export the most-used types at the crate root so callers can write
// `msgstream_core::FrameHeader` instead of `msgstream_core::protocol::frame::FrameHeader`.
pub use protocol::{
    AnyMessage, ClientId, ClientIdAllocator, CodecError, FrameHeader, MessageCodec,
    MessageRegistry, RawCodec, HEADER_SIZE,
};
pub use transport::{FrameReader, OutboundEntry, OutboundQueue, TransportError};
