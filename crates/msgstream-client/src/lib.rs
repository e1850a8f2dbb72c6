//! msgstream-client library entry point.
//!
//! A client opens one TCP connection to a msgstream server and exchanges
//! framed messages over it using the same [`MessageCodec`] as the server.
//!
//! The connection lives on the caller's Tokio runtime: a read task decodes
//! incoming frames into [`ClientEvent`]s, and writes go through the same
//! single-in-flight outbound queue the server uses, so `send` may be called
//! from any thread.
//!
//! There is no automatic reconnection.  After a `Disconnected` event the
//! client is spent; connect a new one.
//!
//! [`MessageCodec`]: msgstream_core::protocol::MessageCodec

/// Infrastructure layer: the TCP connection.
pub mod infrastructure;

pub use infrastructure::network::{ClientConfig, ClientError, ClientEvent, StreamClient};
