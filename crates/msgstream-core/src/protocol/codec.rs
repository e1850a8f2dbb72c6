//! The message codec seam between the framing layer and the application.
//!
//! The framing layer never looks inside a payload.  It hands the codec a
//! `(component_id, msg_type, message)` triple on the way out and a
//! `(header, payload)` pair on the way in.  Two implementations ship with
//! the crate:
//!
//! - [`RawCodec`] passes payload bytes through untouched.
//! - [`crate::protocol::registry::MessageRegistry`] maps registered
//!   `(component_id, msg_type)` pairs to concrete Rust types.

use thiserror::Error;

use crate::protocol::frame::FrameHeader;

/// Errors raised while turning messages into payloads or back.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    /// No message type is registered for this pair.
    #[error("unregistered message type: component {component_id}, type {msg_type}")]
    Unregistered { component_id: u16, msg_type: u16 },

    /// A message type is already registered for this pair.
    #[error("message type already registered: component {component_id}, type {msg_type}")]
    AlreadyRegistered { component_id: u16, msg_type: u16 },

    /// The message value is not of the type registered for the pair.
    #[error("message for component {component_id}, type {msg_type} is not a {expected}")]
    TypeMismatch {
        component_id: u16,
        msg_type: u16,
        expected: &'static str,
    },

    /// The message could not be serialized.
    #[error("failed to encode message: {0}")]
    Encode(String),

    /// The payload bytes do not form a valid message of the expected type.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// The encoded payload does not fit the 32-bit size field.
    #[error("payload of {0} bytes does not fit in a frame")]
    PayloadTooLarge(usize),

    /// A header was produced whose size field disagrees with the payload.
    #[error("header announces {declared} payload bytes but {actual} were produced")]
    HeaderMismatch { declared: u32, actual: usize },
}

/// Encodes structured messages to payload bytes and decodes them back.
///
/// Implementations must be shareable across the I/O thread and any number of
/// application threads.
pub trait MessageCodec: Send + Sync + 'static {
    /// The structured message type handed to and from the application.
    type Message: Send + 'static;

    /// Serializes `message` and builds the matching frame header.
    ///
    /// # Errors
    ///
    /// Fails if the message type is not known to the codec or cannot be encoded.
    fn serialize(
        &self,
        component_id: u16,
        msg_type: u16,
        message: &Self::Message,
    ) -> Result<(FrameHeader, Vec<u8>), CodecError>;

    /// Rebuilds a message from a received header and its payload.
    ///
    /// # Errors
    ///
    /// Fails if the `(component_id, msg_type)` pair is unknown or the payload
    /// is malformed for that type.
    fn deserialize(&self, header: &FrameHeader, payload: &[u8])
        -> Result<Self::Message, CodecError>;
}

/// Builds a header for `payload`, rejecting payloads too large for the size field.
///
/// # Errors
///
/// Returns [`CodecError::PayloadTooLarge`] if `payload.len()` exceeds `u32::MAX`.
pub fn header_for(
    component_id: u16,
    msg_type: u16,
    payload: &[u8],
) -> Result<FrameHeader, CodecError> {
    let payload_size =
        u32::try_from(payload.len()).map_err(|_| CodecError::PayloadTooLarge(payload.len()))?;
    Ok(FrameHeader::new(component_id, msg_type, payload_size))
}

// ── RawCodec ──────────────────────────────────────────────────────────────────

/// Pass-through codec: messages are the payload bytes themselves.
///
/// Every `(component_id, msg_type)` pair is accepted.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawCodec;

impl MessageCodec for RawCodec {
    type Message = Vec<u8>;

    fn serialize(
        &self,
        component_id: u16,
        msg_type: u16,
        message: &Vec<u8>,
    ) -> Result<(FrameHeader, Vec<u8>), CodecError> {
        let header = header_for(component_id, msg_type, message)?;
        Ok((header, message.clone()))
    }

    fn deserialize(&self, _header: &FrameHeader, payload: &[u8]) -> Result<Vec<u8>, CodecError> {
        Ok(payload.to_vec())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
