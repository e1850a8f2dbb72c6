//! Protocol module: frame header, client identifiers and message codecs.

pub mod client_id;
pub mod codec;
pub mod frame;
pub mod registry;

pub use client_id::{ClientId, ClientIdAllocator, FIRST_CLIENT_ID};
pub use codec::{header_for, CodecError, MessageCodec, RawCodec};
pub use frame::{decode_header, encode_header, FrameHeader, HEADER_SIZE};
pub use registry::{AnyMessage, MessageRegistry};
