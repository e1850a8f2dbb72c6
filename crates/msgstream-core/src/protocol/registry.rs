//! Registry mapping `(component_id, msg_type)` pairs to concrete message types.
//!
//! Applications register each message type once at startup:
//!
//! ```rust
//! use msgstream_core::protocol::codec::MessageCodec;
//! use msgstream_core::protocol::registry::MessageRegistry;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, PartialEq, Serialize, Deserialize)]
//! struct Beacon {
//!     team: String,
//!     seq: u64,
//! }
//!
//! let mut registry = MessageRegistry::new();
//! registry.register::<Beacon>(2000, 1).unwrap();
//!
//! let msg: Box<dyn std::any::Any + Send> = Box::new(Beacon { team: "cyan".into(), seq: 7 });
//! let (header, payload) = registry.serialize(2000, 1, &msg).unwrap();
//! let decoded = registry.deserialize(&header, &payload).unwrap();
//! assert_eq!(decoded.downcast_ref::<Beacon>().unwrap().seq, 7);
//! ```
//!
//! Payloads are encoded with `bincode`.  Decoded messages come back as
//! `Box<dyn Any + Send>`; the receiver downcasts using the component and
//! message type carried alongside.

use std::any::{type_name, Any};
use std::collections::HashMap;

use serde::{de::DeserializeOwned, Serialize};

use crate::protocol::codec::{header_for, CodecError, MessageCodec};
use crate::protocol::frame::FrameHeader;

/// Dynamically typed message handled by [`MessageRegistry`].
pub type AnyMessage = Box<dyn Any + Send>;

type EncodeFn = Box<dyn Fn(&(dyn Any + Send)) -> Option<Result<Vec<u8>, CodecError>> + Send + Sync>;
type DecodeFn = Box<dyn Fn(&[u8]) -> Result<AnyMessage, CodecError> + Send + Sync>;

struct Entry {
    type_name: &'static str,
    encode: EncodeFn,
    decode: DecodeFn,
}

/// Codec backed by a table of registered message types.
#[derive(Default)]
pub struct MessageRegistry {
    entries: HashMap<(u16, u16), Entry>,
}

impl MessageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `T` as the message type for `(component_id, msg_type)`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::AlreadyRegistered`] if the pair is taken.
    pub fn register<T>(&mut self, component_id: u16, msg_type: u16) -> Result<(), CodecError>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
    {
        let key = (component_id, msg_type);
        if self.entries.contains_key(&key) {
            return Err(CodecError::AlreadyRegistered {
                component_id,
                msg_type,
            });
        }

        let encode: EncodeFn = Box::new(|message| {
            message.downcast_ref::<T>().map(|value| {
                bincode::serialize(value).map_err(|e| CodecError::Encode(e.to_string()))
            })
        });
        let decode: DecodeFn = Box::new(|payload| {
            bincode::deserialize::<T>(payload)
                .map(|value| Box::new(value) as AnyMessage)
                .map_err(|e| CodecError::MalformedPayload(e.to_string()))
        });

        self.entries.insert(
            key,
            Entry {
                type_name: type_name::<T>(),
                encode,
                decode,
            },
        );
        Ok(())
    }

    /// Returns `true` if a type is registered for the pair.
    pub fn is_registered(&self, component_id: u16, msg_type: u16) -> bool {
        self.entries.contains_key(&(component_id, msg_type))
    }

    /// Number of registered message types.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry(&self, component_id: u16, msg_type: u16) -> Result<&Entry, CodecError> {
        self.entries
            .get(&(component_id, msg_type))
            .ok_or(CodecError::Unregistered {
                component_id,
                msg_type,
            })
    }
}

impl MessageCodec for MessageRegistry {
    type Message = AnyMessage;

    fn serialize(
        &self,
        component_id: u16,
        msg_type: u16,
        message: &AnyMessage,
    ) -> Result<(FrameHeader, Vec<u8>), CodecError> {
        let entry = self.entry(component_id, msg_type)?;
        let payload = (entry.encode)(&**message).ok_or(CodecError::TypeMismatch {
            component_id,
            msg_type,
            expected: entry.type_name,
        })??;
        let header = header_for(component_id, msg_type, &payload)?;
        Ok((header, payload))
    }

    fn deserialize(&self, header: &FrameHeader, payload: &[u8]) -> Result<AnyMessage, CodecError> {
        let entry = self.entry(header.component_id, header.msg_type)?;
        (entry.decode)(payload)
    }
}

impl std::fmt::Debug for MessageRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<_> = self
            .entries
            .iter()
            .map(|(key, entry)| (*key, entry.type_name))
            .collect();
        types.sort_unstable();
        f.debug_struct("MessageRegistry").field("types", &types).finish()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct GameState {
        phase: String,
        points: [u32; 2],
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Ack {
        id: u64,
    }

    fn make_registry() -> MessageRegistry {
        let mut registry = MessageRegistry::new();
        registry.register::<GameState>(2000, 20).unwrap();
        registry.register::<Ack>(2000, 21).unwrap();
        registry
    }

    #[test]
    fn test_register_duplicate_pair_fails() {
        // Arrange
        let mut registry = make_registry();

        // Act
        let result = registry.register::<Ack>(2000, 20);

        // Assert
        assert_eq!(
            result,
            Err(CodecError::AlreadyRegistered {
                component_id: 2000,
                msg_type: 20
            })
        );
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_serialize_then_deserialize_restores_message() {
        let registry = make_registry();
        let original = GameState {
            phase: "PRODUCTION".to_string(),
            points: [42, 17],
        };
        let message: AnyMessage = Box::new(original.clone());

        let (header, payload) = registry.serialize(2000, 20, &message).unwrap();
        let decoded = registry.deserialize(&header, &payload).unwrap();

        assert_eq!(header.payload_len(), payload.len());
        assert_eq!(decoded.downcast_ref::<GameState>(), Some(&original));
    }

    #[test]
    fn test_serialize_unregistered_pair_fails() {
        let registry = make_registry();
        let message: AnyMessage = Box::new(Ack { id: 1 });

        let result = registry.serialize(1, 1, &message);

        assert!(matches!(
            result,
            Err(CodecError::Unregistered {
                component_id: 1,
                msg_type: 1
            })
        ));
    }

    #[test]
    fn test_serialize_wrong_type_for_pair_fails() {
        let registry = make_registry();
        // An Ack sent under the GameState pair must be refused.
        let message: AnyMessage = Box::new(Ack { id: 9 });

        let result = registry.serialize(2000, 20, &message);

        assert!(matches!(result, Err(CodecError::TypeMismatch { .. })));
    }

    #[test]
    fn test_deserialize_truncated_payload_is_malformed() {
        let registry = make_registry();
        let header = FrameHeader::new(2000, 21, 3);

        let result = registry.deserialize(&header, &[1, 2, 3]);

        assert!(matches!(result, Err(CodecError::MalformedPayload(_))));
    }

    #[test]
    fn test_deserialize_unregistered_pair_fails() {
        let registry = make_registry();
        let header = FrameHeader::new(7, 7, 0);

        assert!(matches!(
            registry.deserialize(&header, &[]),
            Err(CodecError::Unregistered { .. })
        ));
    }

    #[test]
    fn test_debug_lists_registered_types() {
        let registry = make_registry();
        let text = format!("{registry:?}");
        assert!(text.contains("GameState"));
        assert!(text.contains("Ack"));
    }
}
