//! Infrastructure layer for the server.
//!
//! Contains OS-facing adapters: the TCP listener and its sessions, and
//! file-system storage for the configuration.
//!
//! **Dependency rule**: this layer may depend on `msgstream_core`, but MUST
//! NOT import the `application` layer.

pub mod network;
pub mod storage;
