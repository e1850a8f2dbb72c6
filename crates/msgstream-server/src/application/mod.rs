//! Application layer use cases for the server.
//!
//! Use cases here react to [`ServerEvent`](crate::infrastructure::network::ServerEvent)s
//! and depend on traits rather than on the concrete server, so they can be
//! unit-tested without sockets.
//!
//! # Sub-modules
//!
//! - **`relay`** – Logs, echoes, or broadcasts every received message,
//!   depending on the configured [`relay::RelayMode`].

pub mod relay;
