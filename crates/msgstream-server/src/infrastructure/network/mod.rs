//! Network infrastructure for the server.
//!
//! # Sub-modules
//!
//! - **`server`** – Binds the listener, runs the accept loop on the dedicated
//!   I/O thread, owns the session table, and exposes the thread-safe
//!   [`StreamServer`] handle (`send`, `send_to_all`, `disconnect`, `stop`).
//!
//! - **`session`** – One accepted connection: the read loop feeding decoded
//!   messages to the server, and the outbound queue that keeps at most one
//!   write in flight per socket.

pub mod server;
pub mod session;

pub use server::{ServerConfig, ServerError, ServerEvent, StreamServer};
pub use session::{Session, SessionConfig};
