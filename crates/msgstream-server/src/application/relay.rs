//! Relay: the server binary's use case for incoming events.
//!
//! The relay consumes [`ServerEvent`]s and reacts according to its
//! [`RelayMode`]:
//!
//! - `LogOnly`   – record and log every event, send nothing.
//! - `Echo`      – send each received message back to the client it came from.
//! - `Broadcast` – send each received message to every connected client.
//!
//! # Architecture
//!
//! The relay depends only on the [`MessageSink`] trait.  [`StreamServer`]
//! implements it for the real binary; unit tests inject a mock.

use std::ops::ControlFlow;

use msgstream_core::protocol::{ClientId, MessageCodec};
use tracing::{debug, error, info, warn};

use crate::infrastructure::network::{ServerError, ServerEvent, StreamServer};

/// Outbound side of a server as seen by the relay.
#[cfg_attr(test, mockall::automock)]
pub trait MessageSink<M: 'static> {
    /// Sends one message to one client.
    fn send(
        &self,
        client_id: ClientId,
        component_id: u16,
        msg_type: u16,
        message: &M,
    ) -> Result<(), ServerError>;

    /// Sends one message to every client; returns how many it was queued for.
    fn send_to_all(&self, component_id: u16, msg_type: u16, message: &M)
        -> Result<usize, ServerError>;
}

impl<C: MessageCodec> MessageSink<C::Message> for StreamServer<C> {
    fn send(
        &self,
        client_id: ClientId,
        component_id: u16,
        msg_type: u16,
        message: &C::Message,
    ) -> Result<(), ServerError> {
        StreamServer::send(self, client_id, component_id, msg_type, message)
    }

    fn send_to_all(
        &self,
        component_id: u16,
        msg_type: u16,
        message: &C::Message,
    ) -> Result<usize, ServerError> {
        StreamServer::send_to_all(self, component_id, msg_type, message)
    }
}

/// What the relay does with received messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RelayMode {
    #[default]
    LogOnly,
    Echo,
    Broadcast,
}

/// Counters kept by the relay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub connected: u64,
    pub disconnected: u64,
    pub received: u64,
    /// Frames queued by echo or broadcast.
    pub relayed: u64,
    /// Echo or broadcast attempts that failed.
    pub failed: u64,
}

/// Event handler that logs, echoes, or broadcasts.
pub struct Relay<'a, S: ?Sized> {
    sink: &'a S,
    mode: RelayMode,
    stats: RelayStats,
}

impl<'a, S: ?Sized> Relay<'a, S> {
    pub fn new(sink: &'a S, mode: RelayMode) -> Self {
        Self {
            sink,
            mode,
            stats: RelayStats::default(),
        }
    }

    pub fn mode(&self) -> RelayMode {
        self.mode
    }

    pub fn stats(&self) -> RelayStats {
        self.stats
    }

    /// Handles one event.
    ///
    /// Returns [`ControlFlow::Break`] when the listener has failed and the
    /// caller should shut down.
    pub fn handle<M: 'static>(&mut self, event: ServerEvent<M>) -> ControlFlow<()>
    where
        S: MessageSink<M>,
    {
        match event {
            ServerEvent::ClientConnected {
                client_id,
                peer_addr,
            } => {
                self.stats.connected += 1;
                info!("relay: client {client_id} joined from {peer_addr}");
            }
            ServerEvent::ClientDisconnected { client_id, reason } => {
                self.stats.disconnected += 1;
                info!("relay: client {client_id} left ({reason})");
            }
            ServerEvent::MessageReceived {
                client_id,
                component_id,
                msg_type,
                message,
            } => {
                self.stats.received += 1;
                debug!("relay: message {component_id}:{msg_type} from client {client_id}");
                self.relay(client_id, component_id, msg_type, &message);
            }
            ServerEvent::ListenerFailed { error } => {
                error!("relay: listener failed: {error}");
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    fn relay<M: 'static>(&mut self, client_id: ClientId, component_id: u16, msg_type: u16, message: &M)
    where
        S: MessageSink<M>,
    {
        let result = match self.mode {
            RelayMode::LogOnly => return,
            RelayMode::Echo => self
                .sink
                .send(client_id, component_id, msg_type, message)
                .map(|()| 1),
            RelayMode::Broadcast => self.sink.send_to_all(component_id, msg_type, message),
        };

        match result {
            Ok(count) => self.stats.relayed += count as u64,
            Err(ServerError::ClientNotFound(gone)) => {
                self.stats.failed += 1;
                warn!("relay: client {gone} left before the echo was queued");
            }
            Err(e) => {
                self.stats.failed += 1;
                warn!("relay: failed to relay message from client {client_id}: {e}");
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
