//! Session: one accepted connection and its two halves.
//!
//! A session owns the write half of its socket and the outbound queue.  The
//! read half lives inside the session's read task, which runs the
//! header-then-payload loop from [`FrameReader`] and hands every decoded
//! message to the owning server.
//!
//! # Lifetime
//!
//! Sessions are shared as `Arc<Session<C>>` between the server's session
//! table, the read task, and any in-flight write task.  Once the session has
//! been removed from the table and both tasks have finished, the last `Arc`
//! is released and the socket halves are dropped.  Dropping the write half
//! shuts down the sending direction, so the peer observes a clean close.
//!
//! # Disconnection
//!
//! A session ends for one of four reasons: a read error (including EOF), a
//! write error, a payload that cannot be decoded, or a local close.  Whatever
//! comes first wins.  The `disconnected` flag makes the notification to the
//! server idempotent, so the server emits exactly one disconnection event per
//! session no matter how many of these race.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::runtime::Handle;
use tokio::sync::{watch, Mutex};
use tracing::{debug, trace};

use msgstream_core::protocol::{ClientId, FrameHeader, MessageCodec};
use msgstream_core::transport::{
    drain, FrameReader, OutboundEntry, OutboundQueue, QueueAbandoned, TransportError,
};

use super::server::{ServerError, ServerShared};

/// Receive-side tuning shared by every session of a server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Size of the receive buffer before any growth.
    pub initial_buffer_size: usize,
    /// Largest payload a peer may announce.  Larger frames end the session.
    pub max_payload_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            initial_buffer_size: msgstream_core::transport::inbound::DEFAULT_INITIAL_BUFFER_SIZE,
            max_payload_size: u32::MAX as usize,
        }
    }
}

/// One connected client.
pub struct Session<C: MessageCodec> {
    id: ClientId,
    peer_addr: SocketAddr,
    codec: Arc<C>,
    queue: OutboundQueue,
    writer: Mutex<OwnedWriteHalf>,
    runtime: Handle,
    /// Flips to `true` once; every task of the session watches it.
    closing: watch::Sender<bool>,
    disconnected: AtomicBool,
    server: Weak<ServerShared<C>>,
}

impl<C: MessageCodec> Session<C> {
    pub(crate) fn new(
        id: ClientId,
        peer_addr: SocketAddr,
        codec: Arc<C>,
        writer: OwnedWriteHalf,
        runtime: Handle,
        server: Weak<ServerShared<C>>,
    ) -> Self {
        Self {
            id,
            peer_addr,
            codec,
            queue: OutboundQueue::new(),
            writer: Mutex::new(writer),
            runtime,
            closing: watch::channel(false).0,
            disconnected: AtomicBool::new(false),
            server,
        }
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Returns `true` once the session has been reported as disconnected.
    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::Acquire)
    }

    /// Spawns the read loop on the I/O runtime.
    pub(crate) fn start(self: &Arc<Self>, reader: OwnedReadHalf, config: &SessionConfig) {
        let reader = FrameReader::new(reader, config.initial_buffer_size, config.max_payload_size);
        let session = Arc::clone(self);
        self.runtime.spawn(session.read_loop(reader));
    }

    /// Serializes `message` and queues it for transmission.
    ///
    /// Callable from any thread.  Frames from one thread leave in call order.
    ///
    /// # Errors
    ///
    /// - [`ServerError::Codec`] if the codec cannot serialize the message.
    /// - [`ServerError::ClientNotFound`] if the session is already closing.
    pub fn send(
        self: &Arc<Self>,
        component_id: u16,
        msg_type: u16,
        message: &C::Message,
    ) -> Result<(), ServerError> {
        let (header, payload) = self.codec.serialize(component_id, msg_type, message)?;
        let entry = OutboundEntry::new(header, payload)?;
        self.enqueue(entry)
            .map_err(|QueueAbandoned| ServerError::ClientNotFound(self.id))
    }

    /// Queues an already-serialized frame, starting a write if none is in flight.
    pub(crate) fn enqueue(self: &Arc<Self>, entry: OutboundEntry) -> Result<(), QueueAbandoned> {
        if let Some(first) = self.queue.enqueue(entry)? {
            let session = Arc::clone(self);
            self.runtime.spawn(session.write_loop(first));
        }
        Ok(())
    }

    /// Closes the session from this side.
    pub(crate) fn close_locally(&self) {
        self.disconnected(TransportError::ClosedLocally);
    }

    async fn read_loop(self: Arc<Self>, mut reader: FrameReader<OwnedReadHalf>) {
        let mut closing = self.closing.subscribe();
        let reason = loop {
            let frame = tokio::select! {
                biased;
                _ = closed(&mut closing) => break TransportError::ClosedLocally,
                frame = reader.read_frame() => frame,
            };
            match frame {
                Ok((header, payload)) => {
                    trace!(
                        "client {}: frame {}:{} ({} bytes)",
                        self.id,
                        header.component_id,
                        header.msg_type,
                        header.payload_size
                    );
                    match self.codec.deserialize(&header, payload) {
                        Ok(message) => self.deliver(header, message),
                        Err(error) => break TransportError::Codec(error),
                    }
                }
                Err(error) => break error,
            }
        };
        self.disconnected(reason);
    }

    async fn write_loop(self: Arc<Self>, first: OutboundEntry) {
        let mut closing = self.closing.subscribe();
        let mut writer = self.writer.lock().await;
        let result = tokio::select! {
            biased;
            _ = closed(&mut closing) => None,
            result = drain(&mut *writer, &self.queue, first) => Some(result),
        };
        match result {
            Some(Ok(())) => {}
            Some(Err(error)) => {
                drop(writer);
                self.disconnected(TransportError::Io(error));
            }
            None => {
                debug!("client {}: pending write abandoned on close", self.id);
                if let Err(e) = writer.shutdown().await {
                    debug!("client {}: shutdown of write half failed: {e}", self.id);
                }
            }
        }
    }

    fn deliver(&self, header: FrameHeader, message: C::Message) {
        // Nothing is delivered after the disconnection was reported.
        if self.is_disconnected() {
            return;
        }
        if let Some(server) = self.server.upgrade() {
            server.message_received(self.id, header, message);
        }
    }

    /// Stops reading, drops pending writes, and reports to the server once.
    fn disconnected(&self, reason: TransportError) {
        if self.disconnected.swap(true, Ordering::AcqRel) {
            return;
        }
        self.closing.send_replace(true);
        let dropped = self.queue.abandon();
        if dropped > 0 {
            debug!("client {}: discarded {dropped} queued frame(s)", self.id);
        }
        if let Some(server) = self.server.upgrade() {
            server.session_disconnected(self.id, reason);
        }
    }
}

/// Resolves once the session is closing.
async fn closed(closing: &mut watch::Receiver<bool>) {
    // The sender lives as long as the session, so an error cannot occur
    // while a task still borrows it.
    let _ = closing.wait_for(|closing| *closing).await;
}

impl<C: MessageCodec> Drop for Session<C> {
    fn drop(&mut self) {
        debug!("client {}: session released", self.id);
    }
}

impl<C: MessageCodec> std::fmt::Debug for Session<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("queued", &self.queue.len())
            .field("disconnected", &self.is_disconnected())
            .finish()
    }
}
