//! Network infrastructure for the client.
//!
//! Handles the single TCP connection to a msgstream server and dispatches
//! inbound messages to the application as [`ClientEvent`]s.
//!
//! Architecture:
//! - `StreamClient` is a cheap handle around a shared `Connection`.
//! - A read task on the caller's runtime decodes frames and forwards them on
//!   an unbounded `mpsc` channel.
//! - `send` serializes on the calling thread and hands the frame to the
//!   outbound queue; the first sender after an idle period spawns the write
//!   task that drains it.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info, warn};

use msgstream_core::protocol::{CodecError, MessageCodec};
use msgstream_core::transport::inbound::DEFAULT_INITIAL_BUFFER_SIZE;
use msgstream_core::transport::{drain, FrameReader, OutboundEntry, OutboundQueue, TransportError};

/// Errors that can occur in the client network layer.
#[derive(Debug, Error)]
pub enum ClientError {
    /// TCP connection to the server failed.
    #[error("failed to connect to server: {0}")]
    ConnectFailed(#[source] std::io::Error),
    /// The connection is closed; no more messages can be sent.
    #[error("not connected")]
    NotConnected,
    /// The message could not be serialized.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

/// Receive-side tuning for the client connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub initial_buffer_size: usize,
    /// Largest payload the server may send.  Larger frames end the connection.
    pub max_payload_size: usize,
    /// Disable Nagle's algorithm on the socket.
    pub nodelay: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            initial_buffer_size: DEFAULT_INITIAL_BUFFER_SIZE,
            max_payload_size: u32::MAX as usize,
            nodelay: true,
        }
    }
}

/// Events emitted by the connection to the application.
#[derive(Debug)]
pub enum ClientEvent<M> {
    MessageReceived {
        component_id: u16,
        msg_type: u16,
        message: M,
    },
    /// The connection ended.  Emitted exactly once.
    Disconnected { reason: TransportError },
}

struct Connection<C: MessageCodec> {
    codec: Arc<C>,
    queue: OutboundQueue,
    writer: Mutex<OwnedWriteHalf>,
    runtime: Handle,
    closing: watch::Sender<bool>,
    connected: AtomicBool,
    events: mpsc::UnboundedSender<ClientEvent<C::Message>>,
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
}

impl<C: MessageCodec> Connection<C> {
    fn enqueue(self: &Arc<Self>, entry: OutboundEntry) -> Result<(), ClientError> {
        if let Some(first) = self.queue.enqueue(entry).map_err(|_| ClientError::NotConnected)? {
            let conn = Arc::clone(self);
            self.runtime.spawn(conn.write_loop(first));
        }
        Ok(())
    }

    async fn write_loop(self: Arc<Self>, first: OutboundEntry) {
        let mut closing = self.closing.subscribe();
        let mut writer = self.writer.lock().await;
        // A write stuck on a server that stopped reading is abandoned on close.
        let result = tokio::select! {
            biased;
            _ = closed(&mut closing) => return,
            result = drain(&mut *writer, &self.queue, first) => result,
        };
        drop(writer);
        if let Err(error) = result {
            self.disconnected(TransportError::Io(error));
        }
    }

    async fn read_loop(self: Arc<Self>, mut reader: FrameReader<OwnedReadHalf>) {
        let mut closing = self.closing.subscribe();
        let reason = loop {
            let frame = tokio::select! {
                biased;
                _ = closed(&mut closing) => break TransportError::ClosedLocally,
                frame = reader.read_frame() => frame,
            };
            let (header, payload) = match frame {
                Ok(frame) => frame,
                Err(error) => break error,
            };
            // Nothing is delivered after the disconnection was reported.
            if !self.connected.load(Ordering::Acquire) {
                break TransportError::ClosedLocally;
            }
            match self.codec.deserialize(&header, payload) {
                Ok(message) => {
                    let event = ClientEvent::MessageReceived {
                        component_id: header.component_id,
                        msg_type: header.msg_type,
                        message,
                    };
                    if self.events.send(event).is_err() {
                        debug!("client event receiver dropped; message discarded");
                    }
                }
                Err(error) => break TransportError::Codec(error),
            }
        };
        self.disconnected(reason);
    }

    /// Tears the connection down once, whoever notices first.
    fn disconnected(self: &Arc<Self>, reason: TransportError) {
        if !self.connected.swap(false, Ordering::AcqRel) {
            return;
        }
        self.closing.send_replace(true);
        let dropped = self.queue.abandon();
        if dropped > 0 {
            debug!("discarded {dropped} queued frame(s)");
        }

        // Half-close so the server sees end-of-stream even while this handle
        // is still alive.
        let conn = Arc::clone(self);
        self.runtime.spawn(async move {
            let mut writer = conn.writer.lock().await;
            if let Err(e) = writer.shutdown().await {
                debug!("shutdown of write half failed: {e}");
            }
        });

        match &reason {
            TransportError::Closed | TransportError::ClosedLocally => {
                info!("disconnected from {}: {reason}", self.peer_addr)
            }
            _ => warn!("disconnected from {}: {reason}", self.peer_addr),
        }
        if self.events.send(ClientEvent::Disconnected { reason }).is_err() {
            debug!("client event receiver dropped; disconnection not delivered");
        }
    }
}

/// Resolves once the connection is closing.
async fn closed(closing: &mut watch::Receiver<bool>) {
    let _ = closing.wait_for(|closing| *closing).await;
}

/// Handle to one connection to a msgstream server.
///
/// Dropping the handle closes the connection.
pub struct StreamClient<C: MessageCodec> {
    conn: Arc<Connection<C>>,
}

impl<C: MessageCodec> StreamClient<C> {
    /// Connects to `addr` and starts reading on the current Tokio runtime.
    ///
    /// Returns the client and the receiver for its [`ClientEvent`]s.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::ConnectFailed`] if the TCP connection cannot be
    /// established.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub async fn connect<A: ToSocketAddrs>(
        addr: A,
        codec: C,
        config: ClientConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ClientEvent<C::Message>>), ClientError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(ClientError::ConnectFailed)?;
        if config.nodelay {
            stream.set_nodelay(true).map_err(ClientError::ConnectFailed)?;
        }
        let local_addr = stream.local_addr().map_err(ClientError::ConnectFailed)?;
        let peer_addr = stream.peer_addr().map_err(ClientError::ConnectFailed)?;
        let (read_half, write_half) = stream.into_split();

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let conn = Arc::new(Connection {
            codec: Arc::new(codec),
            queue: OutboundQueue::new(),
            writer: Mutex::new(write_half),
            runtime: Handle::current(),
            closing: watch::channel(false).0,
            connected: AtomicBool::new(true),
            events: event_tx,
            local_addr,
            peer_addr,
        });

        let reader = FrameReader::new(read_half, config.initial_buffer_size, config.max_payload_size);
        tokio::spawn(Arc::clone(&conn).read_loop(reader));

        info!("connected to {peer_addr} from {local_addr}");
        Ok((Self { conn }, event_rx))
    }

    /// Serializes `message` and queues it for transmission.
    ///
    /// Callable from any thread.  Frames leave in call order.
    ///
    /// # Errors
    ///
    /// - [`ClientError::NotConnected`] after the connection has ended.
    /// - [`ClientError::Codec`] if the message cannot be serialized.
    pub fn send(&self, component_id: u16, msg_type: u16, message: &C::Message) -> Result<(), ClientError> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }
        let (header, payload) = self.conn.codec.serialize(component_id, msg_type, message)?;
        let entry = OutboundEntry::new(header, payload)?;
        self.conn.enqueue(entry)
    }

    /// Closes the connection.  Emits [`ClientEvent::Disconnected`] with
    /// [`TransportError::ClosedLocally`] unless the connection already ended.
    pub fn disconnect(&self) {
        self.conn.disconnected(TransportError::ClosedLocally);
    }

    pub fn is_connected(&self) -> bool {
        self.conn.connected.load(Ordering::Acquire)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.conn.local_addr
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.conn.peer_addr
    }
}

impl<C: MessageCodec> Drop for StreamClient<C> {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl<C: MessageCodec> std::fmt::Debug for StreamClient<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamClient")
            .field("local_addr", &self.conn.local_addr)
            .field("peer_addr", &self.conn.peer_addr)
            .field("connected", &self.is_connected())
            .finish()
    }
}
