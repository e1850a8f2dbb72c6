//! StreamServer: TCP accept loop, session table, and the dedicated I/O thread.
//!
//! # Threading model
//!
//! ```text
//!  application threads                       msgstream-io thread
//!  ───────────────────                       ───────────────────
//!  StreamServer::start ──spawn──────────────► current-thread runtime
//!        ▲                                     ├─ bind + listen
//!        └──── local_addr / bind error ◄───────┤
//!                                              ├─ accept loop ──► Session::start (read task)
//!  send / send_to_all ──► OutboundQueue ──────►├─ write tasks (spawned via Handle)
//!  events.recv()      ◄── ServerEvent ◄────────┤
//!  stop / Drop ───────── shutdown signal ─────►└─ stop accepting, drop sessions, exit
//! ```
//!
//! All socket I/O for every session runs on that one thread, so no two
//! handlers ever run at the same time.  Application threads only touch the
//! session table (guarded by its own mutex) and the per-session outbound
//! queues (each guarded by a separate mutex).
//!
//! Events are delivered over an unbounded channel so the I/O thread never
//! waits on the application and a disconnection notice is never dropped.

use std::collections::BTreeMap;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc as std_mpsc, Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use thiserror::Error;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::runtime::{Builder, Handle};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use msgstream_core::protocol::{ClientId, ClientIdAllocator, CodecError, FrameHeader, MessageCodec};
use msgstream_core::transport::{OutboundEntry, TransportError};

use super::session::{Session, SessionConfig};

/// Pending-connection backlog passed to `listen`.
const LISTEN_BACKLOG: u32 = 1024;

/// Error type for server operations.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("bind failed on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("I/O runtime error: {0}")]
    Runtime(#[source] io::Error),
    #[error("client not found: {0}")]
    ClientNotFound(ClientId),
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

/// Configuration for the server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_address: IpAddr,
    /// TCP port to listen on.  `0` lets the OS pick one; see
    /// [`StreamServer::local_addr`].
    pub port: u16,
    pub session: SessionConfig,
    /// Pause after an accept error that suggests resource exhaustion.
    pub accept_backoff: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 4444,
            session: SessionConfig::default(),
            accept_backoff: Duration::from_millis(100),
        }
    }
}

/// Events emitted by the server to the application layer.
#[derive(Debug)]
pub enum ServerEvent<M> {
    ClientConnected {
        client_id: ClientId,
        peer_addr: SocketAddr,
    },
    /// Emitted exactly once per session, after it left the session table.
    ClientDisconnected {
        client_id: ClientId,
        reason: TransportError,
    },
    MessageReceived {
        client_id: ClientId,
        component_id: u16,
        msg_type: u16,
        message: M,
    },
    /// The listening socket failed for good; no more clients will be accepted.
    /// Existing sessions keep running.
    ListenerFailed { error: io::Error },
}

// ── Shared state ──────────────────────────────────────────────────────────────

/// State shared between the public handle, the I/O thread, and every session.
pub(crate) struct ServerShared<C: MessageCodec> {
    codec: Arc<C>,
    sessions: Mutex<BTreeMap<ClientId, Arc<Session<C>>>>,
    ids: ClientIdAllocator,
    events: mpsc::UnboundedSender<ServerEvent<C::Message>>,
    session_config: SessionConfig,
}

impl<C: MessageCodec> ServerShared<C> {
    pub(crate) fn new(
        codec: C,
        session_config: SessionConfig,
    ) -> (Self, mpsc::UnboundedReceiver<ServerEvent<C::Message>>) {
        let (events, event_rx) = mpsc::unbounded_channel();
        let shared = Self {
            codec: Arc::new(codec),
            sessions: Mutex::new(BTreeMap::new()),
            ids: ClientIdAllocator::new(),
            events,
            session_config,
        };
        (shared, event_rx)
    }

    fn lock_sessions(&self) -> MutexGuard<'_, BTreeMap<ClientId, Arc<Session<C>>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn session(&self, client_id: ClientId) -> Option<Arc<Session<C>>> {
        self.lock_sessions().get(&client_id).cloned()
    }

    fn emit(&self, event: ServerEvent<C::Message>) {
        if self.events.send(event).is_err() {
            debug!("event receiver dropped; event discarded");
        }
    }

    /// Registers a freshly accepted connection and starts reading from it.
    fn accept(self: &Arc<Self>, stream: TcpStream, peer_addr: SocketAddr, runtime: &Handle) {
        let client_id = self.ids.next();
        let (reader, writer) = stream.into_split();
        let session = Arc::new(Session::new(
            client_id,
            peer_addr,
            Arc::clone(&self.codec),
            writer,
            runtime.clone(),
            Arc::downgrade(self),
        ));

        self.lock_sessions().insert(client_id, Arc::clone(&session));
        info!("client {client_id} connected from {peer_addr}");
        self.emit(ServerEvent::ClientConnected {
            client_id,
            peer_addr,
        });

        session.start(reader, &self.session_config);
    }

    pub(crate) fn message_received(&self, client_id: ClientId, header: FrameHeader, message: C::Message) {
        self.emit(ServerEvent::MessageReceived {
            client_id,
            component_id: header.component_id,
            msg_type: header.msg_type,
            message,
        });
    }

    /// Removes the session and announces its end.  Called at most once per
    /// session.
    pub(crate) fn session_disconnected(&self, client_id: ClientId, reason: TransportError) {
        let removed = self.lock_sessions().remove(&client_id);
        if removed.is_none() {
            debug!("client {client_id} already removed from session table");
        }
        match &reason {
            TransportError::Closed | TransportError::ClosedLocally => {
                info!("client {client_id} disconnected: {reason}")
            }
            _ => warn!("client {client_id} disconnected: {reason}"),
        }
        self.emit(ServerEvent::ClientDisconnected { client_id, reason });
        // The table's Arc is dropped here, outside the lock.
        drop(removed);
    }

    /// Drops every session without emitting events.  Returns how many there were.
    fn clear_sessions(&self) -> usize {
        let sessions = std::mem::take(&mut *self.lock_sessions());
        sessions.len()
    }
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Multi-client framed message server.
///
/// # Examples
///
/// ```rust,no_run
/// use msgstream_core::protocol::RawCodec;
/// use msgstream_server::infrastructure::network::{ServerConfig, ServerEvent, StreamServer};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = ServerConfig { port: 0, ..ServerConfig::default() };
/// let (server, mut events) = StreamServer::start(config, RawCodec)?;
/// println!("listening on {}", server.local_addr());
///
/// while let Some(event) = events.blocking_recv() {
///     if let ServerEvent::MessageReceived { client_id, component_id, msg_type, message } = event {
///         server.send(client_id, component_id, msg_type, &message)?;
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub struct StreamServer<C: MessageCodec> {
    shared: Arc<ServerShared<C>>,
    local_addr: SocketAddr,
    running: Arc<AtomicBool>,
    shutdown: Option<oneshot::Sender<()>>,
    io_thread: Option<JoinHandle<()>>,
}

impl<C: MessageCodec> StreamServer<C> {
    /// Binds the listener and starts the I/O thread.
    ///
    /// Returns the server handle and the receiver for [`ServerEvent`]s.
    ///
    /// # Errors
    ///
    /// - [`ServerError::BindFailed`] if the address cannot be bound.
    /// - [`ServerError::Runtime`] if the I/O thread or its runtime cannot start.
    pub fn start(
        config: ServerConfig,
        codec: C,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ServerEvent<C::Message>>), ServerError> {
        let addr = SocketAddr::new(config.bind_address, config.port);
        let (shared, event_rx) = ServerShared::new(codec, config.session);
        let shared = Arc::new(shared);
        let running = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = std_mpsc::sync_channel(1);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let io_thread = thread::Builder::new()
            .name("msgstream-io".to_string())
            .spawn({
                let shared = Arc::clone(&shared);
                let running = Arc::clone(&running);
                let backoff = config.accept_backoff;
                move || {
                    run_io_thread(shared, addr, backoff, ready_tx, shutdown_rx);
                    running.store(false, Ordering::Release);
                }
            })
            .map_err(ServerError::Runtime)?;

        let startup = ready_rx.recv().unwrap_or_else(|_| {
            Err(ServerError::Runtime(io::Error::new(
                io::ErrorKind::Other,
                "I/O thread exited during startup",
            )))
        });
        let local_addr = match startup {
            Ok(local_addr) => local_addr,
            Err(e) => {
                if io_thread.join().is_err() {
                    error!("I/O thread panicked during startup");
                }
                return Err(e);
            }
        };

        info!("stream server listening on {local_addr}");
        let server = Self {
            shared,
            local_addr,
            running,
            shutdown: Some(shutdown_tx),
            io_thread: Some(io_thread),
        };
        Ok((server, event_rx))
    }

    /// Sends `message` to one client.
    ///
    /// # Errors
    ///
    /// - [`ServerError::ClientNotFound`] if no session has this id.
    /// - [`ServerError::Codec`] if the message cannot be serialized.
    pub fn send(
        &self,
        client_id: ClientId,
        component_id: u16,
        msg_type: u16,
        message: &C::Message,
    ) -> Result<(), ServerError> {
        let session = self
            .shared
            .session(client_id)
            .ok_or(ServerError::ClientNotFound(client_id))?;
        session.send(component_id, msg_type, message)
    }

    /// Sends `message` to every connected client, serializing it once.
    ///
    /// Returns the number of sessions the frame was queued on.  Sessions that
    /// are closing are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Codec`] if the message cannot be serialized.
    pub fn send_to_all(
        &self,
        component_id: u16,
        msg_type: u16,
        message: &C::Message,
    ) -> Result<usize, ServerError> {
        let (header, payload) = self.shared.codec.serialize(component_id, msg_type, message)?;
        let entry = OutboundEntry::new(header, payload)?;
        let sessions: Vec<Arc<Session<C>>> =
            self.shared.lock_sessions().values().cloned().collect();

        let queued = sessions
            .iter()
            .filter(|session| session.enqueue(entry.clone()).is_ok())
            .count();
        debug!(
            "broadcast {component_id}:{msg_type} queued on {queued}/{} session(s)",
            sessions.len()
        );
        Ok(queued)
    }

    /// Closes one client's connection from the server side.
    ///
    /// The client is reported through a single
    /// [`ServerEvent::ClientDisconnected`] with [`TransportError::ClosedLocally`].
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::ClientNotFound`] if no session has this id.
    pub fn disconnect(&self, client_id: ClientId) -> Result<(), ServerError> {
        let session = self
            .shared
            .session(client_id)
            .ok_or(ServerError::ClientNotFound(client_id))?;
        session.close_locally();
        Ok(())
    }

    /// Ids of all connected clients, in ascending order.
    pub fn clients(&self) -> Vec<ClientId> {
        self.shared.lock_sessions().keys().copied().collect()
    }

    pub fn client_count(&self) -> usize {
        self.shared.lock_sessions().len()
    }

    pub fn peer_addr(&self, client_id: ClientId) -> Option<SocketAddr> {
        self.shared.session(client_id).map(|s| s.peer_addr())
    }

    /// The address the listener is bound to.  Reports the real port when the
    /// server was started with port `0`.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns `false` once the I/O thread has exited.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stops accepting, closes every session, and joins the I/O thread.
    ///
    /// This is also how sessions end after [`ServerEvent::ListenerFailed`].
    ///
    /// Sessions closed this way are not reported as disconnected.  Calling
    /// `stop` more than once is harmless.
    pub fn stop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            // The receiver is gone if the accept loop already ended.
            let _ = shutdown.send(());
        }
        if let Some(io_thread) = self.io_thread.take() {
            if io_thread.join().is_err() {
                error!("I/O thread panicked");
            }
            info!("stream server on {} stopped", self.local_addr);
        }
    }
}

impl<C: MessageCodec> Drop for StreamServer<C> {
    fn drop(&mut self) {
        self.stop();
    }
}

impl<C: MessageCodec> std::fmt::Debug for StreamServer<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamServer")
            .field("local_addr", &self.local_addr)
            .field("clients", &self.client_count())
            .field("running", &self.is_running())
            .finish()
    }
}

// ── I/O thread ────────────────────────────────────────────────────────────────

fn run_io_thread<C: MessageCodec>(
    shared: Arc<ServerShared<C>>,
    addr: SocketAddr,
    backoff: Duration,
    ready: std_mpsc::SyncSender<Result<SocketAddr, ServerError>>,
    shutdown: oneshot::Receiver<()>,
) {
    let runtime = match Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            let _ = ready.send(Err(ServerError::Runtime(e)));
            return;
        }
    };

    runtime.block_on(async {
        let listener = match bind_listener(addr) {
            Ok(listener) => listener,
            Err(e) => {
                let _ = ready.send(Err(e));
                return;
            }
        };
        let local_addr = match listener.local_addr() {
            Ok(local_addr) => local_addr,
            Err(e) => {
                let _ = ready.send(Err(ServerError::Runtime(e)));
                return;
            }
        };
        if ready.send(Ok(local_addr)).is_err() {
            return;
        }

        serve(&shared, &listener, backoff, shutdown).await;
    });
    // Dropping the runtime cancels the remaining read and write tasks, which
    // releases the last references to every session.
}

/// Binds with address reuse so a restarted server can take over the port
/// while old connections sit in TIME_WAIT.
fn bind_listener(addr: SocketAddr) -> Result<TcpListener, ServerError> {
    let bind_failed = |source: io::Error| ServerError::BindFailed { addr, source };
    let socket = match addr {
        SocketAddr::V4(_) => TcpSocket::new_v4(),
        SocketAddr::V6(_) => TcpSocket::new_v6(),
    }
    .map_err(bind_failed)?;
    socket.set_reuseaddr(true).map_err(bind_failed)?;
    socket.bind(addr).map_err(bind_failed)?;
    socket.listen(LISTEN_BACKLOG).map_err(bind_failed)
}

/// Source of incoming connections for the accept loop.
trait Acceptor {
    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)>;
}

impl Acceptor for TcpListener {
    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        TcpListener::accept(self).await
    }
}

/// Why the accept loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AcceptExit {
    Shutdown,
    ListenerFailed,
}

/// Accepts until shutdown, then drops every session.
///
/// A failed listener only ends accepting.  Sessions already connected keep
/// being served until shutdown is requested.
async fn serve<C: MessageCodec, A: Acceptor>(
    shared: &Arc<ServerShared<C>>,
    listener: &A,
    backoff: Duration,
    mut shutdown: oneshot::Receiver<()>,
) {
    if accept_loop(shared, listener, backoff, &mut shutdown).await == AcceptExit::ListenerFailed {
        info!("no longer accepting; serving existing sessions until shutdown");
        // The sender is dropped without a signal only when the handle is gone.
        let _ = shutdown.await;
    }
    let dropped = shared.clear_sessions();
    debug!("shutting down; released {dropped} session(s)");
}

/// What the accept loop does after a failed `accept`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AcceptFailure {
    /// The pending connection died before it was accepted; try again now.
    Retry,
    /// Likely resource exhaustion (e.g. out of file descriptors); pause first.
    Backoff,
    /// The listener itself is unusable.
    Fatal,
}

fn classify_accept_error(error: &io::Error) -> AcceptFailure {
    match error.kind() {
        io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionRefused
        | io::ErrorKind::Interrupted
        | io::ErrorKind::WouldBlock => AcceptFailure::Retry,
        io::ErrorKind::InvalidInput
        | io::ErrorKind::NotConnected
        | io::ErrorKind::PermissionDenied
        | io::ErrorKind::Unsupported => AcceptFailure::Fatal,
        _ => AcceptFailure::Backoff,
    }
}

async fn accept_loop<C: MessageCodec, A: Acceptor>(
    shared: &Arc<ServerShared<C>>,
    listener: &A,
    backoff: Duration,
    shutdown: &mut oneshot::Receiver<()>,
) -> AcceptExit {
    let runtime = Handle::current();
    loop {
        let accepted = tokio::select! {
            _ = &mut *shutdown => {
                debug!("shutdown requested; no longer accepting");
                return AcceptExit::Shutdown;
            }
            accepted = listener.accept() => accepted,
        };

        let error = match accepted {
            Ok((stream, peer_addr)) => {
                shared.accept(stream, peer_addr, &runtime);
                continue;
            }
            Err(error) => error,
        };

        match classify_accept_error(&error) {
            AcceptFailure::Retry => debug!("transient accept error: {error}"),
            AcceptFailure::Backoff => {
                warn!("accept error: {error}; retrying in {backoff:?}");
                tokio::select! {
                    _ = &mut *shutdown => return AcceptExit::Shutdown,
                    _ = tokio::time::sleep(backoff) => {}
                }
            }
            AcceptFailure::Fatal => {
                error!("listener failed: {error}");
                shared.emit(ServerEvent::ListenerFailed { error });
                return AcceptExit::ListenerFailed;
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
