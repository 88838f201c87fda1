//! Per-peer connection controller.
//!
//! A [`Connection`] owns both transfer directions of one accepted socket.
//! Three tasks drive it: a reader feeding raw chunks into a bounded channel,
//! a decode consumer running the frame decoder and receive pipeline, and a
//! writer draining the send channel through the outbound pipeline. The
//! channels replace the hand-rolled flag-and-queue protocol of the original
//! design: a closed channel is the pump-exit signal, and the channel bound is
//! the queue high-water mark.
//!
//! Exactly one consumer per direction exists by construction; the
//! `receiving`/`sending` flags mirror pump activity for observers and for
//! [`Connection::send_blocking`].

mod reader;
mod writer;

use std::{
    any::Any,
    hash::{Hash, Hasher},
    net::SocketAddr,
    sync::{
        Arc, Mutex, Weak,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use log::{debug, info};
use socket2::{SockRef, TcpKeepalive};
use tokio::{net::TcpStream, sync::mpsc};
use tokio_util::sync::CancellationToken;

use crate::{
    error::{Result, TransportError},
    metrics,
    registry::Message,
    server::ServerContext,
};

/// Poll interval for [`Connection::send_blocking`].
const SEND_DRAIN_POLL: Duration = Duration::from_millis(10);

/// One live peer connection.
///
/// Cheap to share: all methods take `&self` (or `&Arc<Self>` where the
/// listener receives the connection back). Two connections compare equal
/// when their remote `(address, port)` endpoints match.
pub struct Connection {
    peer_addr: SocketAddr,
    connected_since: Instant,
    connected: AtomicBool,
    receiving: AtomicBool,
    sending: AtomicBool,
    context: Arc<ServerContext>,
    send_tx: mpsc::Sender<Vec<u8>>,
    submit_lock: Mutex<()>,
    shutdown: CancellationToken,
    user_data: Mutex<Option<Box<dyn Any + Send + Sync>>>,
    // Handed back to the listener so callbacks can retain the connection.
    self_ref: Weak<Connection>,
}

impl Connection {
    /// Take ownership of an accepted socket and start its pumps.
    ///
    /// Configures TCP keepalive from the server context, borrows a pooled
    /// receive buffer, fires `state_changed(true)`, and registers the
    /// connection with the server.
    ///
    /// # Errors
    ///
    /// Returns an error when the peer address cannot be read, keepalive
    /// configuration fails, or the buffer pool is exhausted. All are fatal
    /// for the connection; the socket is dropped.
    pub fn spawn(
        stream: TcpStream,
        context: Arc<ServerContext>,
        shutdown: CancellationToken,
    ) -> Result<Arc<Self>> {
        let peer_addr = stream.peer_addr()?;

        let keep_alive = context.config().keep_alive();
        SockRef::from(&stream).set_tcp_keepalive(
            &TcpKeepalive::new()
                .with_time(keep_alive.time)
                .with_interval(keep_alive.interval),
        )?;

        let buffer = context.pool().acquire()?;
        let (read_half, write_half) = stream.into_split();
        let (chunk_tx, chunk_rx) = mpsc::channel(context.config().chunk_queue_capacity());
        let (send_tx, send_rx) = mpsc::channel(context.config().send_queue_capacity());

        let connection = Arc::new_cyclic(|self_ref| Self {
            peer_addr,
            connected_since: Instant::now(),
            connected: AtomicBool::new(true),
            receiving: AtomicBool::new(false),
            sending: AtomicBool::new(false),
            context,
            send_tx,
            submit_lock: Mutex::new(()),
            shutdown,
            user_data: Mutex::new(None),
            self_ref: self_ref.clone(),
        });

        connection.context.insert_connection(&connection);
        metrics::inc_connections();
        info!("connection opened: peer={peer_addr}");
        connection
            .context
            .listener()
            .state_changed(&connection, true);

        let tracker = connection.context.tracker();
        tracker.spawn(reader::run_reader(
            Arc::clone(&connection),
            read_half,
            chunk_tx,
            buffer,
        ));
        tracker.spawn(reader::run_decoder(Arc::clone(&connection), chunk_rx));
        tracker.spawn(writer::run_writer(
            Arc::clone(&connection),
            write_half,
            send_rx,
        ));

        Ok(connection)
    }

    /// Remote endpoint of the peer.
    #[must_use]
    pub fn peer_addr(&self) -> SocketAddr { self.peer_addr }

    /// Instant at which the connection was accepted.
    #[must_use]
    pub fn connected_since(&self) -> Instant { self.connected_since }

    /// Whether the connection has not yet disconnected.
    #[must_use]
    pub fn is_connected(&self) -> bool { self.connected.load(Ordering::Acquire) }

    /// Whether the decode consumer is currently draining chunks.
    #[must_use]
    pub fn is_receiving(&self) -> bool { self.receiving.load(Ordering::Acquire) }

    /// Whether the send consumer is currently draining payloads.
    #[must_use]
    pub fn is_sending(&self) -> bool { self.sending.load(Ordering::Acquire) }

    /// Server context this connection belongs to.
    #[must_use]
    pub fn context(&self) -> &Arc<ServerContext> { &self.context }

    /// Attach opaque application state to the connection.
    ///
    /// The slot is cleared on disconnect.
    pub fn set_user_data(&self, data: Box<dyn Any + Send + Sync>) {
        *self.user_data.lock().expect("user data lock poisoned") = Some(data);
    }

    /// Take the attached application state, leaving the slot empty.
    #[must_use]
    pub fn take_user_data(&self) -> Option<Box<dyn Any + Send + Sync>> {
        self.user_data.lock().expect("user data lock poisoned").take()
    }

    /// Queue a message for sending.
    ///
    /// Serialization order under the submission lock determines wire order:
    /// messages submitted from one task reach the wire in submission order,
    /// and messages from different tasks interleave at message granularity
    /// only. The `message_sent` event fires at submission, before the bytes
    /// reach the wire. Awaits when the send queue is at its high-water mark.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Disconnected`] when the connection is
    /// already down, or a registry error when serialization fails.
    pub async fn send(&self, message: &dyn Message) -> Result<()> {
        if !self.is_connected() {
            return Err(TransportError::Disconnected);
        }
        let permit = self
            .send_tx
            .reserve()
            .await
            .map_err(|_| TransportError::ChannelClosed)?;
        self.submit(message, |plaintext| permit.send(plaintext))
    }

    /// Queue a message without awaiting, failing when the queue is full.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::SendQueueFull`] at the high-water mark,
    /// [`TransportError::Disconnected`] when the connection is down, or a
    /// registry error when serialization fails.
    pub fn try_send(&self, message: &dyn Message) -> Result<()> {
        if !self.is_connected() {
            return Err(TransportError::Disconnected);
        }
        let permit = self.send_tx.try_reserve().map_err(|e| match e {
            mpsc::error::TrySendError::Full(()) => TransportError::SendQueueFull,
            mpsc::error::TrySendError::Closed(()) => TransportError::ChannelClosed,
        })?;
        self.submit(message, |plaintext| permit.send(plaintext))
    }

    /// Queue a message, then wait until the send pump has drained the queue.
    ///
    /// For callers that need write ordering relative to a subsequent
    /// [`disconnect`](Self::disconnect). Polls the pump at 10 ms intervals.
    ///
    /// # Errors
    ///
    /// As for [`send`](Self::send).
    pub async fn send_blocking(&self, message: &dyn Message) -> Result<()> {
        self.send(message).await?;
        while self.is_connected() && (self.is_sending() || !self.send_queue_idle()) {
            tokio::time::sleep(SEND_DRAIN_POLL).await;
        }
        Ok(())
    }

    /// Serialize under the submission lock, fire the event, and enqueue.
    fn submit(&self, message: &dyn Message, enqueue: impl FnOnce(Vec<u8>)) -> Result<()> {
        let _guard = self.submit_lock.lock().expect("submit lock poisoned");
        let plaintext = self.context.registry().serialize(message)?;
        self.context
            .listener()
            .message_sent(&self.arc(), message, plaintext.len(), &plaintext);
        self.sending.store(true, Ordering::Release);
        enqueue(plaintext);
        Ok(())
    }

    /// Tear the connection down.
    ///
    /// Idempotent: the first call fires `state_changed(false)`, cancels the
    /// pump tasks (closing the socket), clears the user state slot, and
    /// removes the connection from the server registry unless the server is
    /// batch-processing. Later calls are no-ops.
    pub fn disconnect(&self) {
        if self
            .connected
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        self.shutdown.cancel();
        self.user_data.lock().expect("user data lock poisoned").take();
        metrics::dec_connections();

        if !self.context.is_processing() {
            self.context.remove_connection(self.peer_addr);
        }

        info!(
            "connection closed: peer={}, uptime={:?}",
            self.peer_addr,
            self.connected_since.elapsed()
        );
        self.context.listener().state_changed(&self.arc(), false);
    }

    /// Strong handle to `self` for listener callbacks.
    ///
    /// Valid while any pump task or registry entry holds the connection,
    /// which is the case whenever an event can fire.
    fn arc(&self) -> Arc<Self> {
        self.self_ref
            .upgrade()
            .expect("connection self reference valid while events can fire")
    }

    /// Whether the send channel holds no queued payloads.
    fn send_queue_idle(&self) -> bool {
        self.send_tx.capacity() == self.send_tx.max_capacity()
    }

    pub(crate) fn set_receiving(&self, active: bool) {
        self.receiving.store(active, Ordering::Release);
    }

    pub(crate) fn set_sending(&self, active: bool) {
        self.sending.store(active, Ordering::Release);
    }

    pub(crate) async fn cancelled(&self) { self.shutdown.cancelled().await; }

    pub(crate) fn log_pump_exit(&self, pump: &str) {
        debug!("{pump} pump exited: peer={}", self.peer_addr);
    }
}

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool { self.peer_addr == other.peer_addr }
}

impl Eq for Connection {}

impl Hash for Connection {
    fn hash<H: Hasher>(&self, state: &mut H) { self.peer_addr.hash(state); }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("peer_addr", &self.peer_addr)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}
