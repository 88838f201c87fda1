//! TCP acceptor and shared per-server state.
//!
//! [`ServerContext`] carries everything connections share: configuration,
//! the frozen message registry, the transform pipeline, the event listener,
//! the receive buffer pool, the live-connection table, and the byte
//! counters. [`TransportServer`] runs the accept loop, spawning a
//! [`Connection`] per accepted socket, with exponential backoff on transient
//! accept failures and graceful shutdown through a cancellation token.

use std::{
    io,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use dashmap::DashMap;
use log::{info, warn};
use tokio::net::TcpListener;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::{
    buffer_pool::BufferPool,
    config::ServerConfig,
    connection::Connection,
    error::Result,
    events::ConnectionListener,
    pipeline::Pipeline,
    registry::MessageRegistry,
};

/// Initial delay after a failed `accept`.
const ACCEPT_BACKOFF_INITIAL: Duration = Duration::from_millis(50);

/// Ceiling for the accept backoff delay.
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// State shared by a server and all of its connections.
pub struct ServerContext {
    config: ServerConfig,
    registry: Arc<MessageRegistry>,
    pipeline: Arc<Pipeline>,
    listener: Arc<dyn ConnectionListener>,
    pool: BufferPool,
    connections: DashMap<SocketAddr, Arc<Connection>>,
    tracker: TaskTracker,
    bytes_received: AtomicU64,
    bytes_sent: AtomicU64,
    processing: AtomicBool,
}

impl ServerContext {
    /// Assemble the shared state.
    ///
    /// The registry must already hold every variant the server will carry;
    /// it cannot grow once connections are accepted.
    #[must_use]
    pub fn new(
        config: ServerConfig,
        registry: Arc<MessageRegistry>,
        pipeline: Arc<Pipeline>,
        listener: Arc<dyn ConnectionListener>,
    ) -> Arc<Self> {
        let pool = BufferPool::new(config.receive_buffer_size(), config.pool_capacity());
        Arc::new(Self {
            config,
            registry,
            pipeline,
            listener,
            pool,
            connections: DashMap::new(),
            tracker: TaskTracker::new(),
            bytes_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            processing: AtomicBool::new(false),
        })
    }

    /// Server configuration.
    #[must_use]
    pub fn config(&self) -> &ServerConfig { &self.config }

    /// Frozen message registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<MessageRegistry> { &self.registry }

    /// Transform pipeline applied to every payload.
    #[must_use]
    pub fn pipeline(&self) -> &Arc<Pipeline> { &self.pipeline }

    /// Event listener shared by all connections.
    #[must_use]
    pub fn listener(&self) -> &Arc<dyn ConnectionListener> { &self.listener }

    /// Receive buffer pool.
    #[must_use]
    pub fn pool(&self) -> &BufferPool { &self.pool }

    /// Total bytes received across all connections.
    #[must_use]
    pub fn bytes_received(&self) -> u64 { self.bytes_received.load(Ordering::Relaxed) }

    /// Total bytes sent across all connections.
    #[must_use]
    pub fn bytes_sent(&self) -> u64 { self.bytes_sent.load(Ordering::Relaxed) }

    /// Number of live connections.
    #[must_use]
    pub fn connection_count(&self) -> usize { self.connections.len() }

    /// Look up a live connection by remote endpoint.
    #[must_use]
    pub fn connection(&self, peer_addr: SocketAddr) -> Option<Arc<Connection>> {
        self.connections.get(&peer_addr).map(|entry| entry.value().clone())
    }

    /// Enter or leave batch-processing mode.
    ///
    /// While set, disconnecting connections do not remove themselves from
    /// the table, so the caller may iterate it safely.
    pub fn set_processing(&self, processing: bool) {
        self.processing.store(processing, Ordering::Release);
    }

    /// Whether batch-processing mode is active.
    #[must_use]
    pub fn is_processing(&self) -> bool { self.processing.load(Ordering::Acquire) }

    /// Disconnect every live connection and clear the table.
    pub fn disconnect_all(&self) {
        self.set_processing(true);
        for entry in &self.connections {
            entry.value().disconnect();
        }
        self.connections.clear();
        self.set_processing(false);
    }

    pub(crate) fn add_bytes_received(&self, count: u64) {
        self.bytes_received.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn add_bytes_sent(&self, count: u64) {
        self.bytes_sent.fetch_add(count, Ordering::Relaxed);
    }

    /// Tracker following every pump task spawned by this server's
    /// connections; [`TransportServer::shutdown`] waits on it.
    #[must_use]
    pub fn tracker(&self) -> &TaskTracker { &self.tracker }

    pub(crate) fn insert_connection(&self, connection: &Arc<Connection>) {
        self.connections
            .insert(connection.peer_addr(), Arc::clone(connection));
    }

    pub(crate) fn remove_connection(&self, peer_addr: SocketAddr) {
        self.connections.remove(&peer_addr);
    }
}

/// TCP server accepting connections into a [`ServerContext`].
pub struct TransportServer {
    context: Arc<ServerContext>,
    shutdown: CancellationToken,
}

impl TransportServer {
    /// Create a server over prepared shared state.
    #[must_use]
    pub fn new(context: Arc<ServerContext>) -> Self {
        Self {
            context,
            shutdown: CancellationToken::new(),
        }
    }

    /// Shared state handle.
    #[must_use]
    pub fn context(&self) -> &Arc<ServerContext> { &self.context }

    /// Token cancelled when [`shutdown`](Self::shutdown) is called.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken { self.shutdown.clone() }

    /// Bind a listener on `addr`.
    ///
    /// # Errors
    ///
    /// Propagates the bind failure.
    pub async fn bind(addr: SocketAddr) -> io::Result<TcpListener> {
        TcpListener::bind(addr).await
    }

    /// Accept connections until the shutdown token fires.
    ///
    /// Transient accept failures back off exponentially up to one second.
    /// Failures to start an accepted connection (for example buffer pool
    /// exhaustion) drop that socket and keep accepting.
    ///
    /// # Errors
    ///
    /// Currently infallible at the loop level; the signature leaves room for
    /// fatal listener errors.
    pub async fn run(&self, listener: TcpListener) -> Result<()> {
        let local_addr = listener.local_addr()?;
        info!("server listening: addr={local_addr}");
        let mut backoff = ACCEPT_BACKOFF_INITIAL;

        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer_addr)) => {
                        backoff = ACCEPT_BACKOFF_INITIAL;
                        let child = self.shutdown.child_token();
                        match Connection::spawn(stream, Arc::clone(&self.context), child) {
                            Ok(_) => {}
                            Err(e) => {
                                warn!("connection rejected: peer={peer_addr}, error={e}");
                            }
                        }
                    }
                    Err(e) => {
                        warn!("accept failed: error={e}, retry_in={backoff:?}");
                        tokio::time::sleep(backoff).await;
                        backoff = (backoff * 2).min(ACCEPT_BACKOFF_MAX);
                    }
                },
            }
        }

        info!("server stopped accepting: addr={local_addr}");
        Ok(())
    }

    /// Stop accepting, disconnect every connection, and wait for the pump
    /// tasks to finish.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.context.disconnect_all();
        self.context.tracker.close();
        self.context.tracker.wait().await;
    }
}
