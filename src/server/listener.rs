//! TCP listener and server lifecycle.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

use crate::auth::{AuthGate, TokenValidator};
use crate::config::Settings;
use crate::error::{WireError, WireResult};
use crate::handler::ActionRegistry;
use crate::tls;

use super::connection::{handle_connection, stopped, ServerContext};

/// Connection metrics for monitoring.
#[derive(Debug, Default)]
pub struct ConnectionMetrics {
    /// Total connections accepted.
    pub connections_total: AtomicU64,
    /// Connections that ended with an error.
    pub connections_failed: AtomicU64,
    /// Currently active connections.
    pub active_connections: AtomicUsize,
    /// Frames dispatched to an action.
    pub requests_total: AtomicU64,
}

impl ConnectionMetrics {
    /// Create new connection metrics.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self, success: bool) {
        if !success {
            self.connections_failed.fetch_add(1, Ordering::Relaxed);
        }
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn record_request(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Get total connection count.
    pub fn total_connections(&self) -> u64 {
        self.connections_total.load(Ordering::Relaxed)
    }

    /// Get failed connection count.
    pub fn failed_connections(&self) -> u64 {
        self.connections_failed.load(Ordering::Relaxed)
    }

    /// Get dispatched request count.
    pub fn total_requests(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    /// Get active connection count.
    pub fn active(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }
}

/// Asks a running server to stop accepting and close its connections.
#[derive(Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
}

impl Shutdown {
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }
}

/// TCP (optionally TLS) protocol server.
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    ctx: Arc<ServerContext>,
    tls_acceptor: Option<TlsAcceptor>,
    /// Semaphore for connection limiting
    connection_semaphore: Arc<Semaphore>,
    shutdown: Shutdown,
}

impl Server {
    /// Create and bind a new server.
    pub async fn bind(
        settings: Settings,
        validator: Arc<dyn TokenValidator>,
        registry: ActionRegistry,
    ) -> WireResult<Self> {
        Self::bind_with_metrics(
            settings,
            validator,
            registry,
            Arc::new(ConnectionMetrics::new()),
        )
        .await
    }

    /// Create and bind a new server that reports into existing metrics.
    pub async fn bind_with_metrics(
        settings: Settings,
        validator: Arc<dyn TokenValidator>,
        registry: ActionRegistry,
        metrics: Arc<ConnectionMetrics>,
    ) -> WireResult<Self> {
        settings.validate()?;

        let tls_acceptor = match &settings.tls {
            Some(tls_config) => {
                let acceptor = tls::acceptor(tls_config)?;
                info!(
                    cert = %tls_config.cert_file.display(),
                    "TLS enabled"
                );
                Some(acceptor)
            }
            None => None,
        };

        let address = settings.bind_address();
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|e| WireError::transport(format!("Failed to bind to {}: {}", address, e)))?;
        let local_addr = listener.local_addr()?;

        // Create connection semaphore for limiting concurrent connections
        let connection_semaphore = Arc::new(Semaphore::new(settings.limits.max_connections));
        info!(
            max_connections = settings.limits.max_connections,
            "Connection limiting enabled"
        );

        info!(
            address = %local_addr,
            actions = registry.len(),
            "Server bound"
        );

        let (tx, _rx) = watch::channel(false);
        let ctx = Arc::new(ServerContext {
            settings: Arc::new(settings),
            gate: AuthGate::new(validator),
            registry: Arc::new(registry),
            metrics,
        });

        Ok(Self {
            listener,
            local_addr,
            ctx,
            tls_acceptor,
            connection_semaphore,
            shutdown: Shutdown { tx: Arc::new(tx) },
        })
    }

    /// The address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Get connection metrics.
    pub fn metrics(&self) -> Arc<ConnectionMetrics> {
        Arc::clone(&self.ctx.metrics)
    }

    /// A handle that stops this server from any task.
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Run the accept loop until shutdown is triggered, then drain.
    ///
    /// On shutdown the listener closes, idle connections close at once, and
    /// busy connections finish their current response. Connections still
    /// running after the drain timeout are aborted.
    pub async fn run(self) -> WireResult<()> {
        info!("Server running, waiting for connections...");

        let mut shutdown_rx = self.shutdown.tx.subscribe();
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                _ = stopped(&mut shutdown_rx) => {
                    info!("Shutdown requested, stopping listener");
                    break;
                }
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer)) => self.accept(&mut connections, stream, peer),
                        Err(e) => {
                            warn!(error = %e, "Failed to accept connection");
                        }
                    }
                }
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        let drain_timeout = self.ctx.settings.limits.drain_timeout();
        // Closes the listening socket before draining
        drop(self);
        drain(connections, drain_timeout).await;
        info!("Server stopped");
        Ok(())
    }

    /// Run the server on a background task.
    pub fn spawn(self) -> ServerHandle {
        let local_addr = self.local_addr;
        let metrics = self.metrics();
        let shutdown = self.shutdown_handle();
        let task = tokio::spawn(self.run());

        ServerHandle {
            local_addr,
            metrics,
            shutdown,
            task,
        }
    }

    fn accept(
        &self,
        connections: &mut JoinSet<()>,
        stream: TcpStream,
        peer: SocketAddr,
    ) {
        // Try to acquire a connection permit
        let permit = match self.connection_semaphore.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                warn!(
                    peer = %peer,
                    max = self.ctx.settings.limits.max_connections,
                    "Connection limit reached, rejecting connection"
                );
                // Dropping the stream rejects the client
                return;
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
        }

        let ctx = Arc::clone(&self.ctx);
        let tls_acceptor = self.tls_acceptor.clone();
        let shutdown_rx = self.shutdown.tx.subscribe();

        ctx.metrics.connection_opened();
        debug!(
            peer = %peer,
            active = ctx.metrics.active(),
            "New connection accepted"
        );

        connections.spawn(async move {
            // Dropped when the task completes, releasing the semaphore
            let _permit = permit;
            let metrics = Arc::clone(&ctx.metrics);

            let result = match tls_acceptor {
                Some(acceptor) => {
                    let handshake_timeout = ctx.settings.limits.handshake_timeout();
                    match tokio::time::timeout(handshake_timeout, acceptor.accept(stream)).await {
                        Ok(Ok(tls_stream)) => {
                            handle_connection(tls_stream, peer, ctx, shutdown_rx).await
                        }
                        Ok(Err(e)) => Err(WireError::Tls {
                            message: format!("Handshake failed: {}", e),
                        }),
                        Err(_) => Err(WireError::Timeout {
                            after: handshake_timeout,
                        }),
                    }
                }
                None => handle_connection(stream, peer, ctx, shutdown_rx).await,
            };

            let success = match result {
                Ok(()) => true,
                Err(e @ (WireError::Framing { .. } | WireError::Auth { .. })) => {
                    warn!(peer = %peer, error = %e, "Connection closed by protocol error");
                    false
                }
                Err(e) => {
                    error!(peer = %peer, error = %e, "Connection handler error");
                    false
                }
            };

            metrics.connection_closed(success);
            debug!(
                peer = %peer,
                active = metrics.active(),
                success = success,
                "Connection closed"
            );
        });
    }
}

/// Wait for all active connections to finish, up to the drain timeout.
async fn drain(mut connections: JoinSet<()>, drain_timeout: Duration) {
    let drained = tokio::time::timeout(drain_timeout, async {
        while connections.join_next().await.is_some() {
            debug!(remaining = connections.len(), "Waiting for connections to drain");
        }
    })
    .await;

    match drained {
        Ok(()) => info!("All connections drained"),
        Err(_) => {
            warn!(
                remaining = connections.len(),
                "Drain timeout after {}s, aborting remaining connections",
                drain_timeout.as_secs()
            );
            connections.shutdown().await;
        }
    }
}

/// Handle to a server running on a background task.
pub struct ServerHandle {
    local_addr: SocketAddr,
    metrics: Arc<ConnectionMetrics>,
    shutdown: Shutdown,
    task: JoinHandle<WireResult<()>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn metrics(&self) -> Arc<ConnectionMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Stop accepting, drain connections, and wait for the server task.
    pub async fn stop(self) -> WireResult<()> {
        self.shutdown.trigger();
        self.task.await.map_err(|e| WireError::Transport {
            message: format!("Server task failed: {}", e),
        })?
    }
}
