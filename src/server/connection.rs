//! Per-connection handler.
//!
//! Each accepted socket runs this state machine on its own task:
//!
//! ```text
//! Open --frame--> Authenticating --valid token--> Dispatching --> Responding --> Open
//!   |                  |
//!   +-- framing error, +-- invalid token (after a best-effort denial)
//!       idle timeout,
//!       peer close,
//!       shutdown     --------------------------------------------------------> Closed
//! ```

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::watch;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::auth::AuthGate;
use crate::config::Settings;
use crate::error::{WireError, WireResult};
use crate::handler::{response_for, ActionContext, ActionRegistry};
use crate::protocol::{
    parse_payload, read_frame_with_timeout, write_message_with_timeout, Body, IncomingRequest,
    Response, CODE_FAILURE,
};

use super::ConnectionMetrics;

/// States of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Waiting for the next frame.
    Open,
    /// Frame read, token being checked.
    Authenticating,
    /// Action handler running.
    Dispatching,
    /// Response frame being written.
    Responding,
    /// Terminal.
    Closed,
}

/// Read-only state shared by every connection of one server.
pub struct ServerContext {
    pub settings: Arc<Settings>,
    pub gate: AuthGate,
    pub registry: Arc<ActionRegistry>,
    pub metrics: Arc<ConnectionMetrics>,
}

/// Handle a single client connection until it closes.
///
/// Returns `Ok(())` when the peer disconnects, the connection idles out, or
/// the server shuts down. Framing, authentication and transport failures
/// close the connection and are returned to the caller for logging.
pub async fn handle_connection<S>(
    stream: S,
    peer: SocketAddr,
    ctx: Arc<ServerContext>,
    mut shutdown: watch::Receiver<bool>,
) -> WireResult<()>
where
    S: AsyncRead + AsyncWrite,
{
    let (reader, writer) = tokio::io::split(stream);
    let mut connection = Connection {
        id: Uuid::new_v4(),
        peer,
        reader: BufReader::new(reader),
        writer,
        ctx,
        state: ConnectionState::Open,
    };

    debug!(connection_id = %connection.id, peer = %peer, "Connection opened");
    let result = connection.run(&mut shutdown).await;
    connection.transition(ConnectionState::Closed);
    result
}

/// Resolves once the server asks connections to stop.
pub(super) async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    // A dropped sender also means the server is gone
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Socket errors that only mean the peer went away.
fn is_disconnect(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted | io::ErrorKind::BrokenPipe
    )
}

struct Connection<R, W> {
    id: Uuid,
    peer: SocketAddr,
    reader: R,
    writer: W,
    ctx: Arc<ServerContext>,
    state: ConnectionState,
}

impl<R, W> Connection<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    fn transition(&mut self, next: ConnectionState) {
        trace!(
            connection_id = %self.id,
            from = ?self.state,
            to = ?next,
            "State transition"
        );
        self.state = next;
    }

    async fn run(&mut self, shutdown: &mut watch::Receiver<bool>) -> WireResult<()> {
        loop {
            let Some(payload) = self.next_frame(shutdown).await? else {
                return Ok(());
            };

            self.transition(ConnectionState::Authenticating);
            // A frame that is not a JSON object is a framing error: no response
            let request = IncomingRequest::from_payload(parse_payload(&payload)?);

            if let Err(e) = self.ctx.gate.authenticate(request.token.as_deref()) {
                // The listener reports the failure once the connection closes
                debug!(
                    connection_id = %self.id,
                    action = ?request.action,
                    "Authentication failed, closing connection"
                );
                self.deny().await;
                return Err(e);
            }

            self.transition(ConnectionState::Dispatching);
            let response = self.dispatch(request).await;

            self.transition(ConnectionState::Responding);
            let write_timeout = self.ctx.settings.limits.write_timeout();
            write_message_with_timeout(&mut self.writer, &response, write_timeout).await?;

            self.transition(ConnectionState::Open);
        }
    }

    /// Wait for the next frame while open.
    ///
    /// `None` means the connection should close quietly: the peer went
    /// away, the idle timeout expired, or the server is stopping.
    async fn next_frame(
        &mut self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> WireResult<Option<Vec<u8>>> {
        let limits = self.ctx.settings.limits.frame_limits();
        let idle_timeout = self.ctx.settings.limits.idle_timeout();

        let result = tokio::select! {
            biased;
            _ = stopped(shutdown) => {
                debug!(connection_id = %self.id, "Server stopping, closing connection");
                return Ok(None);
            }
            result = read_frame_with_timeout(&mut self.reader, limits, idle_timeout) => result,
        };

        match result {
            Ok(payload) => Ok(Some(payload)),
            Err(WireError::ConnectionClosed) => {
                debug!(connection_id = %self.id, "Client disconnected");
                Ok(None)
            }
            Err(WireError::Timeout { after }) => {
                info!(
                    connection_id = %self.id,
                    peer = %self.peer,
                    idle_seconds = after.as_secs(),
                    "Closing idle connection"
                );
                Ok(None)
            }
            Err(WireError::Io(e)) if is_disconnect(&e) => {
                debug!(connection_id = %self.id, error = %e, "Client dropped the connection");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Best-effort denial before closing an unauthenticated connection.
    async fn deny(&mut self) {
        let write_timeout = self.ctx.settings.limits.write_timeout();
        if let Err(e) =
            write_message_with_timeout(&mut self.writer, &Response::auth_failed(), write_timeout)
                .await
        {
            debug!(connection_id = %self.id, error = %e, "Failed to send denial");
        }
        let _ = self.writer.shutdown().await;
    }

    async fn dispatch(&self, request: IncomingRequest) -> Response {
        let Some(action) = request.action else {
            return Response::failure(CODE_FAILURE, "missing action");
        };

        let body = match request.body {
            None | Some(Value::Null) => Body::new(),
            Some(Value::Object(map)) => map,
            Some(_) => return Response::failure(CODE_FAILURE, "body must be an object"),
        };

        let request_id = Uuid::new_v4();
        let start_time = Instant::now();

        info!(
            connection_id = %self.id,
            request_id = %request_id,
            action = %action,
            peer = %self.peer,
            "Received request"
        );
        self.ctx.metrics.record_request();

        let ctx = ActionContext::new(request_id, self.peer, action.clone());
        let registry = Arc::clone(&self.ctx.registry);

        // Handlers are synchronous and may be slow; keep them off the reactor
        let result = tokio::task::spawn_blocking(move || registry.dispatch(&ctx, body)).await;

        let response = match result {
            Ok(outcome) => {
                if let Err(e) = &outcome {
                    warn!(
                        request_id = %request_id,
                        action = %action,
                        error = %e,
                        "Action failed"
                    );
                }
                response_for(outcome)
            }
            Err(e) => {
                error!(
                    request_id = %request_id,
                    action = %action,
                    error = %e,
                    "Action panicked"
                );
                Response::failure(CODE_FAILURE, "internal error")
            }
        };

        debug!(
            request_id = %request_id,
            code = response.code,
            duration_ms = start_time.elapsed().as_millis() as u64,
            "Request completed"
        );

        response
    }
}
