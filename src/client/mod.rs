//! Client request engine.
//!
//! [`Client::request`] opens a connection, sends one request, waits for the
//! response under a deadline and closes the connection again. Callers that
//! want to reuse a connection take a [`ClientConnection`] from
//! [`Client::connect`]; it sends one request at a time and closes when
//! dropped.

use std::fmt;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::error::{WireError, WireResult};
use crate::protocol::{decode, write_message, Body, ClientMessage, FrameLimits, Response};
use crate::tls;

/// Byte stream a client connection runs over (plain TCP or TLS).
trait ClientIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> ClientIo for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// A single request with optional per-call overrides.
#[derive(Clone)]
pub struct Request {
    action: String,
    body: Body,
    token: Option<String>,
    timeout: Option<Duration>,
}

impl Request {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            body: Body::new(),
            token: None,
            timeout: None,
        }
    }

    pub fn body(mut self, body: Body) -> Self {
        self.body = body;
        self
    }

    /// Present this token instead of the configured one.
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Deadline for this request instead of the configured one.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("action", &self.action)
            .field("body", &self.body)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Protocol client bound to one server.
pub struct Client {
    config: ClientConfig,
    connector: Option<TlsConnector>,
}

impl Client {
    /// Create a client. Builds the TLS connector up front when `use_ssl` is set.
    pub fn new(config: ClientConfig) -> WireResult<Self> {
        let connector = if config.use_ssl {
            if !config.validate_cert {
                warn!(
                    host = %config.host,
                    "TLS certificate validation disabled"
                );
            }
            Some(tls::connector(
                config.validate_cert,
                config.ca_file.as_deref(),
            )?)
        } else {
            None
        };

        Ok(Self { config, connector })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Open a connection, bounded by the connect timeout.
    pub async fn connect(&self) -> WireResult<ClientConnection> {
        let address = self.config.address();
        let connect_timeout = self.config.connect_timeout;

        let stream = tokio::time::timeout(connect_timeout, self.open(&address))
            .await
            .map_err(|_| WireError::Timeout {
                after: connect_timeout,
            })??;

        debug!(address = %address, tls = self.connector.is_some(), "Connected");

        Ok(ClientConnection {
            stream: Some(BufReader::new(stream)),
            token: self.config.token.clone(),
            timeout: self.config.timeout,
            limits: FrameLimits::new(self.config.max_frame_size),
        })
    }

    async fn open(&self, address: &str) -> WireResult<Box<dyn ClientIo>> {
        let stream = TcpStream::connect(address).await.map_err(|e| {
            WireError::transport(format!("Failed to connect to {}: {}", address, e))
        })?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "Failed to set TCP_NODELAY");
        }

        match &self.connector {
            Some(connector) => {
                let server_name = tls::server_name(&self.config.host)?;
                let tls_stream =
                    connector
                        .connect(server_name, stream)
                        .await
                        .map_err(|e| WireError::Tls {
                            message: format!("Handshake with {} failed: {}", address, e),
                        })?;
                Ok(Box::new(tls_stream))
            }
            None => Ok(Box::new(stream)),
        }
    }

    /// Send one request on a fresh connection and return the response body.
    pub async fn request(&self, action: &str, body: Body) -> WireResult<Body> {
        self.send(Request::new(action).body(body)).await
    }

    /// Like [`Client::request`], with per-call token and timeout overrides.
    pub async fn send(&self, request: Request) -> WireResult<Body> {
        let mut connection = self.connect().await?;
        let result = connection.send(request).await;
        connection.close().await;
        result
    }
}

/// An open connection to the server.
///
/// Requests take `&mut self`, so only one is ever outstanding. A timeout or
/// transport failure leaves the stream in an unknown state; the connection
/// is then closed and every later request fails.
pub struct ClientConnection {
    stream: Option<BufReader<Box<dyn ClientIo>>>,
    token: String,
    timeout: Duration,
    limits: FrameLimits,
}

impl ClientConnection {
    /// Send a request with the connection's default token and timeout.
    pub async fn request(&mut self, action: &str, body: Body) -> WireResult<Body> {
        self.send(Request::new(action).body(body)).await
    }

    /// Send a request and wait for its response.
    ///
    /// A nonzero response code comes back as [`WireError::Response`] and
    /// leaves the connection usable.
    pub async fn send(&mut self, request: Request) -> WireResult<Body> {
        if request.action.is_empty() {
            return Err(WireError::Config {
                message: "action must not be empty".to_string(),
            });
        }

        let timeout = request.timeout.unwrap_or(self.timeout);
        if timeout.is_zero() {
            return Err(WireError::Config {
                message: "timeout must be positive".to_string(),
            });
        }

        let limits = self.limits;
        let message = ClientMessage::new(
            request.token.unwrap_or_else(|| self.token.clone()),
            request.action,
            request.body,
        );

        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| WireError::transport("connection closed"))?;

        let exchange = async {
            write_message(&mut *stream, &message).await?;
            decode::<Response, _>(&mut *stream, limits).await
        };

        let result = match tokio::time::timeout(timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(WireError::Timeout { after: timeout }),
        };

        match result {
            Ok(response) => {
                debug!(action = %message.action, code = response.code, "Response received");
                response.into_result()
            }
            Err(e) => {
                debug!(action = %message.action, error = %e, "Request failed, closing connection");
                // Partial frames must not leak into a later request
                self.stream = None;
                Err(e)
            }
        }
    }

    /// Whether the connection can still carry requests.
    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Shut the connection down. Dropping it has the same effect, without
    /// the orderly TLS close.
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
    }
}

impl fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConnection")
            .field("open", &self.is_open())
            .field("timeout", &self.timeout)
            .field("limits", &self.limits)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{read_frame, write_message, CODE_OK};
    use serde_json::json;
    use std::time::Instant;
    use tokio::net::TcpListener;

    fn body(value: serde_json::Value) -> Body {
        match value {
            serde_json::Value::Object(map) => map,
            _ => Body::new(),
        }
    }

    /// One-connection fake server that answers each frame with `reply`.
    async fn fake_server<F>(reply: F) -> u16
    where
        F: Fn(Body) -> Option<Response> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            while let Ok(frame) = read_frame(&mut stream, FrameLimits::default()).await {
                let request: Body = serde_json::from_slice(&frame).unwrap();
                match reply(request) {
                    Some(response) => write_message(&mut stream, &response).await.unwrap(),
                    None => tokio::time::sleep(Duration::from_secs(5)).await,
                }
            }
        });

        port
    }

    fn client(port: u16) -> Client {
        Client::new(ClientConfig::new("127.0.0.1", port, "secret")).unwrap()
    }

    #[tokio::test]
    async fn test_request_returns_body() {
        let port = fake_server(|request| {
            assert_eq!(request["token"], "secret");
            assert_eq!(request["action"], "echo");
            Some(Response::success(request["body"].as_object().cloned().unwrap()))
        })
        .await;

        let result = client(port)
            .request("echo", body(json!({"value": "hi"})))
            .await
            .unwrap();
        assert_eq!(result, body(json!({"value": "hi"})));
    }

    #[tokio::test]
    async fn test_nonzero_code_is_an_error() {
        let port = fake_server(|_| Some(Response::failure(7, "bad input"))).await;

        let mut connection = client(port).connect().await.unwrap();
        let err = connection.request("do", Body::new()).await.unwrap_err();
        match err {
            WireError::Response { code, body } => {
                assert_eq!(code, 7);
                assert_eq!(body["error"], "bad input");
            }
            other => panic!("expected response error, got {:?}", other),
        }
        assert!(connection.is_open());
    }

    #[tokio::test]
    async fn test_token_override() {
        let port = fake_server(|request| {
            let mut reply = Body::new();
            reply.insert("token".into(), request["token"].clone());
            Some(Response::success(reply))
        })
        .await;

        let result = client(port)
            .send(Request::new("whoami").token("other"))
            .await
            .unwrap();
        assert_eq!(result["token"], "other");
    }

    #[tokio::test]
    async fn test_timeout_poisons_connection() {
        let port = fake_server(|_| None).await;

        let mut connection = client(port).connect().await.unwrap();
        let start = Instant::now();
        let err = connection
            .send(Request::new("slow").timeout(Duration::from_millis(100)))
            .await
            .unwrap_err();

        assert!(err.is_timeout());
        assert!(start.elapsed() < Duration::from_millis(300));
        assert!(!connection.is_open());

        let err = connection.request("again", Body::new()).await.unwrap_err();
        assert!(matches!(err, WireError::Transport { .. }));
    }

    #[tokio::test]
    async fn test_sequential_requests_on_one_connection() {
        let port = fake_server(|request| {
            Some(Response {
                code: CODE_OK,
                body: request["body"].as_object().cloned().unwrap_or_default(),
            })
        })
        .await;

        let mut connection = client(port).connect().await.unwrap();
        for i in 0..5 {
            let result = connection
                .request("echo", body(json!({"n": i})))
                .await
                .unwrap();
            assert_eq!(result["n"], i);
        }
        connection.close().await;
        assert!(!connection.is_open());
    }

    #[tokio::test]
    async fn test_empty_action_rejected() {
        let port = fake_server(|_| Some(Response::success(Body::new()))).await;
        let err = client(port).request("", Body::new()).await.unwrap_err();
        assert!(matches!(err, WireError::Config { .. }));
    }

    #[tokio::test]
    async fn test_connect_refused_is_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = client(port).request("ping", Body::new()).await.unwrap_err();
        assert!(matches!(err, WireError::Transport { .. }));
    }

    #[test]
    fn test_request_debug_redacts_token() {
        let request = Request::new("echo").token("hunter2");
        let rendered = format!("{:?}", request);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }
}
