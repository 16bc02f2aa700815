//! Error types for the authwire protocol.

use std::time::Duration;

use thiserror::Error;

use crate::protocol::Body;

/// Main error type for the protocol, server, and client.
#[derive(Error, Debug)]
pub enum WireError {
    /// Configuration-related errors.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// The byte stream does not carry a well-formed frame.
    ///
    /// Fatal to the connection: no response is sent because the length
    /// prefix can no longer be trusted.
    #[error("Framing error: {kind}")]
    Framing { kind: FramingErrorKind },

    /// A message could not be serialized to JSON.
    #[error("Encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    /// Authentication errors.
    #[error("Authentication error: {kind}")]
    Auth { kind: AuthErrorKind },

    /// An action handler reported a failure.
    #[error("Action failed with code {code}: {message}")]
    Action { code: i64, message: String },

    /// The server answered with a nonzero code.
    #[error("Request failed with code {code}: {}", error_message(.body))]
    Response { code: i64, body: Body },

    /// A deadline expired before the operation completed.
    #[error("Timed out after {after:?}")]
    Timeout { after: Duration },

    /// Socket-level failure (connect, DNS, reset, closed connection).
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// TLS configuration or handshake failure.
    #[error("TLS error: {message}")]
    Tls { message: String },

    /// The peer closed the connection between frames.
    #[error("Connection closed")]
    ConnectionClosed,

    /// I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Framing error kinds.
#[derive(Error, Debug)]
pub enum FramingErrorKind {
    #[error("Length prefix is empty")]
    EmptyLength,

    #[error("Length prefix contains non-digit byte 0x{byte:02x}")]
    MalformedLength { byte: u8 },

    #[error("Frame too large: {size} bytes exceeds maximum of {max} bytes")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Length prefix exceeds {max_digits} digits")]
    LengthPrefixTooLong { max_digits: usize },

    #[error("Stream ended inside the length prefix")]
    UnterminatedLength,

    #[error("Stream ended after {read} of {expected} bytes")]
    Truncated { read: usize, expected: usize },

    #[error("Invalid JSON payload: {message}")]
    InvalidJson { message: String },

    #[error("Payload is not a JSON object")]
    NotAnObject,
}

/// Authentication error kinds.
#[derive(Error, Debug)]
pub enum AuthErrorKind {
    #[error("Missing token")]
    MissingToken,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Failed to load tokens: {message}")]
    TokenSourceError { message: String },
}

impl WireError {
    pub(crate) fn framing(kind: FramingErrorKind) -> Self {
        Self::Framing { kind }
    }

    pub(crate) fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Response code carried by this error, if the server produced one.
    pub fn code(&self) -> Option<i64> {
        match self {
            Self::Response { code, .. } | Self::Action { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Whether this error is a client-side deadline expiry.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

fn error_message(body: &Body) -> &str {
    body.get("error")
        .and_then(|v| v.as_str())
        .unwrap_or("no error message")
}

/// Result type alias for protocol operations.
pub type WireResult<T> = Result<T, WireError>;
