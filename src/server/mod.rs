//! TCP server module.
//!
//! Handles listening, optional TLS handshakes, and per-connection dispatch.

mod connection;
mod listener;

pub use connection::{handle_connection, ConnectionState, ServerContext};
pub use listener::{ConnectionMetrics, Server, ServerHandle, Shutdown};
