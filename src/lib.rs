//! authwire
//!
//! An authenticated, length-prefixed JSON request/response protocol over TCP
//! or TLS. The crate provides the wire codec, the server that authenticates
//! and dispatches each frame to a registered action, and the client that
//! sends requests under a deadline.

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod handler;
pub mod protocol;
pub mod server;
pub mod tls;
