//! Configuration module for authwire.
//!
//! Handles loading and validating server configuration from TOML files,
//! and the connection parameters used by the client.

mod settings;

pub use settings::*;
