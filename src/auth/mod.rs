//! Authentication module.
//!
//! Handles token validation and the per-frame authentication gate.

mod gate;
mod tokens;

pub use gate::AuthGate;
pub use tokens::{StaticTokens, TokenValidator};
