//! Action handlers.
//!
//! The registry maps action names to handlers supplied by the embedding
//! application; the connection handler dispatches authenticated frames
//! through it.

pub mod builtin;
mod registry;
mod traits;
mod types;

pub use registry::ActionRegistry;
pub use traits::Action;
pub use types::{response_for, ActionContext, Reply};
