//! Action trait definition.

use crate::error::WireError;
use crate::protocol::Body;

use super::types::{ActionContext, Reply};

/// Core trait for everything the server can execute.
///
/// This is the extension point for embedding applications. Plain closures
/// of type `Fn(Body) -> Result<Reply, WireError>` implement it, so most
/// actions never need a named type.
///
/// # Example
///
/// ```ignore
/// pub struct StartBuild;
///
/// impl Action for StartBuild {
///     fn call(&self, ctx: &ActionContext, body: Body) -> Result<Reply, WireError> {
///         let repo = body.get("repo_url").and_then(|v| v.as_str()).ok_or_else(|| {
///             WireError::Action { code: 2, message: "repo_url is required".into() }
///         })?;
///         Ok(Reply::success(serde_json::json!({"queued": repo}).as_object().cloned().unwrap_or_default()))
///     }
/// }
/// ```
pub trait Action: Send + Sync {
    /// Run the action.
    ///
    /// Return `Err(WireError::Action { code, .. })` to choose the failure
    /// code; any other error is reported with code 1. Panics are caught by
    /// the connection handler.
    ///
    /// Note: This is called from a blocking context via `spawn_blocking`.
    fn call(&self, ctx: &ActionContext, body: Body) -> Result<Reply, WireError>;
}

impl<F> Action for F
where
    F: Fn(Body) -> Result<Reply, WireError> + Send + Sync,
{
    fn call(&self, _ctx: &ActionContext, body: Body) -> Result<Reply, WireError> {
        self(body)
    }
}
