//! Action registry for dispatching requests to handlers.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::error::WireError;
use crate::protocol::{Body, CODE_FAILURE};

use super::traits::Action;
use super::types::{ActionContext, Reply};

/// Mapping from action name to handler.
///
/// Built once by the embedding application and shared read-only by every
/// connection, so handlers must be safe to call concurrently.
#[derive(Clone, Default)]
pub struct ActionRegistry {
    actions: HashMap<String, Arc<dyn Action>>,
}

impl ActionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an action under a name, replacing any previous handler.
    pub fn register<A>(&mut self, name: impl Into<String>, action: A) -> &mut Self
    where
        A: Action + 'static,
    {
        self.register_arc(name, Arc::new(action))
    }

    /// Register a closure as an action.
    pub fn register_fn<F>(&mut self, name: impl Into<String>, action: F) -> &mut Self
    where
        F: Fn(Body) -> Result<Reply, WireError> + Send + Sync + 'static,
    {
        self.register_arc(name, Arc::new(action))
    }

    /// Register a shared action under a name.
    pub fn register_arc(&mut self, name: impl Into<String>, action: Arc<dyn Action>) -> &mut Self {
        let name = name.into();
        debug!(action = %name, "Registering action");
        self.actions.insert(name, action);
        self
    }

    /// Get an action by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Action>> {
        self.actions.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    /// Dispatch a request to the action named in the context.
    pub fn dispatch(&self, ctx: &ActionContext, body: Body) -> Result<Reply, WireError> {
        let action = self
            .actions
            .get(ctx.action.as_str())
            .ok_or_else(|| WireError::Action {
                code: CODE_FAILURE,
                message: format!("unknown action: {}", ctx.action),
            })?;

        action.call(ctx, body)
    }

    /// List all registered action names.
    pub fn list_actions(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.actions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn context(action: &str) -> ActionContext {
        ActionContext::new(
            Uuid::new_v4(),
            "127.0.0.1:4000".parse().unwrap(),
            action.to_string(),
        )
    }

    fn registry() -> ActionRegistry {
        let mut registry = ActionRegistry::new();
        registry
            .register_fn("echo", |body| Ok(Reply::success(body)))
            .register_fn("fail", |_body| {
                Err(WireError::Action {
                    code: 3,
                    message: "nope".to_string(),
                })
            });
        registry
    }

    #[test]
    fn test_registry_has_actions() {
        let registry = registry();
        assert!(registry.contains("echo"));
        assert!(registry.get("fail").is_some());
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.list_actions(), vec!["echo", "fail"]);
    }

    #[test]
    fn test_dispatch_echo() {
        let mut body = Body::new();
        body.insert("value".into(), "hi".into());

        let reply = registry().dispatch(&context("echo"), body.clone()).unwrap();
        assert_eq!(reply, Reply::success(body));
    }

    #[test]
    fn test_dispatch_failure() {
        let result = registry().dispatch(&context("fail"), Body::new());
        assert!(matches!(result, Err(WireError::Action { code: 3, .. })));
    }

    #[test]
    fn test_unknown_action() {
        let result = registry().dispatch(&context("nonexistent"), Body::new());
        match result {
            Err(WireError::Action { code, message }) => {
                assert_eq!(code, CODE_FAILURE);
                assert!(message.contains("nonexistent"));
            }
            other => panic!("expected unknown action error, got {:?}", other.map(|r| r.code)),
        }
    }

    #[test]
    fn test_register_replaces_existing() {
        let mut registry = registry();
        registry.register_fn("echo", |_body| Ok(Reply::success_empty()));

        let mut body = Body::new();
        body.insert("value".into(), "hi".into());
        let reply = registry.dispatch(&context("echo"), body).unwrap();
        assert!(reply.body.is_empty());
        assert_eq!(registry.len(), 2);
    }
}
