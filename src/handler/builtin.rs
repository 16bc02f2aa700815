//! Built-in actions served by the daemon binary.

use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use serde_json::{json, Value};

use crate::error::WireError;
use crate::protocol::Body;
use crate::server::ConnectionMetrics;

use super::registry::ActionRegistry;
use super::traits::Action;
use super::types::{ActionContext, Reply};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Register `ping`, `echo` and, when metrics are available, `stats`.
pub fn register(registry: &mut ActionRegistry, metrics: Option<Arc<ConnectionMetrics>>) {
    registry.register("ping", PingAction);
    registry.register_fn("echo", |body| Ok(Reply::success(body)));
    if let Some(metrics) = metrics {
        registry.register("stats", StatsAction::new(metrics));
    }
}

fn object(value: Value) -> Body {
    match value {
        Value::Object(map) => map,
        _ => Body::new(),
    }
}

/// Health check that answers with a pong and the server clock.
pub struct PingAction;

impl Action for PingAction {
    fn call(&self, _ctx: &ActionContext, _body: Body) -> Result<Reply, WireError> {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        Ok(Reply::success(object(json!({
            "pong": true,
            "timestamp": timestamp,
        }))))
    }
}

/// Connection statistics for monitoring.
///
/// Returns:
/// - uptime_seconds: time since the action was created
/// - active_connections: currently open connections
/// - connections_total: connections accepted so far
/// - connections_failed: connections that ended with an error
/// - requests_total: frames dispatched to an action
/// - version: crate version
pub struct StatsAction {
    start_time: Instant,
    metrics: Arc<ConnectionMetrics>,
}

impl StatsAction {
    pub fn new(metrics: Arc<ConnectionMetrics>) -> Self {
        Self {
            start_time: Instant::now(),
            metrics,
        }
    }
}

impl Action for StatsAction {
    fn call(&self, _ctx: &ActionContext, _body: Body) -> Result<Reply, WireError> {
        Ok(Reply::success(object(json!({
            "uptime_seconds": self.start_time.elapsed().as_secs(),
            "active_connections": self.metrics.active(),
            "connections_total": self.metrics.total_connections(),
            "connections_failed": self.metrics.failed_connections(),
            "requests_total": self.metrics.total_requests(),
            "version": VERSION,
        }))))
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

    #[test]
    fn test_ping() {
        let reply = PingAction.call(&context("ping"), Body::new()).unwrap();
        assert_eq!(reply.code, 0);
        assert_eq!(reply.body["pong"], true);
        assert!(reply.body["timestamp"].is_u64());
    }

    #[test]
    fn test_register_builtins() {
        let mut registry = ActionRegistry::new();
        register(&mut registry, None);
        assert_eq!(registry.list_actions(), vec!["echo", "ping"]);

        register(&mut registry, Some(Arc::new(ConnectionMetrics::new())));
        assert!(registry.contains("stats"));
    }

    #[test]
    fn test_echo_returns_body() {
        let mut registry = ActionRegistry::new();
        register(&mut registry, None);

        let body = object(json!({"value": "hi"}));
        let reply = registry.dispatch(&context("echo"), body.clone()).unwrap();
        assert_eq!(reply.body, body);
    }

    #[test]
    fn test_stats() {
        let metrics = Arc::new(ConnectionMetrics::new());
        metrics.connection_opened();
        metrics.record_request();

        let reply = StatsAction::new(Arc::clone(&metrics))
            .call(&context("stats"), Body::new())
            .unwrap();
        assert_eq!(reply.body["active_connections"], 1);
        assert_eq!(reply.body["connections_total"], 1);
        assert_eq!(reply.body["requests_total"], 1);
        assert_eq!(reply.body["version"], VERSION);
    }
}
