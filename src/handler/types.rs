//! Action types: replies and execution context.

use std::net::SocketAddr;

use serde_json::Value;
use uuid::Uuid;

use crate::error::WireError;
use crate::protocol::{Body, Response, CODE_FAILURE, CODE_OK};

/// What an action hands back: a response code and a body.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub code: i64,
    pub body: Body,
}

impl Reply {
    /// Create a success reply with a body.
    pub fn success(body: Body) -> Self {
        Self {
            code: CODE_OK,
            body,
        }
    }

    /// Create a success reply with an empty body.
    pub fn success_empty() -> Self {
        Self::success(Body::new())
    }

    /// Create a reply with an explicit code and body.
    pub fn with_code(code: i64, body: Body) -> Self {
        Self { code, body }
    }

    /// Create a failure reply carrying an `error` message.
    pub fn failure(code: i64, message: impl Into<String>) -> Self {
        let mut body = Body::new();
        body.insert("error".to_string(), Value::String(message.into()));
        Self { code, body }
    }
}

impl From<Reply> for Response {
    fn from(reply: Reply) -> Self {
        Response {
            code: reply.code,
            body: reply.body,
        }
    }
}

/// Convert an action's outcome into the response sent on the wire.
///
/// `WireError::Action` keeps its code; any other error becomes
/// [`CODE_FAILURE`]. A nonzero code from an error is guaranteed even if the
/// action tried to report failure with code 0.
pub fn response_for(result: Result<Reply, WireError>) -> Response {
    match result {
        Ok(reply) => reply.into(),
        Err(WireError::Action { code, message }) => {
            let code = if code == CODE_OK { CODE_FAILURE } else { code };
            Response::failure(code, message)
        }
        Err(e) => Response::failure(CODE_FAILURE, e.to_string()),
    }
}

/// Execution context for an action.
///
/// Contains metadata about the request and the connected peer.
#[derive(Debug, Clone)]
pub struct ActionContext {
    /// Unique identifier for this request, used to correlate log lines.
    pub request_id: Uuid,
    /// Address of the connected peer.
    pub peer: SocketAddr,
    /// The action being executed.
    pub action: String,
}

impl ActionContext {
    pub fn new(request_id: Uuid, peer: SocketAddr, action: String) -> Self {
        Self {
            request_id,
            peer,
            action,
        }
    }
}
