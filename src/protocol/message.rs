//! Message types for both directions of the protocol.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{WireError, WireResult};

/// Action parameters or result payload. Always a JSON object on the wire.
pub type Body = serde_json::Map<String, Value>;

/// Response code for a successful action.
pub const CODE_OK: i64 = 0;

/// Generic failure code used for denials and synthesized handler failures.
pub const CODE_FAILURE: i64 = 1;

/// A client → server message.
#[derive(Clone, Serialize, Deserialize)]
pub struct ClientMessage {
    /// Shared secret presented on every request.
    pub token: String,

    /// Name of the requested operation (e.g. "echo", "build.start").
    pub action: String,

    /// Action parameters.
    #[serde(default)]
    pub body: Body,
}

impl ClientMessage {
    pub fn new(token: impl Into<String>, action: impl Into<String>, body: Body) -> Self {
        Self {
            token: token.into(),
            action: action.into(),
            body,
        }
    }
}

impl fmt::Debug for ClientMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientMessage")
            .field("token", &"<redacted>")
            .field("action", &self.action)
            .field("body", &self.body)
            .finish()
    }
}

/// A client message as the server sees it before authentication.
///
/// Every field is optional here: a frame that parses as a JSON object is
/// well-formed even if it lacks a token or an action. Those cases are
/// handled by the authentication gate and the dispatcher, not the codec.
pub struct IncomingRequest {
    pub token: Option<String>,
    pub action: Option<String>,
    pub body: Option<Value>,
}

impl IncomingRequest {
    /// Split a decoded payload into its protocol fields.
    pub fn from_payload(mut payload: Body) -> Self {
        let token = match payload.remove("token") {
            Some(Value::String(token)) => Some(token),
            _ => None,
        };
        let action = match payload.remove("action") {
            Some(Value::String(action)) if !action.is_empty() => Some(action),
            _ => None,
        };
        Self {
            token,
            action,
            body: payload.remove("body"),
        }
    }
}

impl fmt::Debug for IncomingRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IncomingRequest")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("action", &self.action)
            .finish_non_exhaustive()
    }
}

/// A server → client message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// `0` on success, anything else is an application-defined failure.
    pub code: i64,

    /// Result payload, or `{"error": ...}` on failure.
    #[serde(default)]
    pub body: Body,
}

impl Response {
    /// Create a success response.
    pub fn success(body: Body) -> Self {
        Self {
            code: CODE_OK,
            body,
        }
    }

    /// Create a failure response carrying an `error` message.
    pub fn failure(code: i64, message: impl Into<String>) -> Self {
        let mut body = Body::new();
        body.insert("error".to_string(), Value::String(message.into()));
        Self { code, body }
    }

    /// The denial sent before closing an unauthenticated connection.
    pub fn auth_failed() -> Self {
        Self::failure(CODE_FAILURE, "auth failed")
    }

    pub fn is_success(&self) -> bool {
        self.code == CODE_OK
    }

    /// Convert into the body on success, or a typed error on failure.
    pub fn into_result(self) -> WireResult<Body> {
        if self.is_success() {
            Ok(self.body)
        } else {
            Err(WireError::Response {
                code: self.code,
                body: self.body,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Body {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_client_message_debug_redacts_token() {
        let msg = ClientMessage::new("s3cret", "echo", Body::new());
        let debug = format!("{:?}", msg);
        assert!(!debug.contains("s3cret"));
        assert!(debug.contains("echo"));
    }

    #[test]
    fn test_client_message_body_defaults_to_empty() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"token": "t", "action": "ping"}"#).unwrap();
        assert!(msg.body.is_empty());
    }

    #[test]
    fn test_incoming_request_fields() {
        let req = IncomingRequest::from_payload(object(json!({
            "token": "t",
            "action": "echo",
            "body": {"value": "hi"}
        })));
        assert_eq!(req.token.as_deref(), Some("t"));
        assert_eq!(req.action.as_deref(), Some("echo"));
        assert_eq!(req.body, Some(json!({"value": "hi"})));
    }

    #[test]
    fn test_incoming_request_rejects_non_string_token_and_empty_action() {
        let req = IncomingRequest::from_payload(object(json!({
            "token": 42,
            "action": ""
        })));
        assert!(req.token.is_none());
        assert!(req.action.is_none());
        assert!(req.body.is_none());
    }

    #[test]
    fn test_failure_response_shape() {
        let response = Response::auth_failed();
        assert_eq!(response.code, 1);
        assert_eq!(response.body["error"], "auth failed");
        assert!(!response.is_success());
    }

    #[test]
    fn test_into_result() {
        let ok = Response::success(object(json!({"value": "hi"})));
        assert_eq!(ok.into_result().unwrap()["value"], "hi");

        let err = Response::failure(7, "nope").into_result().unwrap_err();
        assert_eq!(err.code(), Some(7));
    }

    #[test]
    fn test_response_wire_keys() {
        let json = serde_json::to_value(Response::success(Body::new())).unwrap();
        assert_eq!(json, json!({"code": 0, "body": {}}));
    }
}
