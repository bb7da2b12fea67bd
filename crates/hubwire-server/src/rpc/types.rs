//! Wire-format types for invocations, responses and server pushes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Inbound invocation frame sent by a client.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationRequest {
    /// Client-chosen identifier echoed on the response.
    pub invocation_id: String,
    /// Hub (target) name, e.g. `Chat`.
    pub target: String,
    /// Method name, e.g. `Send`.
    pub method: String,
    /// Positional arguments.
    #[serde(default)]
    pub args: Vec<Value>,
}

/// Structured error inside an [`InvocationResponse`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable kind (e.g. `METHOD_NOT_FOUND`).
    pub kind: String,
    /// Human-readable message.
    pub message: String,
}

/// Marker carried by a response whose invocation was vetoed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Suppression {
    /// Name of the interceptor whose `before_invoke` returned `false`.
    pub interceptor: String,
}

/// Outbound response: exactly one of `result`, `error` or `suppressed` is set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationResponse {
    /// Echoed invocation identifier.
    pub invocation_id: String,
    /// Result payload on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error payload on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    /// Present when a pre-invoke interceptor vetoed the call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suppressed: Option<Suppression>,
}

impl InvocationResponse {
    /// Build a success response.
    pub fn success(invocation_id: impl Into<String>, result: Value) -> Self {
        Self {
            invocation_id: invocation_id.into(),
            result: Some(result),
            error: None,
            suppressed: None,
        }
    }

    /// Build an error response.
    pub fn error(
        invocation_id: impl Into<String>,
        kind: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            invocation_id: invocation_id.into(),
            result: None,
            error: Some(ErrorBody {
                kind: kind.into(),
                message: message.into(),
            }),
            suppressed: None,
        }
    }

    /// Build a suppressed-result response.
    pub fn suppressed(invocation_id: impl Into<String>, interceptor: impl Into<String>) -> Self {
        Self {
            invocation_id: invocation_id.into(),
            result: None,
            error: None,
            suppressed: Some(Suppression {
                interceptor: interceptor.into(),
            }),
        }
    }

    /// Whether the handler ran and produced a result.
    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.suppressed.is_none()
    }

    /// Whether the invocation was vetoed.
    pub fn is_suppressed(&self) -> bool {
        self.suppressed.is_some()
    }

    /// Error kind, if this is an error response.
    pub fn error_kind(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.kind.as_str())
    }
}

/// Server-initiated message pushed to clients outside any invocation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PushMessage {
    /// Client-side hub name the message is addressed to.
    pub target: String,
    /// Client-side method to call.
    pub method: String,
    /// Positional arguments.
    pub args: Vec<Value>,
    /// ISO-8601 timestamp.
    pub timestamp: String,
}

impl PushMessage {
    /// Create a push message stamped with the current UTC time.
    pub fn new(target: impl Into<String>, method: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            target: target.into(),
            method: method.into(),
            args,
            timestamp: now_timestamp(),
        }
    }
}

/// Frame sent once when a connection is accepted.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConnectionEstablished {
    /// Always `connection.established`.
    #[serde(rename = "type")]
    pub event_type: String,
    /// ISO-8601 timestamp.
    pub timestamp: String,
    /// Connection details.
    pub data: ConnectionEstablishedData,
}

/// Payload of [`ConnectionEstablished`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionEstablishedData {
    /// Identity assigned to the connection.
    pub connection_id: String,
}

impl ConnectionEstablished {
    /// Build the frame for a freshly accepted connection.
    pub fn new(connection_id: impl Into<String>) -> Self {
        Self {
            event_type: "connection.established".into(),
            timestamp: now_timestamp(),
            data: ConnectionEstablishedData {
                connection_id: connection_id.into(),
            },
        }
    }
}

fn now_timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
