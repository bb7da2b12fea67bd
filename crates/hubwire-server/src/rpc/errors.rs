//! Error kinds and error types for the invocation pipeline.

use std::time::Duration;

use crate::rpc::types::ErrorBody;

// ── Error kind constants ────────────────────────────────────────────

/// Inbound frame could not be parsed as an invocation.
pub const PROTOCOL_PARSE_ERROR: &str = "PROTOCOL_PARSE_ERROR";
/// No handler registered for the target/method pair.
pub const METHOD_NOT_FOUND: &str = "METHOD_NOT_FOUND";
/// Arguments do not match the method signature.
pub const INVALID_ARGUMENTS: &str = "INVALID_ARGUMENTS";
/// Generic not-found raised by a handler.
pub const NOT_FOUND: &str = "NOT_FOUND";
/// Unexpected internal error.
pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
/// Handler did not finish within the configured timeout.
pub const HANDLER_TIMEOUT: &str = "HANDLER_TIMEOUT";
/// Handler panicked.
pub const HANDLER_PANIC: &str = "HANDLER_PANIC";

/// A fault raised by a handler body.
///
/// This is the only error interceptors observe: every `on_error` hook sees the
/// same `HandlerFault` before it is surfaced to the client.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HandlerFault {
    /// Argument missing or of the wrong shape.
    #[error("{message}")]
    InvalidArguments {
        /// Description of what is wrong.
        message: String,
    },

    /// Requested resource not found.
    #[error("{message}")]
    NotFound {
        /// Specific kind (e.g. `ROOM_NOT_FOUND`).
        kind: String,
        /// Human-readable message.
        message: String,
    },

    /// Internal handler error.
    #[error("{message}")]
    Internal {
        /// Description.
        message: String,
    },

    /// Handler exceeded its time budget.
    #[error("handler timed out after {timeout:?}")]
    Timeout {
        /// The budget that was exceeded.
        timeout: Duration,
    },

    /// Handler panicked.
    #[error("handler panicked: {message}")]
    Panicked {
        /// Panic payload, when it was a string.
        message: String,
    },

    /// Domain-specific fault with an arbitrary kind.
    #[error("{message}")]
    Custom {
        /// Machine-readable kind.
        kind: String,
        /// Human-readable message.
        message: String,
    },
}

impl HandlerFault {
    /// Shorthand for an [`HandlerFault::Internal`] fault.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Shorthand for an [`HandlerFault::InvalidArguments`] fault.
    pub fn invalid_arguments(message: impl Into<String>) -> Self {
        Self::InvalidArguments {
            message: message.into(),
        }
    }

    /// Machine-readable kind for this fault.
    pub fn kind(&self) -> &str {
        match self {
            Self::InvalidArguments { .. } => INVALID_ARGUMENTS,
            Self::NotFound { kind, .. } | Self::Custom { kind, .. } => kind,
            Self::Internal { .. } => INTERNAL_ERROR,
            Self::Timeout { .. } => HANDLER_TIMEOUT,
            Self::Panicked { .. } => HANDLER_PANIC,
        }
    }

    /// Message safe to send to clients.
    ///
    /// Internal and panic details stay in the logs.
    pub fn client_message(&self) -> String {
        match self {
            Self::Internal { .. } | Self::Panicked { .. } => "Internal error".to_string(),
            other => other.to_string(),
        }
    }

    /// Convert to the wire-format error body.
    pub fn to_error_body(&self) -> ErrorBody {
        ErrorBody {
            kind: self.kind().to_owned(),
            message: self.client_message(),
        }
    }
}

/// Invocation id used when a malformed frame carries none.
pub const UNKNOWN_INVOCATION_ID: &str = "unknown";

/// An inbound frame that is not a well-formed invocation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{reason}")]
pub struct ProtocolParseError {
    /// Id salvaged from the frame, or [`UNKNOWN_INVOCATION_ID`].
    pub invocation_id: String,
    /// What was wrong with the frame.
    pub reason: String,
}

/// Registration and resolution failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// The target/method pair is already registered.
    #[error("method '{target}.{method}' is already registered")]
    DuplicateMethod {
        /// Target (hub) name.
        target: String,
        /// Method name.
        method: String,
    },

    /// No handler for the target/method pair.
    #[error("method '{target}.{method}' not found")]
    MethodNotFound {
        /// Target (hub) name.
        target: String,
        /// Method name.
        method: String,
    },
}

impl RegistryError {
    /// Machine-readable kind for this error.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DuplicateMethod { .. } => INTERNAL_ERROR,
            Self::MethodNotFound { .. } => METHOD_NOT_FOUND,
        }
    }
}
