// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the transaction pipeline.
//!
//! Errors are categorized by their source (HTTP transport, node API,
//! state file, websocket, user hooks) and include context to help with
//! debugging.
//!
//! # Error Categories
//!
//! | Error Type | Retryable | Description |
//! |------------|-----------|-------------|
//! | `Http` | Yes | Network errors, timeouts, no response |
//! | `Socket` | Yes | Websocket connect/receive failures |
//! | `Api` | No | Structured `{ok:false}` reply from the node |
//! | `Protocol` | No | Node returned a body we cannot interpret |
//! | `State` | No | State file read/write/decode failure |
//! | `InvalidState` | No | Pipeline state machine violation |
//! | `Hook` | No | User hook failed |
//! | `Closed` | No | Stream is shutting down |
//!
//! # Retry Behavior
//!
//! Use [`StreamError::is_retryable()`] to determine if an operation should
//! be retried with backoff. Retryable errors indicate transient network or
//! availability issues. Non-retryable errors indicate bugs, user-level
//! failures, or a corrupt node - the outbox keeps its head entry across all
//! of them, so nothing is lost by surfacing the error.

use thiserror::Error;

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, StreamError>;

/// A structured error reply from the node.
///
/// The node signals application-level failures as `{ok: false, error,
/// message?}` bodies. These are never retried automatically: the entry that
/// caused one stays at the head of the outbox until the failure hook removes
/// it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    /// Machine-readable error code (e.g. `"insufficient_funds"`).
    pub error: String,
    /// Optional human-readable detail.
    pub message: Option<String>,
}

impl ApiError {
    pub fn new(error: impl Into<String>, message: Option<String>) -> Self {
        Self {
            error: error.into(),
            message,
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node rejected request: {}", self.error)?;
        if let Some(ref message) = self.message {
            write!(f, " ({message})")?;
        }
        Ok(())
    }
}

impl std::error::Error for ApiError {}

/// Errors that can occur in the transaction pipeline.
///
/// Each variant includes context about where the error occurred.
/// Use [`is_retryable()`](Self::is_retryable) to check if the operation
/// should be retried.
#[derive(Error, Debug)]
pub enum StreamError {
    /// HTTP transport error (no response, timeout, connection refused).
    ///
    /// Retryable: the request never produced an interpretable answer.
    /// For `POST /transactions/` the retry is driven by the outbox
    /// UNKNOWN-resolver, never by the transport layer itself.
    #[error("http error ({operation}): {message}")]
    Http {
        operation: String,
        message: String,
        #[source]
        source: Option<reqwest::Error>,
    },

    /// The node answered with a well-formed `{ok: false}` body.
    ///
    /// Not retryable - surfaced to the send-failure hook.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// The node answered with a body we cannot interpret.
    ///
    /// Not retryable - the stream is talking to something that does not
    /// speak the expected protocol and should be closed and reopened.
    #[error("protocol violation ({operation}): {message}")]
    Protocol { operation: String, message: String },

    /// State file read/write/decode failure.
    ///
    /// Not retryable - the durable store is the correctness anchor and
    /// failures here are fatal.
    #[error("state store error ({operation}): {message}")]
    State {
        operation: String,
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// Websocket failure (connect timeout, stream error, bad frame).
    ///
    /// Retryable - the push socket reopens with backoff.
    #[error("socket error: {0}")]
    Socket(String),

    /// Pipeline state machine violation.
    ///
    /// Occurs when an operation is attempted in the wrong state (e.g.
    /// calling `run()` twice, or touching a committed hook context).
    /// Not retryable - indicates a bug in the caller.
    #[error("invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// A user hook failed.
    ///
    /// Not retryable here - the error is re-raised out of `run()` so the
    /// caller can decide whether to restart.
    #[error("hook failed: {0}")]
    Hook(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The stream is shutting down.
    #[error("stream closed")]
    Closed,
}

impl StreamError {
    /// Create an HTTP error from a reqwest error.
    pub fn http(operation: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Http {
            operation: operation.into(),
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Create an HTTP error without a source.
    pub fn http_msg(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Http {
            operation: operation.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Create a protocol violation error.
    pub fn protocol(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Protocol {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a state store error from an I/O error.
    pub fn state(operation: impl Into<String>, source: std::io::Error) -> Self {
        Self::State {
            operation: operation.into(),
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Create a state store error without an I/O source.
    pub fn state_msg(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::State {
            operation: operation.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Wrap a user hook error.
    pub fn hook(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Hook(Box::new(source))
    }

    /// Wrap a user hook error given as a plain message.
    pub fn hook_msg(message: impl Into<String>) -> Self {
        Self::Hook(message.into().into())
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http { .. } => true,
            Self::Socket(_) => true,
            Self::Api(_) => false,
            Self::Protocol { .. } => false,
            Self::State { .. } => false,
            Self::InvalidState { .. } => false,
            Self::Hook(_) => false,
            Self::Closed => false,
        }
    }
}
