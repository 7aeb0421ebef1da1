//! Error types for the execution pipeline.
//!
//! Every failure the core can produce maps to exactly one [`ErrorClass`];
//! the class drives retry decisions, HTTP status mapping, and telemetry
//! annotations. Raw downstream error strings stay inside [`ExecError`] for
//! logs — clients only ever see [`ExecError::public_message`].

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced by the execution core and its collaborators.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{scope} timed out after {after:?}")]
    Timeout { scope: String, after: Duration },

    #[error("connection failed: {0}")]
    Connection(String),

    /// Gateway signalled throttling. `retry_after` is populated from the
    /// `Retry-After` response header when present.
    #[error("rate limited by upstream gateway")]
    RateLimit { retry_after: Option<Duration> },

    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Well-formed provider error unrelated to availability (e.g. content
    /// filter). Never retried.
    #[error("provider error: {0}")]
    Provider(String),

    /// An MCP tool returned `isError`. Embedded in the tool message, never
    /// escalated to a failed execution.
    #[error("tool '{name}' failed: {message}")]
    Tool { name: String, message: String },

    #[error("execution cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

/// Classification set per the error-handling contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Validation,
    Unauthorized,
    NotFound,
    Timeout,
    Connection,
    RateLimit,
    ProviderUnavailable,
    ProviderError,
    ToolError,
    Internal,
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorClass::Validation => "validation",
            ErrorClass::Unauthorized => "unauthorized",
            ErrorClass::NotFound => "not_found",
            ErrorClass::Timeout => "timeout",
            ErrorClass::Connection => "connection",
            ErrorClass::RateLimit => "rate_limit",
            ErrorClass::ProviderUnavailable => "provider_unavailable",
            ErrorClass::ProviderError => "provider_error",
            ErrorClass::ToolError => "tool_error",
            ErrorClass::Internal => "internal",
        };
        write!(f, "{s}")
    }
}

impl ExecError {
    /// Classify this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            ExecError::Validation(_) => ErrorClass::Validation,
            ExecError::Unauthorized(_) => ErrorClass::Unauthorized,
            ExecError::NotFound(_) => ErrorClass::NotFound,
            ExecError::Timeout { .. } => ErrorClass::Timeout,
            ExecError::Connection(_) => ErrorClass::Connection,
            ExecError::RateLimit { .. } => ErrorClass::RateLimit,
            ExecError::ProviderUnavailable(_) => ErrorClass::ProviderUnavailable,
            ExecError::Provider(_) => ErrorClass::ProviderError,
            ExecError::Tool { .. } => ErrorClass::ToolError,
            ExecError::Cancelled => ErrorClass::Internal,
            ExecError::Internal(_) => ErrorClass::Internal,
        }
    }

    /// The `Retry-After` hint, when the upstream supplied one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ExecError::RateLimit { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Classification-scoped message safe to return to clients.
    ///
    /// Raw gateway/provider bodies never cross this boundary.
    pub fn public_message(&self) -> String {
        match self.class() {
            ErrorClass::Validation => self.to_string(),
            ErrorClass::Unauthorized => "access denied".to_string(),
            ErrorClass::NotFound => self.to_string(),
            ErrorClass::Timeout => "a downstream call timed out".to_string(),
            ErrorClass::Connection => "a downstream connection failed".to_string(),
            ErrorClass::RateLimit => "the model gateway is rate limiting requests".to_string(),
            ErrorClass::ProviderUnavailable => "no model provider is currently available".to_string(),
            ErrorClass::ProviderError => "the model provider rejected the request".to_string(),
            ErrorClass::ToolError => "a tool invocation failed".to_string(),
            ErrorClass::Internal => {
                if matches!(self, ExecError::Cancelled) {
                    "cancelled".to_string()
                } else {
                    "internal error".to_string()
                }
            }
        }
    }
}

impl From<reqwest::Error> for ExecError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ExecError::Timeout {
                scope: "http request".to_string(),
                after: Duration::ZERO,
            }
        } else if err.is_connect() {
            ExecError::Connection(err.to_string())
        } else if err.is_decode() {
            ExecError::Provider(format!("malformed response body: {err}"))
        } else {
            ExecError::Connection(err.to_string())
        }
    }
}

/// Result type for execution operations.
pub type ExecResult<T> = Result<T, ExecError>;
