//! The upstream seam: how the supervisor talks to a streaming model API.
//!
//! `Upstream::connect` resolves once the first byte of the response arrives
//! (status line and headers). The returned `UpstreamStream` then yields
//! discrete events until the response ends.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use warden_contracts::{
    message::{ModelRequest, ToolCallProposal},
    stream::StreamPhase,
};

/// One decoded chunk of an upstream stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A content token.
    Token(String),
    /// A complete tool call.
    ToolCall(ToolCallProposal),
    /// A chunk with no content (comment line, heartbeat, empty delta).
    KeepAlive,
}

impl StreamEvent {
    pub fn is_content(&self) -> bool {
        !matches!(self, Self::KeepAlive)
    }
}

/// A streaming model endpoint.
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn connect(&self, request: &ModelRequest) -> Result<Box<dyn UpstreamStream>, UpstreamError>;
}

/// An open upstream response.
#[async_trait]
pub trait UpstreamStream: Send {
    /// The next event, `None` at end of stream.
    async fn next_event(&mut self) -> Option<Result<StreamEvent, UpstreamError>>;
}

/// Why an upstream call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamErrorKind {
    ConnectionReset,
    Timeout,
    RateLimited,
    ServerError,
    Authentication,
    NotFound,
    Unprocessable,
    Other,
}

impl fmt::Display for UpstreamErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ConnectionReset => "connection reset",
            Self::Timeout => "timeout",
            Self::RateLimited => "rate limited",
            Self::ServerError => "server error",
            Self::Authentication => "authentication failure",
            Self::NotFound => "not found",
            Self::Unprocessable => "unprocessable request",
            Self::Other => "upstream error",
        };
        f.write_str(name)
    }
}

/// A classified upstream failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct UpstreamError {
    pub kind: UpstreamErrorKind,
    pub message: String,
}

impl UpstreamError {
    pub fn new(kind: UpstreamErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Classify an HTTP status returned by the upstream API.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let kind = match status {
            401 | 403 => UpstreamErrorKind::Authentication,
            404 => UpstreamErrorKind::NotFound,
            400 | 409 | 413 | 422 => UpstreamErrorKind::Unprocessable,
            408 => UpstreamErrorKind::Timeout,
            429 => UpstreamErrorKind::RateLimited,
            500..=599 => UpstreamErrorKind::ServerError,
            _ => UpstreamErrorKind::Other,
        };
        Self::new(kind, format!("HTTP {}: {}", status, message.into()))
    }

    pub fn connection_reset(message: impl Into<String>) -> Self {
        Self::new(UpstreamErrorKind::ConnectionReset, message)
    }

    /// A phase limit elapsed. `limit` names which one.
    pub fn timeout(phase: StreamPhase, limit: &str, after: Duration) -> Self {
        Self::new(
            UpstreamErrorKind::Timeout,
            format!("{} timeout after {}s while {}", limit, after.as_secs(), phase),
        )
    }

    /// True for failures worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind,
            UpstreamErrorKind::ConnectionReset
                | UpstreamErrorKind::Timeout
                | UpstreamErrorKind::RateLimited
                | UpstreamErrorKind::ServerError
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        for status in [429, 500, 502, 503, 408] {
            assert!(UpstreamError::from_status(status, "x").is_transient(), "{status}");
        }
        for status in [400, 401, 403, 404, 422] {
            assert!(!UpstreamError::from_status(status, "x").is_transient(), "{status}");
        }
        assert!(UpstreamError::connection_reset("peer closed").is_transient());
    }
}
