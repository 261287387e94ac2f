//! Runtime error types for the warden trust boundary.
//!
//! All fallible operations return `WardenResult<T>`. Every variant maps onto
//! an `ErrorCategory` so callers can report a stable reason string plus a
//! category instead of an unstructured failure.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The unified error type for the warden runtime.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WardenError {
    /// A policy signature hard-blocked the operation. Never overridable.
    #[error("operation blocked by policy: {reason}")]
    Blocked { reason: String },

    /// The user denied the operation, or the approval timed out.
    #[error("operation denied: {reason}")]
    Denied { reason: String },

    /// The approval store is full. Retryable; not a policy decision.
    #[error("approval store is at capacity ({capacity} pending)")]
    CapacityExceeded { capacity: usize },

    /// No pending approval exists for the given id, or the id is malformed.
    #[error("approval '{id}' not found")]
    ApprovalNotFound { id: String },

    /// A retryable upstream or stream failure that outlived its retries.
    #[error("transient upstream failure after {attempts} attempt(s): {reason}")]
    Transient { reason: String, attempts: u32 },

    /// A non-retryable upstream failure. Disables the caller for the run.
    #[error("permanent upstream failure: {reason}")]
    Permanent { reason: String },

    /// An agent loop ran out of model iterations.
    #[error("iteration limit of {limit} exceeded")]
    IterationLimitExceeded { limit: u32 },

    /// A sub-agent spawn would exceed the configured tree depth.
    #[error("sub-agent depth {depth} exceeds maximum {max_depth}")]
    DepthExceeded { depth: u32, max_depth: u32 },

    /// A sub-agent spawn would exceed the run-wide live task limit.
    #[error("sub-agent limit of {max_total} live tasks reached")]
    TaskLimitExceeded { max_total: usize },

    /// A wall-clock deadline elapsed.
    #[error("timed out: {reason}")]
    TimedOut { reason: String },

    /// Cooperative cancellation was observed at a suspension point.
    #[error("operation cancelled")]
    Cancelled,

    /// The model requested a tool that is not registered.
    #[error("unknown tool '{name}'")]
    UnknownTool { name: String },

    /// Tool arguments did not satisfy the tool's parameter schema.
    #[error("invalid arguments for '{tool}': {reason}")]
    InvalidArguments { tool: String, reason: String },

    /// The tool itself reported a failure while executing.
    #[error("tool '{tool}' failed: {reason}")]
    ToolFailed { tool: String, reason: String },

    /// The audit writer could not persist a record. A call that cannot be
    /// audited does not execute.
    #[error("audit write failed: {reason}")]
    AuditWriteFailed { reason: String },

    /// A configuration value is missing or invalid.
    #[error("configuration error: {reason}")]
    ConfigError { reason: String },
}

impl WardenError {
    /// Map this error onto the reporting taxonomy.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Blocked { .. } => ErrorCategory::Blocked,
            Self::Denied { .. } | Self::ApprovalNotFound { .. } => ErrorCategory::Denied,
            Self::CapacityExceeded { .. } => ErrorCategory::CapacityExceeded,
            Self::Transient { .. } => ErrorCategory::Transient,
            Self::Permanent { .. } => ErrorCategory::Permanent,
            Self::IterationLimitExceeded { .. } => ErrorCategory::IterationLimitExceeded,
            Self::DepthExceeded { .. } => ErrorCategory::DepthExceeded,
            Self::TaskLimitExceeded { .. } => ErrorCategory::TaskLimitExceeded,
            Self::TimedOut { .. } => ErrorCategory::TimedOut,
            Self::Cancelled => ErrorCategory::Cancelled,
            Self::UnknownTool { .. } | Self::InvalidArguments { .. } => {
                ErrorCategory::InvalidRequest
            }
            Self::ToolFailed { .. } => ErrorCategory::ToolFailure,
            Self::AuditWriteFailed { .. } | Self::ConfigError { .. } => {
                ErrorCategory::Infrastructure
            }
        }
    }
}

/// Reporting category attached to every terminal failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Blocked,
    Denied,
    CapacityExceeded,
    Transient,
    Permanent,
    IterationLimitExceeded,
    DepthExceeded,
    /// Too many sub-agents live at once; unrelated to depth.
    TaskLimitExceeded,
    TimedOut,
    Cancelled,
    InvalidRequest,
    ToolFailure,
    Infrastructure,
}

impl ErrorCategory {
    /// True for infrastructure conditions a caller may retry later.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::CapacityExceeded | Self::Transient)
    }
}

/// Convenience alias used throughout the warden crates.
pub type WardenResult<T> = Result<T, WardenError>;
