//! Tool-call request and outcome types.
//!
//! A tool's `RiskTier` is a static property of the tool itself. It is checked
//! independently of the policy verdict on the call's arguments; both gates
//! must pass before a call executes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ErrorCategory, WardenError};
use crate::task::{TaskResult, TaskStatus};

/// Static risk classification of a tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTier {
    Read,
    Write,
    Execute,
    Destructive,
}

impl RiskTier {
    /// True when calls of this tier must pass the policy engine.
    pub fn requires_classification(self) -> bool {
        !matches!(self, Self::Read)
    }
}

/// What a tool's arguments expose to the policy engine.
///
/// Tools declare which argument carries the shell command or target path;
/// the loop never guesses from argument names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SafetySubject {
    /// A shell command line, checked with `evaluate_command`.
    Command(String),
    /// A filesystem write target, checked with `evaluate_write_path`.
    WritePath(String),
    /// Nothing argument-dependent to classify.
    Opaque,
}

/// Static description of a registered tool, as advertised to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub risk_tier: RiskTier,
    /// JSON Schema describing the tool's arguments.
    pub parameters: Value,
}

/// A tool call the model proposed, resolved against the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Model-assigned call id, echoed back with the tool result.
    pub call_id: String,
    pub name: String,
    pub arguments: Value,
    pub risk_tier: RiskTier,
}

/// Terminal status of one tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    Success,
    Blocked,
    Denied,
    Failed,
    Cancelled,
}

/// The recorded result of one tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub call_id: String,
    pub tool_name: String,
    pub status: ToolCallStatus,
    /// Tool output on success, `Value::Null` otherwise.
    pub output: Value,
    /// Failure category, absent on success.
    pub category: Option<ErrorCategory>,
    /// Failure explanation, absent on success.
    pub reason: Option<String>,
}

impl ToolOutcome {
    pub fn success(call_id: impl Into<String>, tool_name: impl Into<String>, output: Value) -> Self {
        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            status: ToolCallStatus::Success,
            output,
            category: None,
            reason: None,
        }
    }

    /// Build a failed outcome from an error, choosing the status from its category.
    pub fn from_error(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        error: &WardenError,
    ) -> Self {
        let category = error.category();
        let status = match category {
            ErrorCategory::Blocked => ToolCallStatus::Blocked,
            ErrorCategory::Denied => ToolCallStatus::Denied,
            ErrorCategory::Cancelled => ToolCallStatus::Cancelled,
            _ => ToolCallStatus::Failed,
        };
        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            status,
            output: Value::Null,
            category: Some(category),
            reason: Some(error.to_string()),
        }
    }

    /// Wrap a finished sub-agent's result. Non-successful children still
    /// carry their structured result, partial output included.
    pub fn from_task_result(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        result: &TaskResult,
    ) -> Self {
        let output = serde_json::to_value(result).unwrap_or(Value::Null);
        let (status, category) = match result.status {
            TaskStatus::Succeeded | TaskStatus::Running => (ToolCallStatus::Success, None),
            TaskStatus::Cancelled => (ToolCallStatus::Cancelled, Some(ErrorCategory::Cancelled)),
            TaskStatus::TimedOut => (ToolCallStatus::Failed, Some(ErrorCategory::TimedOut)),
            TaskStatus::IterationLimitExceeded => (
                ToolCallStatus::Failed,
                Some(ErrorCategory::IterationLimitExceeded),
            ),
            TaskStatus::Failed => (ToolCallStatus::Failed, Some(ErrorCategory::ToolFailure)),
        };
        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            status,
            output,
            category,
            reason: result.reason.clone(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ToolCallStatus::Success
    }

    /// The JSON body fed back to the model as this call's result.
    pub fn to_model_payload(&self) -> Value {
        match self.status {
            ToolCallStatus::Success => self.output.clone(),
            _ => {
                let mut payload = serde_json::json!({
                    "error": self.reason.clone().unwrap_or_default(),
                    "status": self.status,
                    "category": self.category,
                });
                if !self.output.is_null() {
                    payload["output"] = self.output.clone();
                }
                payload
            }
        }
    }
}

/// One entry of the collapsed, presentation-only view of a turn's calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallSummary {
    pub tool_name: String,
    /// How many consecutive calls of this tool the entry represents.
    pub count: usize,
    /// Status of each collapsed call, in execution order.
    pub statuses: Vec<ToolCallStatus>,
}
