//! Audit record types for tool-call decisions and outcomes.
//!
//! Every tool call produces two `CallRecord`s: a `Decision` written before the
//! tool can run and an `Outcome` written after it finishes or is refused. A
//! call whose decision record cannot be written never executes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{policy::Verdict, task::TaskId, tool::ToolOutcome};

/// Which half of a tool call a record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStage {
    Decision,
    Outcome,
}

/// One immutable entry in the audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRecord {
    /// The agent task that issued the call.
    pub task_id: TaskId,
    pub depth: u32,
    pub call_id: String,
    pub tool_name: String,
    pub stage: RecordStage,
    pub arguments: Value,
    /// Effective verdict. Absent when the call failed before classification.
    pub verdict: Option<Verdict>,
    /// Present only on `Outcome` records.
    pub outcome: Option<ToolOutcome>,
    pub timestamp: DateTime<Utc>,
}
