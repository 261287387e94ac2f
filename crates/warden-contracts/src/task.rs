//! Agent task identity and lifecycle types.
//!
//! Sub-agents form a strict tree. Each task record carries its depth
//! explicitly instead of inferring it from a call stack, so accounting and
//! cancellation work the same regardless of how tasks are scheduled.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for one agent task (root loop or sub-agent).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub uuid::Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status of an agent task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Running,
    Succeeded,
    Failed,
    Cancelled,
    TimedOut,
    IterationLimitExceeded,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        self != Self::Running
    }
}

/// Position of a running loop in the task tree.
///
/// The root loop has depth 0 and no parent; it is never stored in the
/// scheduler's arena and never counts against sub-agent limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskContext {
    pub id: TaskId,
    pub parent_id: Option<TaskId>,
    pub depth: u32,
}

impl TaskContext {
    pub fn root() -> Self {
        Self {
            id: TaskId::new(),
            parent_id: None,
            depth: 0,
        }
    }
}

/// Arena record for one sub-agent, owned by the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTask {
    pub id: TaskId,
    pub parent_id: Option<TaskId>,
    /// Parent depth + 1.
    pub depth: u32,
    pub iteration_count: u32,
    pub started_at: DateTime<Utc>,
    pub status: TaskStatus,
}

impl AgentTask {
    pub fn context(&self) -> TaskContext {
        TaskContext {
            id: self.id,
            parent_id: self.parent_id,
            depth: self.depth,
        }
    }
}

/// What a finished sub-agent hands back to its parent.
///
/// Timeouts and iteration exhaustion still deliver whatever output the child
/// produced, flagged with `partial = true`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: TaskId,
    pub depth: u32,
    pub status: TaskStatus,
    pub output: String,
    pub partial: bool,
    pub iterations: u32,
    pub reason: Option<String>,
}
