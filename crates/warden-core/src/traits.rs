//! Core trait definitions for the warden trust boundary.
//!
//! - `PolicyEngine`: trusted, pure classifier of commands and write paths
//! - `AuditWriter`: trusted sink recording every decision and outcome
//! - `Verifier`: trusted checker of tool arguments against their schema
//! - `Tool`: untrusted capability the model may invoke
//!
//! The agent loop wires them together. A `Tool` is never executed unless its
//! arguments verified, its decision record was written, and the effective
//! verdict was `Allow` or an approved `Confirm`.

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use warden_contracts::{
    error::WardenResult,
    execution::CallRecord,
    policy::Verdict,
    task::TaskContext,
    tool::{SafetySubject, ToolDescriptor},
    verify::ArgumentReport,
};

/// The policy engine: classifies proposed operations as Allow, Confirm, or Block.
///
/// Implementations must be pure with respect to their configuration and safe
/// to call concurrently without locking. They never fail: malformed input is
/// classified `Block`.
pub trait PolicyEngine: Send + Sync {
    /// Classify a shell command line.
    fn evaluate_command(&self, command: &str) -> Verdict;

    /// Classify a filesystem write target. Must be called before the write.
    fn evaluate_write_path(&self, path: &str) -> Verdict;

    /// Classify raw command bytes that may not be valid UTF-8.
    fn evaluate_command_bytes(&self, raw: &[u8]) -> Verdict {
        match std::str::from_utf8(raw) {
            Ok(command) => self.evaluate_command(command),
            Err(_) => Verdict::block("bash", "malformed-input", "command is not valid UTF-8"),
        }
    }
}

/// The audit writer: the append-only record of every tool call.
///
/// A failed write is fatal for the call being recorded: a decision that
/// cannot be audited does not execute.
pub trait AuditWriter: Send + Sync {
    /// Append one record.
    fn write(&self, record: &CallRecord) -> WardenResult<()>;

    /// Mark a task's portion of the log as complete.
    fn finalize(&self, task_id: &str) -> WardenResult<()>;
}

/// The argument verifier: the first gate a tool call passes.
pub trait Verifier: Send + Sync {
    /// Check `tool`'s `arguments` against its parameter `schema`.
    fn verify(&self, tool: &str, arguments: &Value, schema: &Value) -> WardenResult<ArgumentReport>;
}

/// Per-call context handed to a tool while it executes.
#[derive(Clone)]
pub struct ToolContext {
    pub task: TaskContext,
    /// Cancelled when the owning turn is cancelled. Tools decide where they
    /// can stop safely; work already in effect is never torn down.
    pub cancel: CancellationToken,
    policy: std::sync::Arc<dyn PolicyEngine>,
}

impl ToolContext {
    pub fn new(
        task: TaskContext,
        cancel: CancellationToken,
        policy: std::sync::Arc<dyn PolicyEngine>,
    ) -> Self {
        Self {
            task,
            cancel,
            policy,
        }
    }

    /// The write-path check, for tools that write to more than the path they
    /// declared. Call it before writing any bytes.
    pub fn check_write_path(&self, path: &str) -> Verdict {
        self.policy.evaluate_write_path(path)
    }
}

/// A capability the model may invoke.
///
/// The tool's risk tier lives in its descriptor and never depends on the
/// arguments of a particular call.
#[async_trait]
pub trait Tool: Send + Sync {
    fn descriptor(&self) -> &ToolDescriptor;

    /// Which argument the policy engine should classify.
    ///
    /// `Opaque` on a `Write` or `Execute` tool means the call needs approval.
    fn safety_subject(&self, _arguments: &Value) -> SafetySubject {
        SafetySubject::Opaque
    }

    /// Run the tool. Only called after every gate has passed.
    async fn execute(&self, arguments: Value, ctx: &ToolContext) -> WardenResult<Value>;
}
