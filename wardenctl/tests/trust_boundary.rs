//! End-to-end checks of the trust boundary with the real policy engine,
//! broker, audit trail and scheduler wired together.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use warden_approval::{ApprovalBroker, ApprovalGate};
use warden_audit::InMemoryAuditWriter;
use warden_contracts::{
    approval::ApprovalOutcome,
    config::{SafetyConfig, SubAgentConfig},
    error::{WardenError, WardenResult},
    execution::RecordStage,
    message::{Message, ModelRequest, ToolCallProposal},
    policy::VerdictKind,
    task::{TaskContext, TaskId, TaskStatus},
    tool::{RiskTier, SafetySubject, ToolCallStatus, ToolDescriptor},
};
use warden_core::{
    traits::{PolicyEngine, Tool, ToolContext},
    AgentLoop, SpawnRequest, SubAgentScheduler, TaskProgress, TaskRun, TaskRunner, ToolRegistry,
    TrustBoundary,
};
use warden_policy::SafetyPolicyEngine;
use warden_stream::{
    RetryPolicy, StreamEvent, StreamSupervisor, StreamTimeouts, Upstream, UpstreamError,
    UpstreamStream,
};
use warden_verify::SchemaVerifier;

fn engine_with_home(home: &std::path::Path) -> SafetyPolicyEngine {
    SafetyPolicyEngine::with_dirs(
        &SafetyConfig::default(),
        home.to_path_buf(),
        Some(home.to_path_buf()),
    )
}

// ── Policy ───────────────────────────────────────────────────────────────────

#[test]
fn recursive_root_delete_is_blocked() {
    let home = tempfile::tempdir().unwrap();
    let verdict = engine_with_home(home.path()).evaluate_command("rm -rf /");
    assert_eq!(verdict.kind, VerdictKind::Block);
}

#[test]
fn force_push_needs_confirmation() {
    let home = tempfile::tempdir().unwrap();
    let verdict = engine_with_home(home.path()).evaluate_command("git push --force");
    assert_eq!(verdict.kind, VerdictKind::Confirm);
}

#[test]
fn listing_is_allowed() {
    let home = tempfile::tempdir().unwrap();
    let verdict = engine_with_home(home.path()).evaluate_command("ls -la");
    assert_eq!(verdict.kind, VerdictKind::Allow);
}

#[test]
fn ssh_key_write_needs_confirmation() {
    let home = tempfile::tempdir().unwrap();
    let verdict = engine_with_home(home.path()).evaluate_write_path("~/.ssh/id_rsa");
    assert_eq!(verdict.kind, VerdictKind::Confirm);
}

#[cfg(unix)]
#[test]
fn symlinked_directory_into_etc_is_blocked() {
    let work = tempfile::tempdir().unwrap();
    std::os::unix::fs::symlink("/etc", work.path().join("config")).unwrap();

    let engine = engine_with_home(work.path());
    let verdict = engine.evaluate_write_path("config/shadow");
    assert_eq!(verdict.kind, VerdictKind::Block);
}

// ── Approval ─────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn unanswered_approval_times_out_and_late_answer_is_rejected() {
    let broker = Arc::new(ApprovalBroker::new(Duration::from_secs(120)));
    let ticket = broker.create("git push --force").unwrap();
    let id = ticket.id().clone();

    let waiter = {
        let broker = Arc::clone(&broker);
        tokio::spawn(async move { broker.await_result(ticket).await })
    };

    tokio::time::sleep(Duration::from_secs(121)).await;
    assert_eq!(waiter.await.unwrap(), ApprovalOutcome::TimedOut);

    tokio::time::sleep(Duration::from_secs(9)).await;
    assert!(matches!(
        broker.resolve(id.as_str(), true),
        Err(WardenError::ApprovalNotFound { .. })
    ));
    assert!(broker.is_empty());
}

// ── Scheduling ───────────────────────────────────────────────────────────────

struct NeverRuns;

#[async_trait]
impl TaskRunner for NeverRuns {
    async fn run_task(
        &self,
        _task: TaskContext,
        _request: SpawnRequest,
        _max_iterations: u32,
        _cancel: CancellationToken,
        _progress: TaskProgress,
    ) -> TaskRun {
        panic!("a rejected spawn must never run");
    }
}

#[tokio::test]
async fn fourth_level_spawn_is_rejected() {
    let scheduler = SubAgentScheduler::new(SubAgentConfig::default());
    let parent = TaskContext {
        id: TaskId::new(),
        parent_id: Some(TaskId::new()),
        depth: 3,
    };

    let result = scheduler.spawn(
        &parent,
        SpawnRequest {
            prompt: "go deeper".to_string(),
            tools: Vec::new(),
        },
        Arc::new(NeverRuns),
        &CancellationToken::new(),
    );

    assert!(matches!(
        result,
        Err(WardenError::DepthExceeded { depth: 4, max_depth: 3 })
    ));
    assert_eq!(scheduler.live_count(), 0);
}

// ── Full loop ────────────────────────────────────────────────────────────────

/// Replays canned model responses, one per connect.
struct Scripted {
    replies: Mutex<VecDeque<Vec<StreamEvent>>>,
}

struct Replay(VecDeque<StreamEvent>);

#[async_trait]
impl Upstream for Scripted {
    async fn connect(&self, _request: &ModelRequest) -> Result<Box<dyn UpstreamStream>, UpstreamError> {
        let events = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| vec![StreamEvent::Token("done".to_string())]);
        Ok(Box::new(Replay(events.into())))
    }
}

#[async_trait]
impl UpstreamStream for Replay {
    async fn next_event(&mut self) -> Option<Result<StreamEvent, UpstreamError>> {
        self.0.pop_front().map(Ok)
    }
}

/// A shell tool that records what it was asked to run instead of running it.
struct FakeShell {
    descriptor: ToolDescriptor,
    ran: Mutex<Vec<String>>,
}

#[async_trait]
impl Tool for FakeShell {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    fn safety_subject(&self, arguments: &Value) -> SafetySubject {
        SafetySubject::Command(arguments["command"].as_str().unwrap_or_default().to_string())
    }

    async fn execute(&self, arguments: Value, _ctx: &ToolContext) -> WardenResult<Value> {
        let command = arguments["command"].as_str().unwrap_or_default().to_string();
        self.ran.lock().unwrap().push(command);
        Ok(json!({ "exit_code": 0 }))
    }
}

fn bash_call(id: &str, command: &str) -> StreamEvent {
    StreamEvent::ToolCall(ToolCallProposal {
        call_id: id.to_string(),
        name: "bash".to_string(),
        arguments: json!({ "command": command }),
    })
}

#[tokio::test]
async fn headless_loop_runs_safe_commands_and_refuses_the_rest() {
    let home = tempfile::tempdir().unwrap();
    let audit = InMemoryAuditWriter::new("e2e");
    let shell = Arc::new(FakeShell {
        descriptor: ToolDescriptor {
            name: "bash".to_string(),
            description: "run a shell command".to_string(),
            risk_tier: RiskTier::Execute,
            parameters: json!({
                "type": "object",
                "required": ["command"],
                "properties": { "command": { "type": "string" } }
            }),
        },
        ran: Mutex::new(Vec::new()),
    });

    let upstream = Arc::new(Scripted {
        replies: Mutex::new(VecDeque::from([
            vec![
                bash_call("c1", "ls -la"),
                bash_call("c2", "rm -rf /"),
                bash_call("c3", "git push --force"),
            ],
            vec![StreamEvent::Token("finished".to_string())],
        ])),
    });

    let trust = TrustBoundary {
        policy: Arc::new(engine_with_home(home.path())),
        verifier: Arc::new(SchemaVerifier::new()),
        audit: Arc::new(audit.clone()),
        gate: ApprovalGate::headless(Arc::new(ApprovalBroker::new(Duration::from_secs(120)))),
    };
    let supervisor = Arc::new(StreamSupervisor::new(
        StreamTimeouts::default(),
        RetryPolicy::interactive(3),
    ));
    let agent = AgentLoop::new(
        trust,
        ToolRegistry::new().with(shell.clone()),
        upstream,
        supervisor,
    );

    let task = TaskContext::root();
    let report = agent
        .run_turn(task, vec![Message::user("tidy up")], &CancellationToken::new())
        .await;

    assert_eq!(report.status, TaskStatus::Succeeded);
    assert_eq!(report.output, "finished");
    let statuses: Vec<_> = report.outcomes.iter().map(|o| o.status).collect();
    assert_eq!(
        statuses,
        vec![ToolCallStatus::Success, ToolCallStatus::Blocked, ToolCallStatus::Denied]
    );
    assert_eq!(*shell.ran.lock().unwrap(), vec!["ls -la".to_string()]);

    let records = audit.records_for(task.id);
    assert_eq!(records.len(), 6);
    assert!(records
        .iter()
        .filter(|r| r.stage == RecordStage::Decision)
        .all(|r| r.verdict.is_some()));
    assert!(audit.verify_integrity());
    assert_eq!(audit.export_log().unwrap().finalized_tasks, vec![task.id.to_string()]);
}
