//! The agent loop: one conversation turn, from model stream to tool results.
//!
//! Every proposed tool call passes the same pipeline, in this order:
//!
//!   lookup → verify arguments → classify (tier + policy) → audit decision
//!     → Block: fail | Confirm: approval gate | Allow: continue
//!     → execute → audit outcome
//!
//! A tool's `execute` is only reachable after the decision record was
//! written and the effective verdict was `Allow` or an approved `Confirm`.
//! `run_agent` calls take the same path and then hand off to the
//! `SubAgentScheduler`; the child loop shares this loop's policy, gate,
//! verifier, audit, and stream supervisor, and sees a subset of its tools.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use warden_approval::ApprovalGate;
use warden_contracts::{
    approval::ApprovalOutcome,
    error::{WardenError, WardenResult},
    execution::{CallRecord, RecordStage},
    message::{Message, ModelRequest, ToolCallProposal},
    policy::{Verdict, VerdictKind},
    task::{TaskContext, TaskId, TaskStatus},
    tool::{RiskTier, SafetySubject, ToolCallSummary, ToolDescriptor, ToolOutcome},
};
use warden_stream::{StreamSupervisor, Upstream};

use crate::dedup;
use crate::registry::ToolRegistry;
use crate::scheduler::{SpawnRequest, SubAgentScheduler, TaskProgress, TaskRun, TaskRunner};
use crate::traits::{AuditWriter, PolicyEngine, Tool, ToolContext, Verifier};

/// Name of the built-in tool that spawns a sub-agent.
pub const RUN_AGENT_TOOL: &str = "run_agent";

/// Descriptor advertised for `run_agent` when a scheduler is attached.
pub fn run_agent_descriptor() -> ToolDescriptor {
    ToolDescriptor {
        name: RUN_AGENT_TOOL.to_string(),
        description: "Delegate an independent subtask to a sub-agent and return its result."
            .to_string(),
        risk_tier: RiskTier::Execute,
        parameters: json!({
            "type": "object",
            "properties": {
                "prompt": { "type": "string", "minLength": 1 },
                "tools": { "type": "array", "items": { "type": "string" } }
            },
            "required": ["prompt"]
        }),
    }
}

/// The trusted components every call passes through.
#[derive(Clone)]
pub struct TrustBoundary {
    pub policy: Arc<dyn PolicyEngine>,
    pub verifier: Arc<dyn Verifier>,
    pub audit: Arc<dyn AuditWriter>,
    pub gate: ApprovalGate,
}

/// The result of one `run_turn`.
#[derive(Debug, Clone)]
pub struct TurnReport {
    pub task_id: TaskId,
    pub status: TaskStatus,
    /// The most recent non-empty assistant text. Partial unless `Succeeded`.
    pub output: String,
    /// Model calls made.
    pub iterations: u32,
    /// Every tool outcome, in the order the model issued the calls.
    pub outcomes: Vec<ToolOutcome>,
    /// The conversation including assistant turns and tool results.
    pub messages: Vec<Message>,
    pub reason: Option<String>,
}

impl TurnReport {
    /// Collapsed view of `outcomes` for display.
    pub fn summaries(&self) -> Vec<ToolCallSummary> {
        dedup::collapse(&self.outcomes)
    }
}

enum CallTarget {
    Tool(Arc<dyn Tool>),
    SpawnAgent,
}

/// Per-turn orchestrator. Cheap to clone; clones share every component.
#[derive(Clone)]
pub struct AgentLoop {
    trust: TrustBoundary,
    registry: ToolRegistry,
    upstream: Arc<dyn Upstream>,
    supervisor: Arc<StreamSupervisor>,
    scheduler: Option<SubAgentScheduler>,
    can_spawn: bool,
    max_iterations: u32,
}

impl AgentLoop {
    pub fn new(
        trust: TrustBoundary,
        registry: ToolRegistry,
        upstream: Arc<dyn Upstream>,
        supervisor: Arc<StreamSupervisor>,
    ) -> Self {
        Self {
            trust,
            registry,
            upstream,
            supervisor,
            scheduler: None,
            can_spawn: false,
            max_iterations: 50,
        }
    }

    /// Enable `run_agent`, backed by `scheduler`.
    pub fn with_scheduler(mut self, scheduler: SubAgentScheduler) -> Self {
        self.scheduler = Some(scheduler);
        self.can_spawn = true;
        self
    }

    /// Model calls allowed per root turn.
    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Everything the model is told it may call.
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        let mut descriptors = self.registry.descriptors();
        if self.spawn_enabled() {
            descriptors.push(run_agent_descriptor());
        }
        descriptors
    }

    fn spawn_enabled(&self) -> bool {
        self.can_spawn && self.scheduler.is_some()
    }

    /// Run one root turn until the model stops calling tools, the iteration
    /// cap is hit, the stream fails, or `cancel` fires.
    pub async fn run_turn(
        &self,
        task: TaskContext,
        messages: Vec<Message>,
        cancel: &CancellationToken,
    ) -> TurnReport {
        self.run_loop(task, messages, self.max_iterations, cancel, TaskProgress::detached())
            .await
    }

    async fn run_loop(
        &self,
        task: TaskContext,
        mut messages: Vec<Message>,
        max_iterations: u32,
        cancel: &CancellationToken,
        progress: TaskProgress,
    ) -> TurnReport {
        info!(task_id = %task.id, depth = task.depth, max_iterations, "agent turn started");

        let mut iterations = 0;
        let mut output = String::new();
        let mut outcomes = Vec::new();

        let (status, reason) = loop {
            if cancel.is_cancelled() {
                break (TaskStatus::Cancelled, Some(WardenError::Cancelled.to_string()));
            }
            if iterations >= max_iterations {
                warn!(task_id = %task.id, limit = max_iterations, "iteration limit reached");
                let error = WardenError::IterationLimitExceeded {
                    limit: max_iterations,
                };
                break (TaskStatus::IterationLimitExceeded, Some(error.to_string()));
            }
            iterations += 1;
            progress.record_iteration(iterations);

            let request = ModelRequest {
                messages: messages.clone(),
                tools: self.descriptors(),
            };
            let response = match self
                .supervisor
                .run(self.upstream.as_ref(), &request, cancel)
                .await
            {
                Ok(streamed) => streamed.response,
                Err(WardenError::Cancelled) => {
                    break (TaskStatus::Cancelled, Some(WardenError::Cancelled.to_string()));
                }
                Err(e) => {
                    warn!(task_id = %task.id, error = %e, "model stream failed");
                    break (TaskStatus::Failed, Some(e.to_string()));
                }
            };

            if !response.content.is_empty() {
                output = response.content.clone();
                progress.record_output(&output);
            }
            messages.push(Message::assistant(
                response.content.clone(),
                response.tool_calls.clone(),
            ));
            if !response.has_tool_calls() {
                break (TaskStatus::Succeeded, None);
            }

            let turn_outcomes = self.execute_calls(task, &response.tool_calls, cancel).await;
            for outcome in &turn_outcomes {
                messages.push(Message::tool_result(
                    outcome.call_id.clone(),
                    &outcome.to_model_payload(),
                ));
            }
            outcomes.extend(turn_outcomes);
        };

        if let Err(e) = self.trust.audit.finalize(&task.id.to_string()) {
            error!(task_id = %task.id, error = %e, "audit finalize failed");
        }
        info!(
            task_id = %task.id,
            status = ?status,
            iterations,
            tool_calls = outcomes.len(),
            "agent turn finished"
        );

        TurnReport {
            task_id: task.id,
            status,
            output,
            iterations,
            outcomes,
            messages,
            reason,
        }
    }

    /// Run one model turn's calls. Results come back in issue order; runs
    /// of consecutive `run_agent` calls execute concurrently.
    async fn execute_calls(
        &self,
        task: TaskContext,
        calls: &[ToolCallProposal],
        cancel: &CancellationToken,
    ) -> Vec<ToolOutcome> {
        let mut outcomes = Vec::with_capacity(calls.len());
        let mut next = 0;
        while next < calls.len() {
            if cancel.is_cancelled() {
                for call in &calls[next..] {
                    outcomes.push(self.reject(task, call, None, WardenError::Cancelled));
                }
                break;
            }

            let is_spawn = |call: &ToolCallProposal| call.name == RUN_AGENT_TOOL && self.spawn_enabled();
            if is_spawn(&calls[next]) {
                let end = calls[next..]
                    .iter()
                    .position(|call| !is_spawn(call))
                    .map_or(calls.len(), |offset| next + offset);
                let batch = calls[next..end]
                    .iter()
                    .map(|call| self.handle_call(task, call, cancel));
                outcomes.extend(join_all(batch).await);
                next = end;
            } else {
                outcomes.push(self.handle_call(task, &calls[next], cancel).await);
                next += 1;
            }
        }
        outcomes
    }

    fn resolve(&self, name: &str) -> Option<(CallTarget, ToolDescriptor)> {
        if let Some(tool) = self.registry.get(name) {
            return Some((CallTarget::Tool(tool.clone()), tool.descriptor().clone()));
        }
        if name == RUN_AGENT_TOOL && self.spawn_enabled() {
            return Some((CallTarget::SpawnAgent, run_agent_descriptor()));
        }
        None
    }

    async fn handle_call(
        &self,
        task: TaskContext,
        call: &ToolCallProposal,
        cancel: &CancellationToken,
    ) -> ToolOutcome {
        // ── Lookup ───────────────────────────────────────────────────────────
        let Some((target, descriptor)) = self.resolve(&call.name) else {
            let error = WardenError::UnknownTool {
                name: call.name.clone(),
            };
            return self.reject(task, call, None, error);
        };

        // ── Argument verification ────────────────────────────────────────────
        match self
            .trust
            .verifier
            .verify(&call.name, &call.arguments, &descriptor.parameters)
        {
            Ok(report) if report.passed => {}
            Ok(report) => {
                let error = WardenError::InvalidArguments {
                    tool: call.name.clone(),
                    reason: report.summary(),
                };
                return self.reject(task, call, None, error);
            }
            Err(e) => return self.reject(task, call, None, e),
        }

        // ── Classification ───────────────────────────────────────────────────
        let subject = match &target {
            CallTarget::Tool(tool) => tool.safety_subject(&call.arguments),
            CallTarget::SpawnAgent => SafetySubject::Opaque,
        };
        let verdict = match &target {
            CallTarget::Tool(_) => self.classify(&descriptor, &subject),
            // The child's own calls are classified as it issues them.
            CallTarget::SpawnAgent => Verdict::allow(RUN_AGENT_TOOL),
        };
        debug!(
            task_id = %task.id,
            call_id = %call.call_id,
            tool = %call.name,
            verdict = ?verdict.kind,
            rule = ?verdict.matched_rule,
            "tool call classified"
        );

        // ── Decision record ──────────────────────────────────────────────────
        //
        // Nothing below runs unless this write succeeded.
        if let Err(e) = self.record(task, call, RecordStage::Decision, Some(verdict.clone()), None) {
            error!(
                task_id = %task.id,
                call_id = %call.call_id,
                error = %e,
                "decision record not written, call will not run"
            );
            return ToolOutcome::from_error(call.call_id.clone(), call.name.clone(), &e);
        }

        // ── Verdict ──────────────────────────────────────────────────────────
        match verdict.kind {
            VerdictKind::Block => {
                warn!(tool = %call.name, rule = ?verdict.matched_rule, reason = %verdict.reason, "tool call blocked");
                let error = WardenError::Blocked {
                    reason: verdict.reason.clone(),
                };
                return self.finish(task, call, &verdict, ToolOutcome::from_error(call.call_id.clone(), call.name.clone(), &error));
            }
            VerdictKind::Confirm => {
                let description = describe(&call.name, &subject, &verdict);
                let denial = match self.trust.gate.request(&description, cancel).await {
                    Ok(ApprovalOutcome::Approved) => None,
                    Ok(ApprovalOutcome::Denied) => Some(WardenError::Denied {
                        reason: format!("approval denied: {}", verdict.reason),
                    }),
                    Ok(ApprovalOutcome::TimedOut) => Some(WardenError::Denied {
                        reason: format!("approval timed out: {}", verdict.reason),
                    }),
                    Err(e) => Some(e),
                };
                if let Some(error) = denial {
                    warn!(tool = %call.name, error = %error, "tool call not approved");
                    let outcome = ToolOutcome::from_error(call.call_id.clone(), call.name.clone(), &error);
                    return self.finish(task, call, &verdict, outcome);
                }
                info!(tool = %call.name, call_id = %call.call_id, "tool call approved");
            }
            VerdictKind::Allow => {}
        }

        // ── Execution ────────────────────────────────────────────────────────
        if cancel.is_cancelled() {
            let outcome = ToolOutcome::from_error(call.call_id.clone(), call.name.clone(), &WardenError::Cancelled);
            return self.finish(task, call, &verdict, outcome);
        }

        let outcome = match target {
            CallTarget::Tool(tool) => {
                let ctx = ToolContext::new(task, cancel.clone(), self.trust.policy.clone());
                match tool.execute(call.arguments.clone(), &ctx).await {
                    Ok(output) => ToolOutcome::success(call.call_id.clone(), call.name.clone(), output),
                    Err(e) => {
                        warn!(tool = %call.name, error = %e, "tool execution failed");
                        ToolOutcome::from_error(call.call_id.clone(), call.name.clone(), &e)
                    }
                }
            }
            CallTarget::SpawnAgent => self.spawn_agent(task, call, cancel).await,
        };
        self.finish(task, call, &verdict, outcome)
    }

    /// Combine the tool's risk tier with the policy verdict on its subject.
    fn classify(&self, descriptor: &ToolDescriptor, subject: &SafetySubject) -> Verdict {
        if !descriptor.risk_tier.requires_classification() {
            return Verdict::allow(&descriptor.name);
        }

        let policy_verdict = match subject {
            SafetySubject::Command(command) => self.trust.policy.evaluate_command(command),
            SafetySubject::WritePath(path) => self.trust.policy.evaluate_write_path(path),
            // A tier that needs classification but exposes nothing to
            // classify is never allowed outright.
            SafetySubject::Opaque => Verdict::confirm(
                &descriptor.name,
                "no-safety-subject",
                "tool declares no command or path for the safety check",
            ),
        };
        let verdict = if descriptor.risk_tier == RiskTier::Destructive {
            let tier = Verdict::confirm(
                &descriptor.name,
                "destructive-tier",
                "tool is classified destructive and always needs approval",
            );
            tier.stricter(policy_verdict)
        } else {
            policy_verdict
        };

        Verdict {
            subject: descriptor.name.clone(),
            ..verdict
        }
    }

    async fn spawn_agent(
        &self,
        task: TaskContext,
        call: &ToolCallProposal,
        cancel: &CancellationToken,
    ) -> ToolOutcome {
        let Some(scheduler) = &self.scheduler else {
            let error = WardenError::UnknownTool {
                name: call.name.clone(),
            };
            return ToolOutcome::from_error(call.call_id.clone(), call.name.clone(), &error);
        };

        let request = SpawnRequest {
            prompt: call.arguments["prompt"].as_str().unwrap_or_default().to_string(),
            tools: call.arguments["tools"]
                .as_array()
                .map(|names| names.iter().filter_map(Value::as_str).map(str::to_string).collect())
                .unwrap_or_default(),
        };

        let runner: Arc<dyn TaskRunner> = Arc::new(self.clone());
        match scheduler.spawn(&task, request, runner, cancel) {
            Ok(handle) => {
                let result = handle.join().await;
                ToolOutcome::from_task_result(call.call_id.clone(), call.name.clone(), &result)
            }
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "sub-agent not spawned");
                ToolOutcome::from_error(call.call_id.clone(), call.name.clone(), &e)
            }
        }
    }

    // ── Audit helpers ────────────────────────────────────────────────────────

    fn record(
        &self,
        task: TaskContext,
        call: &ToolCallProposal,
        stage: RecordStage,
        verdict: Option<Verdict>,
        outcome: Option<ToolOutcome>,
    ) -> WardenResult<()> {
        self.trust.audit.write(&CallRecord {
            task_id: task.id,
            depth: task.depth,
            call_id: call.call_id.clone(),
            tool_name: call.name.clone(),
            stage,
            arguments: call.arguments.clone(),
            verdict,
            outcome,
            timestamp: Utc::now(),
        })
    }

    /// Record the outcome of a call that got past its decision record.
    fn finish(&self, task: TaskContext, call: &ToolCallProposal, verdict: &Verdict, outcome: ToolOutcome) -> ToolOutcome {
        if let Err(e) = self.record(task, call, RecordStage::Outcome, Some(verdict.clone()), Some(outcome.clone())) {
            error!(task_id = %task.id, call_id = %call.call_id, error = %e, "outcome record not written");
        }
        outcome
    }

    /// Fail a call that never reached classification, and record why.
    fn reject(&self, task: TaskContext, call: &ToolCallProposal, verdict: Option<Verdict>, error: WardenError) -> ToolOutcome {
        debug!(tool = %call.name, call_id = %call.call_id, error = %error, "tool call rejected");
        let outcome = ToolOutcome::from_error(call.call_id.clone(), call.name.clone(), &error);
        if let Err(e) = self.record(task, call, RecordStage::Outcome, verdict, Some(outcome.clone())) {
            error!(task_id = %task.id, call_id = %call.call_id, error = %e, "outcome record not written");
        }
        outcome
    }
}

#[async_trait]
impl TaskRunner for AgentLoop {
    async fn run_task(
        &self,
        task: TaskContext,
        request: SpawnRequest,
        max_iterations: u32,
        cancel: CancellationToken,
        progress: TaskProgress,
    ) -> TaskRun {
        let child = AgentLoop {
            registry: self.registry.restricted_to(&request.tools),
            can_spawn: self.can_spawn
                && (request.tools.is_empty() || request.tools.iter().any(|t| t == RUN_AGENT_TOOL)),
            ..self.clone()
        };
        let report = child
            .run_loop(task, vec![Message::user(request.prompt)], max_iterations, &cancel, progress)
            .await;
        TaskRun {
            status: report.status,
            output: report.output,
            iterations: report.iterations,
            reason: report.reason,
        }
    }
}

/// The text shown to whoever approves a `Confirm` call.
fn describe(tool: &str, subject: &SafetySubject, verdict: &Verdict) -> String {
    let target = match subject {
        SafetySubject::Command(command) => format!(" `{}`", command),
        SafetySubject::WritePath(path) => format!(" write to {}", path),
        SafetySubject::Opaque => String::new(),
    };
    format!("{}{}: {}", tool, target, verdict.reason)
}
