//! The sub-agent scheduler.
//!
//! Sub-agents form a strict tree. Every live sub-agent has one record in an
//! arena keyed by `TaskId`, carrying its depth explicitly, and all admission
//! checks run against that arena under one lock:
//!
//! - depth: `parent.depth + 1 <= max_depth`, checked before anything starts
//! - live tasks across the run: `< max_total`, otherwise rejected
//! - running siblings: `< max_concurrent`, otherwise the child waits for a
//!   slot (cancellably)
//!
//! A child runs under its own wall-clock timeout. On expiry it is cancelled
//! and given `CANCEL_GRACE` to return what it produced so far. A child that
//! ignores the cancel is dropped after the grace period, and the parent gets
//! the last progress it reported.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use warden_contracts::{
    config::SubAgentConfig,
    error::{WardenError, WardenResult},
    task::{AgentTask, TaskContext, TaskId, TaskResult, TaskStatus},
};

/// How long a timed-out child may take to return after it is cancelled.
pub const CANCEL_GRACE: Duration = Duration::from_secs(5);

// ── Runner seam ──────────────────────────────────────────────────────────────

/// What a parent asks a sub-agent to do.
#[derive(Debug, Clone, Default)]
pub struct SpawnRequest {
    pub prompt: String,
    /// Tool names the child may use, a subset of the parent's. Empty means
    /// the parent's full set.
    pub tools: Vec<String>,
}

/// How a child's loop ended, before the scheduler applies its own limits.
#[derive(Debug, Clone)]
pub struct TaskRun {
    pub status: TaskStatus,
    pub output: String,
    pub iterations: u32,
    pub reason: Option<String>,
}

/// Runs the loop of one sub-agent. Implemented by `AgentLoop`.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn run_task(
        &self,
        task: TaskContext,
        request: SpawnRequest,
        max_iterations: u32,
        cancel: CancellationToken,
        progress: TaskProgress,
    ) -> TaskRun;
}

/// Lets a running loop report its progress into the arena.
#[derive(Clone, Default)]
pub struct TaskProgress {
    target: Option<(Arc<Shared>, TaskId)>,
}

impl TaskProgress {
    /// A reporter that goes nowhere, for root loops.
    pub fn detached() -> Self {
        Self::default()
    }

    pub fn record_iteration(&self, count: u32) {
        if let Some((shared, id)) = &self.target {
            if let Some(task) = shared.lock().tasks.get_mut(id) {
                task.iteration_count = count;
            }
        }
    }

    /// The child's latest output, returned if it has to be abandoned.
    pub fn record_output(&self, output: &str) {
        if let Some((shared, id)) = &self.target {
            let mut arena = shared.lock();
            if arena.tasks.contains_key(id) {
                arena.outputs.insert(*id, output.to_string());
            }
        }
    }
}

// ── Arena ────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Arena {
    tasks: HashMap<TaskId, AgentTask>,
    /// Latest output reported by each live task.
    outputs: HashMap<TaskId, String>,
    /// Sibling slots, keyed by parent id.
    slots: HashMap<TaskId, Arc<Semaphore>>,
}

struct Shared {
    config: SubAgentConfig,
    arena: Mutex<Arena>,
}

impl Shared {
    // Records are inserted and removed whole, so a poisoned guard still
    // protects a consistent arena.
    fn lock(&self) -> MutexGuard<'_, Arena> {
        self.arena.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Removes a task's record when its driver finishes, panics, or is aborted.
struct ArenaEntry {
    shared: Arc<Shared>,
    id: TaskId,
    parent_id: TaskId,
}

impl Drop for ArenaEntry {
    fn drop(&mut self) {
        let mut arena = self.shared.lock();
        arena.tasks.remove(&self.id);
        arena.outputs.remove(&self.id);
        arena.slots.remove(&self.id);
        // Root parents never get a record of their own, so their slots go
        // once the last child is gone.
        let parent = Some(self.parent_id);
        if !arena.tasks.values().any(|t| t.parent_id == parent) {
            arena.slots.remove(&self.parent_id);
        }
        debug!(task_id = %self.id, live = arena.tasks.len(), "sub-agent released");
    }
}

// ── Scheduler ────────────────────────────────────────────────────────────────

/// Bounded pool for nested agent loops. Clones share one arena; construct
/// one per run.
#[derive(Clone)]
pub struct SubAgentScheduler {
    shared: Arc<Shared>,
}

impl SubAgentScheduler {
    pub fn new(config: SubAgentConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                arena: Mutex::new(Arena::default()),
            }),
        }
    }

    pub fn config(&self) -> &SubAgentConfig {
        &self.shared.config
    }

    /// Admit and start a child of `parent`.
    ///
    /// The child's cancellation token is a child of `parent_cancel`, so
    /// cancelling the parent cancels the whole subtree.
    ///
    /// # Errors
    ///
    /// - `DepthExceeded` if the child would be deeper than `max_depth`
    /// - `TaskLimitExceeded` if `max_total` sub-agents are already live
    pub fn spawn(
        &self,
        parent: &TaskContext,
        request: SpawnRequest,
        runner: Arc<dyn TaskRunner>,
        parent_cancel: &CancellationToken,
    ) -> WardenResult<SubAgentHandle> {
        let config = &self.shared.config;
        let depth = parent.depth + 1;
        if depth > config.max_depth {
            warn!(
                parent_id = %parent.id,
                depth,
                max_depth = config.max_depth,
                "sub-agent rejected: depth limit"
            );
            return Err(WardenError::DepthExceeded {
                depth,
                max_depth: config.max_depth,
            });
        }

        let task = AgentTask {
            id: TaskId::new(),
            parent_id: Some(parent.id),
            depth,
            iteration_count: 0,
            started_at: Utc::now(),
            status: TaskStatus::Running,
        };

        let slots = {
            let mut arena = self.shared.lock();
            if arena.tasks.len() >= config.max_total {
                warn!(
                    parent_id = %parent.id,
                    live = arena.tasks.len(),
                    max_total = config.max_total,
                    "sub-agent rejected: live task limit"
                );
                return Err(WardenError::TaskLimitExceeded {
                    max_total: config.max_total,
                });
            }
            arena.tasks.insert(task.id, task.clone());
            arena
                .slots
                .entry(parent.id)
                .or_insert_with(|| Arc::new(Semaphore::new(config.max_concurrent)))
                .clone()
        };

        info!(
            task_id = %task.id,
            parent_id = %parent.id,
            depth,
            "sub-agent admitted"
        );

        let entry = ArenaEntry {
            shared: self.shared.clone(),
            id: task.id,
            parent_id: parent.id,
        };
        let cancel = parent_cancel.child_token();
        let driver = drive(
            self.shared.clone(),
            task.context(),
            request,
            runner,
            slots,
            cancel.clone(),
        );
        let join = tokio::spawn(async move {
            let result = driver.await;
            drop(entry);
            result
        });

        Ok(SubAgentHandle { task, cancel, join })
    }

    /// Snapshot of every live sub-agent record.
    pub fn live_tasks(&self) -> Vec<AgentTask> {
        let mut tasks: Vec<AgentTask> = self.shared.lock().tasks.values().cloned().collect();
        tasks.sort_by_key(|t| t.started_at);
        tasks
    }

    pub fn live_count(&self) -> usize {
        self.shared.lock().tasks.len()
    }
}

async fn drive(
    shared: Arc<Shared>,
    task: TaskContext,
    request: SpawnRequest,
    runner: Arc<dyn TaskRunner>,
    slots: Arc<Semaphore>,
    cancel: CancellationToken,
) -> TaskResult {
    let config = shared.config.clone();

    let permit = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            info!(task_id = %task.id, "sub-agent cancelled while waiting for a slot");
            return finished(&task, TaskStatus::Cancelled, String::new(), 0, Some("cancelled before start".to_string()));
        }
        permit = slots.acquire_owned() => permit,
    };
    let Ok(_permit) = permit else {
        return finished(&task, TaskStatus::Failed, String::new(), 0, Some("sibling slots closed".to_string()));
    };

    debug!(task_id = %task.id, depth = task.depth, "sub-agent running");
    let progress = TaskProgress {
        target: Some((shared.clone(), task.id)),
    };
    let execution = runner.run_task(task, request, config.max_iterations, cancel.clone(), progress);
    tokio::pin!(execution);

    let completed = tokio::select! {
        run = &mut execution => Some(run),
        _ = tokio::time::sleep(config.timeout()) => None,
    };
    let (run, timed_out) = match completed {
        Some(run) => (run, false),
        None => {
            warn!(
                task_id = %task.id,
                timeout_secs = config.timeout,
                "sub-agent wall-clock timeout, collecting partial result"
            );
            cancel.cancel();
            match tokio::time::timeout(CANCEL_GRACE, &mut execution).await {
                Ok(run) => (run, true),
                Err(_) => {
                    warn!(
                        task_id = %task.id,
                        grace_secs = CANCEL_GRACE.as_secs(),
                        "sub-agent ignored cancellation, abandoning it"
                    );
                    (last_reported(&shared, task.id), true)
                }
            }
        }
    };

    if timed_out {
        finished(
            &task,
            TaskStatus::TimedOut,
            run.output,
            run.iterations,
            Some(format!("sub-agent exceeded its {}s wall-clock limit", config.timeout)),
        )
    } else {
        finished(&task, run.status, run.output, run.iterations, run.reason)
    }
}

/// What an abandoned child had reported before it stopped responding.
fn last_reported(shared: &Shared, id: TaskId) -> TaskRun {
    let arena = shared.lock();
    TaskRun {
        status: TaskStatus::TimedOut,
        output: arena.outputs.get(&id).cloned().unwrap_or_default(),
        iterations: arena.tasks.get(&id).map_or(0, |t| t.iteration_count),
        reason: None,
    }
}

fn finished(
    task: &TaskContext,
    status: TaskStatus,
    output: String,
    iterations: u32,
    reason: Option<String>,
) -> TaskResult {
    info!(
        task_id = %task.id,
        depth = task.depth,
        status = ?status,
        iterations,
        "sub-agent finished"
    );
    TaskResult {
        task_id: task.id,
        depth: task.depth,
        status,
        partial: status != TaskStatus::Succeeded,
        output,
        iterations,
        reason,
    }
}

/// A running sub-agent.
pub struct SubAgentHandle {
    task: AgentTask,
    cancel: CancellationToken,
    join: JoinHandle<TaskResult>,
}

impl SubAgentHandle {
    /// The task record as admitted.
    pub fn task(&self) -> &AgentTask {
        &self.task
    }

    pub fn id(&self) -> TaskId {
        self.task.id
    }

    /// Cancel this sub-agent and its descendants.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the result. A child that panicked reports `Failed`.
    pub async fn join(self) -> TaskResult {
        match self.join.await {
            Ok(result) => result,
            Err(e) => {
                warn!(task_id = %self.task.id, error = %e, "sub-agent driver did not complete");
                TaskResult {
                    task_id: self.task.id,
                    depth: self.task.depth,
                    status: TaskStatus::Failed,
                    output: String::new(),
                    partial: true,
                    iterations: 0,
                    reason: Some(format!("sub-agent aborted: {}", e)),
                }
            }
        }
    }
}

impl std::fmt::Debug for SubAgentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubAgentHandle").field("task", &self.task).finish()
    }
}
