//! # warden-core
//!
//! The execution side of the warden trust boundary.
//!
//! This crate provides:
//! - The trait seams (`PolicyEngine`, `AuditWriter`, `Verifier`, `Tool`)
//! - `ToolRegistry`, the tools a loop may call
//! - `AgentLoop`, which runs every tool call through verification,
//!   classification, approval, and audit in that order
//! - `SubAgentScheduler`, the bounded pool behind `run_agent`
//!
//! ## Usage
//!
//! ```rust,ignore
//! use warden_core::{AgentLoop, SubAgentScheduler, TrustBoundary, ToolRegistry};
//!
//! let agent = AgentLoop::new(trust, registry, upstream, supervisor)
//!     .with_scheduler(SubAgentScheduler::new(config.subagents.clone()));
//! let report = agent.run_turn(TaskContext::root(), messages, &cancel).await;
//! ```

pub mod agent_loop;
pub mod dedup;
pub mod registry;
pub mod scheduler;
pub mod traits;

pub use agent_loop::{run_agent_descriptor, AgentLoop, TrustBoundary, TurnReport, RUN_AGENT_TOOL};
pub use registry::ToolRegistry;
pub use scheduler::{CANCEL_GRACE, SpawnRequest, SubAgentHandle, SubAgentScheduler, TaskProgress, TaskRun, TaskRunner};
