//! In-memory implementation of `AuditWriter`.
//!
//! All events live in a `Vec` behind a `Mutex`. Root and sub-agent loops
//! share one writer, so their records interleave in a single chain in the
//! order they were written.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use tracing::{debug, info};

use warden_contracts::{
    error::{WardenError, WardenResult},
    execution::CallRecord,
    task::TaskId,
};
use warden_core::traits::AuditWriter;

use crate::{
    chain::{hash_event, verify_chain},
    event::{AuditEvent, AuditLog},
};

// ── Internal mutable state ────────────────────────────────────────────────────

pub(crate) struct InMemoryState {
    pub(crate) events: Vec<AuditEvent>,
    pub(crate) sequence: u64,
    /// `this_hash` of the last event, or `GENESIS_HASH` before the first.
    pub(crate) last_hash: String,
    pub(crate) finalized: Vec<String>,
}

// ── Public writer ─────────────────────────────────────────────────────────────

/// An append-only audit writer backed by a SHA-256 hash chain.
///
/// Cheap to clone; clones share the same chain.
#[derive(Clone)]
pub struct InMemoryAuditWriter {
    log_id: String,
    pub(crate) state: Arc<Mutex<InMemoryState>>,
}

impl InMemoryAuditWriter {
    pub fn new(log_id: impl Into<String>) -> Self {
        Self {
            log_id: log_id.into(),
            state: Arc::new(Mutex::new(InMemoryState {
                events: Vec::new(),
                sequence: 0,
                last_hash: AuditEvent::GENESIS_HASH.to_string(),
                finalized: Vec::new(),
            })),
        }
    }

    pub fn log_id(&self) -> &str {
        &self.log_id
    }

    fn lock(&self) -> WardenResult<MutexGuard<'_, InMemoryState>> {
        self.state.lock().map_err(|e| WardenError::AuditWriteFailed {
            reason: format!("audit state lock poisoned: {}", e),
        })
    }

    /// Export every event written so far.
    ///
    /// # Errors
    ///
    /// `AuditWriteFailed` if the state lock is poisoned.
    pub fn export_log(&self) -> WardenResult<AuditLog> {
        let state = self.lock()?;
        Ok(AuditLog {
            log_id: self.log_id.clone(),
            events: state.events.clone(),
            finalized_tasks: state.finalized.clone(),
            exported_at: Utc::now(),
            terminal_hash: state
                .events
                .last()
                .map(|e| e.this_hash.clone())
                .unwrap_or_default(),
        })
    }

    /// The records written for one task, in order.
    pub fn records_for(&self, task_id: TaskId) -> Vec<CallRecord> {
        self.lock()
            .map(|state| {
                state
                    .events
                    .iter()
                    .filter(|e| e.record.task_id == task_id)
                    .map(|e| e.record.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.lock().map(|state| state.events.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True if the in-memory chain has not been altered. A poisoned lock
    /// counts as a failed check.
    pub fn verify_integrity(&self) -> bool {
        self.lock()
            .map(|state| verify_chain(&state.events))
            .unwrap_or(false)
    }
}

// ── AuditWriter impl ──────────────────────────────────────────────────────────

impl AuditWriter for InMemoryAuditWriter {
    fn write(&self, record: &CallRecord) -> WardenResult<()> {
        let mut state = self.lock()?;

        let prev_hash = state.last_hash.clone();
        let sequence = state.sequence;
        let this_hash = hash_event(&self.log_id, sequence, record, &prev_hash)?;

        debug!(
            sequence,
            task_id = %record.task_id,
            call_id = %record.call_id,
            tool = %record.tool_name,
            stage = ?record.stage,
            "audit record appended"
        );

        state.events.push(AuditEvent {
            sequence,
            log_id: self.log_id.clone(),
            record: record.clone(),
            prev_hash,
            this_hash: this_hash.clone(),
        });
        state.sequence += 1;
        state.last_hash = this_hash;

        Ok(())
    }

    fn finalize(&self, task_id: &str) -> WardenResult<()> {
        let mut state = self.lock()?;
        state.finalized.push(task_id.to_string());

        info!(
            log_id = %self.log_id,
            task_id = %task_id,
            event_count = state.events.len(),
            terminal_hash = %state.last_hash,
            "audit log finalized for task"
        );

        Ok(())
    }
}
