//! Audit event and log types.
//!
//! `AuditEvent` wraps a `CallRecord` with its chain position and the hashes
//! that make tampering detectable. `AuditLog` is the sealed export.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use warden_contracts::execution::CallRecord;

/// One entry in the hash chain.
///
/// Changing any field, including those of the embedded record, invalidates
/// `this_hash` and every later `prev_hash`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Position in the chain, starting at 0.
    pub sequence: u64,

    /// The log this event belongs to. One log covers a root task and every
    /// sub-agent it spawns.
    pub log_id: String,

    pub record: CallRecord,

    /// `this_hash` of the previous event, or `GENESIS_HASH`.
    pub prev_hash: String,

    pub this_hash: String,
}

impl AuditEvent {
    /// The `prev_hash` of the first event in every chain.
    pub const GENESIS_HASH: &'static str =
        "0000000000000000000000000000000000000000000000000000000000000000";
}

/// A sealed snapshot of one log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLog {
    pub log_id: String,

    /// All events in chain order.
    pub events: Vec<AuditEvent>,

    /// Task ids whose portion of the log was finalized, in order.
    pub finalized_tasks: Vec<String>,

    pub exported_at: DateTime<Utc>,

    /// `this_hash` of the last event. Empty if the log is empty.
    pub terminal_hash: String,
}
