//! Hash-chain primitives: hashing and chain integrity verification.
//!
//! Hash input layout (bytes, in order):
//!   1. log_id as UTF-8 bytes
//!   2. sequence as 8-byte little-endian
//!   3. prev_hash as UTF-8 bytes (64 ASCII hex chars)
//!   4. compact JSON of the record

use sha2::{Digest, Sha256};

use warden_contracts::{
    error::{WardenError, WardenResult},
    execution::CallRecord,
};

use crate::event::AuditEvent;

/// Compute the SHA-256 hash for one audit event as lowercase hex.
///
/// # Errors
///
/// `AuditWriteFailed` if the record cannot be serialized. Tool arguments
/// are arbitrary JSON, so this is reported rather than assumed away.
pub fn hash_event(
    log_id: &str,
    sequence: u64,
    record: &CallRecord,
    prev_hash: &str,
) -> WardenResult<String> {
    let record_json = serde_json::to_vec(record).map_err(|e| WardenError::AuditWriteFailed {
        reason: format!("record is not serializable: {}", e),
    })?;

    let mut hasher = Sha256::new();
    hasher.update(log_id.as_bytes());
    hasher.update(sequence.to_le_bytes());
    hasher.update(prev_hash.as_bytes());
    hasher.update(&record_json);

    Ok(hex::encode(hasher.finalize()))
}

/// Verify the integrity of a hash chain.
///
/// Valid when every event links to its predecessor (`GENESIS_HASH` for the
/// first), sequences count up from 0, and every `this_hash` matches the
/// value recomputed from the event's own fields. An empty chain is valid.
pub fn verify_chain(events: &[AuditEvent]) -> bool {
    let mut expected_prev = AuditEvent::GENESIS_HASH.to_string();

    for (position, event) in events.iter().enumerate() {
        if event.sequence != position as u64 || event.prev_hash != expected_prev {
            return false;
        }

        match hash_event(&event.log_id, event.sequence, &event.record, &event.prev_hash) {
            Ok(recomputed) if recomputed == event.this_hash => {}
            _ => return false,
        }

        expected_prev = event.this_hash.clone();
    }

    true
}
