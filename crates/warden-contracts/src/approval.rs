//! Approval identifiers, requests, and outcomes.
//!
//! Approval ids travel over the network and come back in a URL path, so they
//! follow one fixed format and are validated before any lookup: 32 lowercase
//! hexadecimal characters.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Length of the hex token that forms an approval id.
pub const APPROVAL_ID_LEN: usize = 32;

/// An opaque, validated approval token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApprovalId(String);

impl ApprovalId {
    /// Generate a fresh random id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Parse untrusted input, returning `None` for anything off-format.
    pub fn parse(raw: &str) -> Option<Self> {
        let well_formed = raw.len() == APPROVAL_ID_LEN
            && raw
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        well_formed.then(|| Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ApprovalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How an approval wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalOutcome {
    Approved,
    Denied,
    /// No decision before the deadline. Callers treat this exactly as `Denied`.
    TimedOut,
}

impl ApprovalOutcome {
    pub fn is_approved(self) -> bool {
        self == Self::Approved
    }
}

/// The event surfaced to an external observer when a call needs approval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub approval_id: ApprovalId,
    /// Human-readable description of the operation awaiting a decision.
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
}
