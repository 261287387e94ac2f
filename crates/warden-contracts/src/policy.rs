//! Policy verdict types.
//!
//! The policy engine classifies every proposed operation into a `Verdict`.
//! Verdicts are produced fresh per call and never persisted beyond the audit
//! trail.

use serde::{Deserialize, Serialize};

/// The three-way classification of an operation.
///
/// Ordered by strictness: `Allow < Confirm < Block`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictKind {
    /// The operation may run without human involvement.
    Allow,
    /// The operation may run only after an explicit human approval.
    Confirm,
    /// The operation must never run.
    Block,
}

/// A classification plus the evidence that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub kind: VerdictKind,
    /// Human-readable explanation, surfaced to the approver and audit log.
    pub reason: String,
    /// Identifier of the rule that matched, absent for a plain `Allow`.
    pub matched_rule: Option<String>,
    /// The operation class the verdict was produced for ("bash", "write_file", ...).
    pub subject: String,
}

impl Verdict {
    /// An `Allow` verdict with no matched rule.
    pub fn allow(subject: impl Into<String>) -> Self {
        Self {
            kind: VerdictKind::Allow,
            reason: "no safety rule matched".to_string(),
            matched_rule: None,
            subject: subject.into(),
        }
    }

    pub fn confirm(
        subject: impl Into<String>,
        rule: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            kind: VerdictKind::Confirm,
            reason: reason.into(),
            matched_rule: Some(rule.into()),
            subject: subject.into(),
        }
    }

    pub fn block(
        subject: impl Into<String>,
        rule: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            kind: VerdictKind::Block,
            reason: reason.into(),
            matched_rule: Some(rule.into()),
            subject: subject.into(),
        }
    }

    pub fn is_allow(&self) -> bool {
        self.kind == VerdictKind::Allow
    }

    pub fn needs_approval(&self) -> bool {
        self.kind == VerdictKind::Confirm
    }

    pub fn is_blocked(&self) -> bool {
        self.kind == VerdictKind::Block
    }

    /// Return whichever of the two verdicts is stricter. Ties keep `self`.
    pub fn stricter(self, other: Verdict) -> Verdict {
        if other.kind > self.kind {
            other
        } else {
            self
        }
    }
}
