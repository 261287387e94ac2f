//! Argument verification report types.
//!
//! Before a tool call is classified or executed, its arguments are checked
//! against the tool's parameter schema. Only a passing report lets the call
//! continue.

use serde::{Deserialize, Serialize};

/// The result of checking one call's arguments.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArgumentReport {
    /// True only if no failure was recorded.
    pub passed: bool,
    pub failures: Vec<ArgumentFailure>,
}

impl ArgumentReport {
    pub fn pass() -> Self {
        Self {
            passed: true,
            failures: Vec::new(),
        }
    }

    pub fn from_failures(failures: Vec<ArgumentFailure>) -> Self {
        Self {
            passed: failures.is_empty(),
            failures,
        }
    }

    /// All failures joined into a single line for error messages.
    pub fn summary(&self) -> String {
        self.failures
            .iter()
            .map(|f| format!("{}: {}", f.path, f.message))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// A single schema violation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArgumentFailure {
    /// JSON pointer into the arguments, empty for the root.
    pub path: String,
    pub message: String,
}
