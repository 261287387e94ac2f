//! Schema-based argument verifier.
//!
//! `SchemaVerifier` implements the `Verifier` trait from `warden-core`.
//! Verification runs in two phases:
//!
//! 1. **Structural**: the arguments are validated against the tool's
//!    parameter schema using the `jsonschema` crate.
//! 2. **Per-tool rules**: functions registered for the tool by name run in
//!    registration order.
//!
//! All failures are collected before returning, so the model sees every
//! problem with its call in one pass.

use std::collections::HashMap;

use serde_json::Value;
use tracing::{debug, warn};

use warden_contracts::{
    error::WardenResult,
    verify::{ArgumentFailure, ArgumentReport},
};
use warden_core::traits::Verifier;

/// A caller-supplied argument check.
///
/// Returns `Some(message)` when the arguments are unacceptable.
pub type ArgumentRuleFn = Box<dyn Fn(&Value) -> Option<String> + Send + Sync>;

/// The warden argument verifier.
pub struct SchemaVerifier {
    rules: HashMap<String, Vec<(String, ArgumentRuleFn)>>,
}

impl SchemaVerifier {
    pub fn new() -> Self {
        Self {
            rules: HashMap::new(),
        }
    }

    /// Register an extra check for calls to `tool`, reported under `rule_id`.
    pub fn register_rule(
        &mut self,
        tool: impl Into<String>,
        rule_id: impl Into<String>,
        rule: ArgumentRuleFn,
    ) {
        self.rules
            .entry(tool.into())
            .or_default()
            .push((rule_id.into(), rule));
    }

    fn structural_failures(tool: &str, arguments: &Value, schema: &Value) -> Vec<ArgumentFailure> {
        // A null schema places no constraint on the arguments.
        if schema.is_null() {
            return Vec::new();
        }

        match jsonschema::validator_for(schema) {
            Ok(validator) => validator
                .iter_errors(arguments)
                .map(|error| {
                    let failure = ArgumentFailure {
                        path: error.instance_path.to_string(),
                        message: error.to_string(),
                    };
                    debug!(tool, path = %failure.path, message = %failure.message, "argument schema violation");
                    failure
                })
                .collect(),
            Err(e) => {
                // The tool shipped a broken schema. The call still fails
                // closed instead of running unchecked.
                warn!(tool, error = %e, "tool parameter schema does not compile");
                vec![ArgumentFailure {
                    path: String::new(),
                    message: format!("invalid parameter schema: {e}"),
                }]
            }
        }
    }
}

impl Default for SchemaVerifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Verifier for SchemaVerifier {
    fn verify(&self, tool: &str, arguments: &Value, schema: &Value) -> WardenResult<ArgumentReport> {
        let mut failures = Self::structural_failures(tool, arguments, schema);

        for (rule_id, rule) in self.rules.get(tool).into_iter().flatten() {
            if let Some(message) = rule(arguments) {
                debug!(tool, rule_id = %rule_id, %message, "argument rule failed");
                failures.push(ArgumentFailure {
                    path: String::new(),
                    message: format!("{rule_id}: {message}"),
                });
            }
        }

        let report = ArgumentReport::from_failures(failures);
        if !report.passed {
            warn!(tool, failures = report.failures.len(), "tool arguments rejected");
        }
        Ok(report)
    }
}
