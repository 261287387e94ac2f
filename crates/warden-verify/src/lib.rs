//! # warden-verify
//!
//! Argument verification: the first gate every tool call passes, ahead of
//! policy classification and execution.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use warden_verify::SchemaVerifier;
//! use warden_core::traits::Verifier;
//!
//! let verifier = SchemaVerifier::new();
//! let report = verifier.verify("bash", &arguments, &descriptor.parameters)?;
//! assert!(report.passed);
//! ```

pub mod engine;

pub use engine::{ArgumentRuleFn, SchemaVerifier};

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use warden_core::traits::Verifier;

    use super::SchemaVerifier;

    fn bash_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": { "type": "string", "minLength": 1 },
                "timeout": { "type": "integer", "minimum": 1 }
            },
            "required": ["command"],
            "additionalProperties": false
        })
    }

    #[test]
    fn valid_arguments_pass() {
        let report = SchemaVerifier::new()
            .verify("bash", &json!({ "command": "ls -la", "timeout": 30 }), &bash_schema())
            .unwrap();
        assert!(report.passed);
        assert!(report.failures.is_empty());
    }

    #[test]
    fn missing_required_field_fails() {
        let report = SchemaVerifier::new()
            .verify("bash", &json!({ "timeout": 30 }), &bash_schema())
            .unwrap();
        assert!(!report.passed);
        assert!(report.summary().contains("command"), "{}", report.summary());
    }

    #[test]
    fn all_violations_are_collected() {
        let report = SchemaVerifier::new()
            .verify(
                "bash",
                &json!({ "command": 42, "timeout": 0, "shell": "zsh" }),
                &bash_schema(),
            )
            .unwrap();
        assert!(!report.passed);
        assert!(report.failures.len() >= 3, "{:?}", report.failures);
        assert!(report.failures.iter().any(|f| f.path == "/command"));
        assert!(report.failures.iter().any(|f| f.path == "/timeout"));
    }

    #[test]
    fn null_schema_accepts_anything() {
        let report = SchemaVerifier::new()
            .verify("anything", &json!([1, 2, 3]), &Value::Null)
            .unwrap();
        assert!(report.passed);
    }

    #[test]
    fn broken_schema_fails_closed() {
        let report = SchemaVerifier::new()
            .verify("bash", &json!({ "command": "ls" }), &json!({ "type": "no-such-type" }))
            .unwrap();
        assert!(!report.passed);
        assert!(report.summary().contains("invalid parameter schema"));
    }

    #[test]
    fn registered_rules_apply_only_to_their_tool() {
        let mut verifier = SchemaVerifier::new();
        verifier.register_rule(
            "write_file",
            "no-empty-path",
            Box::new(|args| {
                (args["path"].as_str() == Some("")).then(|| "path must not be empty".to_string())
            }),
        );

        let bad = verifier
            .verify("write_file", &json!({ "path": "", "content": "x" }), &Value::Null)
            .unwrap();
        assert!(!bad.passed);
        assert!(bad.summary().contains("no-empty-path"));

        let other_tool = verifier
            .verify("bash", &json!({ "path": "" }), &Value::Null)
            .unwrap();
        assert!(other_tool.passed);
    }
}
