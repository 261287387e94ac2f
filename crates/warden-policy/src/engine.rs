//! The safety policy engine.
//!
//! `SafetyPolicyEngine` compiles a `SafetyConfig` once into ordered,
//! immutable rule lists and implements the `PolicyEngine` trait from
//! warden-core.
//!
//! Command evaluation:
//!
//! 1. A null byte anywhere → `Block` (malformed input).
//! 2. Hard-block signatures, built-in then configured → `Block`. Never
//!    disabled by configuration.
//! 3. Confirm rules, built-in then custom, when command checks are enabled
//!    → `Confirm`.
//! 4. Otherwise → `Allow`.
//!
//! Path evaluation resolves the target to its real location first, then:
//! blocked system location → `Block`; escape from the intended root →
//! `Block`; sensitive pattern → `Confirm`; otherwise `Allow`.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use warden_contracts::{config::SafetyConfig, policy::Verdict};
use warden_core::traits::PolicyEngine;

use crate::path::{
    expand_home, lexical_normalize, resolve_real_path, ResolveError, SensitivePattern,
    BLOCKED_PREFIXES, SENSITIVE_DEFAULTS,
};
use crate::rule::{
    builtin_block_rules, builtin_confirm_rules, normalize_command, structural_block, CommandRule,
};

/// Subject name attached to command verdicts.
pub const COMMAND_SUBJECT: &str = "bash";
/// Subject name attached to write-path verdicts.
pub const WRITE_SUBJECT: &str = "write_file";

/// A pure classifier for shell commands and write paths.
///
/// ```rust,ignore
/// use warden_policy::SafetyPolicyEngine;
///
/// let engine = SafetyPolicyEngine::from_config(&config.safety);
/// let verdict = engine.evaluate_command("git push --force");
/// assert!(verdict.needs_approval());
/// ```
#[derive(Debug)]
pub struct SafetyPolicyEngine {
    command_checks: bool,
    path_checks: bool,
    block_rules: Vec<CommandRule>,
    confirm_rules: Vec<CommandRule>,
    blocked_paths: Vec<PathBuf>,
    sensitive: Vec<SensitivePattern>,
    working_dir: PathBuf,
    home: Option<PathBuf>,
    /// Set when the configuration carried a pattern that can never be
    /// matched safely. Every evaluation then blocks.
    invalid_pattern: Option<String>,
}

impl SafetyPolicyEngine {
    /// Compile `config` against the process working and home directories.
    pub fn from_config(config: &SafetyConfig) -> Self {
        let working_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        Self::with_dirs(config, working_dir, dirs::home_dir())
    }

    /// Compile `config`, resolving relative paths against `working_dir` and
    /// `~` against `home`.
    pub fn with_dirs(config: &SafetyConfig, working_dir: PathBuf, home: Option<PathBuf>) -> Self {
        let invalid_pattern = config
            .custom_patterns
            .iter()
            .chain(&config.sensitive_paths)
            .chain(&config.blocked_commands)
            .chain(&config.blocked_paths)
            .find(|p| p.contains('\0'))
            .cloned();
        if let Some(pattern) = &invalid_pattern {
            warn!(pattern = ?pattern, "safety pattern contains a null byte; blocking every operation");
        }

        let mut block_rules = builtin_block_rules();
        block_rules.extend(
            config
                .blocked_commands
                .iter()
                .map(|p| CommandRule::custom("blocked", p, "configured blocked command")),
        );

        let mut confirm_rules = builtin_confirm_rules();
        confirm_rules.extend(
            config
                .custom_patterns
                .iter()
                .map(|p| CommandRule::custom("custom", p, "configured confirm pattern")),
        );

        let mut blocked_paths: Vec<PathBuf> = BLOCKED_PREFIXES.iter().map(PathBuf::from).collect();
        blocked_paths.extend(
            config
                .blocked_paths
                .iter()
                .map(|p| lexical_normalize(&expand_home(p, home.as_deref()))),
        );

        let sensitive = SENSITIVE_DEFAULTS
            .iter()
            .copied()
            .chain(config.sensitive_paths.iter().map(String::as_str))
            .map(SensitivePattern::parse)
            .collect();

        Self {
            command_checks: config.command_checks_enabled(),
            path_checks: config.path_checks_enabled(),
            block_rules,
            confirm_rules,
            blocked_paths,
            sensitive,
            working_dir: lexical_normalize(&working_dir),
            home,
            invalid_pattern,
        }
    }

    /// Classify a write to `path`, which must stay inside `root`.
    ///
    /// Relative paths are resolved against `root`. A target whose real
    /// location falls outside the real `root` is blocked.
    pub fn evaluate_write_path_within(&self, path: &str, root: &Path) -> Verdict {
        self.classify_path(path, Some(root))
    }

    fn classify_path(&self, raw: &str, root: Option<&Path>) -> Verdict {
        if raw.contains('\0') {
            warn!("write path contains a null byte");
            return Verdict::block(WRITE_SUBJECT, "malformed-input", "path contains a null byte");
        }
        if let Some(pattern) = &self.invalid_pattern {
            return Verdict::block(
                WRITE_SUBJECT,
                "invalid-pattern",
                format!("safety pattern {:?} contains a null byte", pattern),
            );
        }
        if raw.trim().is_empty() {
            return Verdict::allow(WRITE_SUBJECT);
        }

        let base = root
            .map(|r| lexical_normalize(&self.absolute(r, &self.working_dir)))
            .unwrap_or_else(|| self.working_dir.clone());
        let absolute = self.absolute(&expand_home(raw, self.home.as_deref()), &base);
        let lexical = lexical_normalize(&absolute);
        let real = match resolve_real_path(&absolute) {
            Ok(real) => real,
            Err(ResolveError::SymlinkLoop) => {
                return Verdict::block(WRITE_SUBJECT, "unresolvable-path", "symbolic link loop");
            }
            Err(ResolveError::Unreadable(detail)) => {
                return Verdict::block(
                    WRITE_SUBJECT,
                    "unresolvable-path",
                    format!("cannot resolve symbolic link {}", detail),
                );
            }
        };

        debug!(path = raw, resolved = %real.display(), "evaluating write path");

        for candidate in [&real, &lexical] {
            if let Some(prefix) = self.blocked_paths.iter().find(|p| candidate.starts_with(p)) {
                warn!(path = raw, resolved = %real.display(), "write to blocked location");
                return Verdict::block(
                    WRITE_SUBJECT,
                    "blocked-path",
                    format!(
                        "'{}' resolves to {} under blocked location {}",
                        raw,
                        real.display(),
                        prefix.display()
                    ),
                );
            }
        }

        if let Some(root) = root {
            let real_root = resolve_real_path(&base).unwrap_or_else(|_| base.clone());
            if !lexical.starts_with(&base) || !real.starts_with(&real_root) {
                warn!(path = raw, root = %root.display(), "write path escapes its root");
                return Verdict::block(
                    WRITE_SUBJECT,
                    "path-escape",
                    format!("'{}' resolves outside {}", raw, root.display()),
                );
            }
        }

        if self.path_checks {
            if let Some(pattern) = self
                .sensitive
                .iter()
                .find(|p| p.matches(&real) || p.matches(&lexical))
            {
                return Verdict::confirm(
                    WRITE_SUBJECT,
                    format!("sensitive-path:{}", pattern.raw),
                    format!(
                        "write to sensitive path {} (matches '{}')",
                        real.display(),
                        pattern.raw
                    ),
                );
            }
        }

        Verdict::allow(WRITE_SUBJECT)
    }

    fn absolute(&self, path: &Path, base: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            base.join(path)
        }
    }
}

impl PolicyEngine for SafetyPolicyEngine {
    fn evaluate_command(&self, command: &str) -> Verdict {
        if command.contains('\0') {
            warn!("command contains a null byte");
            return Verdict::block(COMMAND_SUBJECT, "malformed-input", "command contains a null byte");
        }
        if let Some(pattern) = &self.invalid_pattern {
            return Verdict::block(
                COMMAND_SUBJECT,
                "invalid-pattern",
                format!("safety pattern {:?} contains a null byte", pattern),
            );
        }

        let normalized = normalize_command(command);
        if normalized.is_empty() {
            return Verdict::allow(COMMAND_SUBJECT);
        }

        if let Some((rule, reason)) = structural_block(&normalized) {
            warn!(rule, command = %normalized, "command hard-blocked");
            return Verdict::block(COMMAND_SUBJECT, rule, format!("{}: {}", reason, normalized));
        }
        if let Some(rule) = self.block_rules.iter().find(|r| r.is_match(&normalized)) {
            warn!(rule = %rule.id, command = %normalized, "command hard-blocked");
            return Verdict::block(
                COMMAND_SUBJECT,
                rule.id.clone(),
                format!("{}: {}", rule.reason, normalized),
            );
        }

        if self.command_checks {
            if let Some(rule) = self.confirm_rules.iter().find(|r| r.is_match(&normalized)) {
                debug!(rule = %rule.id, command = %normalized, "command needs confirmation");
                return Verdict::confirm(
                    COMMAND_SUBJECT,
                    rule.id.clone(),
                    format!("{}: {}", rule.reason, normalized),
                );
            }
        }

        Verdict::allow(COMMAND_SUBJECT)
    }

    fn evaluate_write_path(&self, path: &str) -> Verdict {
        self.classify_path(path, None)
    }
}
