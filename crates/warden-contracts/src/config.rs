//! Configuration schema for the warden runtime.
//!
//! A `WardenConfig` is deserialized once from TOML, adjusted by environment
//! overrides, normalized, and then treated as an immutable snapshot. Every
//! field has a default so an empty document is a valid configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{WardenError, WardenResult};

/// Lower bound for the approval timeout, in seconds.
pub const MIN_APPROVAL_TIMEOUT_SECS: u64 = 10;
/// Upper bound for the approval timeout, in seconds.
pub const MAX_APPROVAL_TIMEOUT_SECS: u64 = 600;
/// Interactive stream callers never make more than this many attempts.
pub const MAX_INTERACTIVE_ATTEMPTS: u32 = 3;

/// Environment variable that overrides `safety.enabled`.
pub const ENV_SAFETY_ENABLED: &str = "WARDEN_SAFETY_ENABLED";
/// Environment variable that overrides `safety.approval_timeout`.
pub const ENV_APPROVAL_TIMEOUT: &str = "WARDEN_APPROVAL_TIMEOUT";

/// The full runtime configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WardenConfig {
    pub safety: SafetyConfig,
    pub stream: StreamConfig,
    pub subagents: SubAgentConfig,
    pub agent: AgentConfig,
}

impl WardenConfig {
    /// Parse `s` as TOML, then normalize.
    ///
    /// Does not apply environment overrides; see `load`.
    pub fn from_toml_str(s: &str) -> WardenResult<Self> {
        let config: WardenConfig = toml::from_str(s).map_err(|e| WardenError::ConfigError {
            reason: format!("failed to parse config TOML: {}", e),
        })?;
        config.normalized()
    }

    /// Read and parse the file at `path`.
    pub fn from_file(path: &Path) -> WardenResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| WardenError::ConfigError {
            reason: format!("failed to read config file '{}': {}", path.display(), e),
        })?;
        Self::from_toml_str(&contents)
    }

    /// Load from an optional file and apply process environment overrides.
    pub fn load(path: Option<&Path>) -> WardenResult<Self> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.with_env(|key| std::env::var(key).ok())
    }

    /// Apply environment overrides read through `lookup`, then normalize.
    pub fn with_env<F>(mut self, lookup: F) -> WardenResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_SAFETY_ENABLED) {
            self.safety.enabled = parse_bool(&raw).ok_or_else(|| WardenError::ConfigError {
                reason: format!("{} must be a boolean, got '{}'", ENV_SAFETY_ENABLED, raw),
            })?;
        }
        if let Some(raw) = lookup(ENV_APPROVAL_TIMEOUT) {
            self.safety.approval_timeout =
                raw.trim().parse().map_err(|_| WardenError::ConfigError {
                    reason: format!("{} must be a number of seconds, got '{}'", ENV_APPROVAL_TIMEOUT, raw),
                })?;
        }
        self.normalized()
    }

    /// Clamp bounded values and reject patterns that can never be matched safely.
    pub fn normalized(mut self) -> WardenResult<Self> {
        self.safety.approval_timeout = self
            .safety
            .approval_timeout
            .clamp(MIN_APPROVAL_TIMEOUT_SECS, MAX_APPROVAL_TIMEOUT_SECS);
        self.stream.max_attempts = self.stream.max_attempts.clamp(1, MAX_INTERACTIVE_ATTEMPTS);

        let patterns = self
            .safety
            .custom_patterns
            .iter()
            .chain(&self.safety.sensitive_paths)
            .chain(&self.safety.blocked_commands)
            .chain(&self.safety.blocked_paths);
        for pattern in patterns {
            if pattern.contains('\0') {
                return Err(WardenError::ConfigError {
                    reason: format!("safety pattern {:?} contains a null byte", pattern),
                });
            }
        }

        if self.subagents.max_concurrent == 0 {
            return Err(WardenError::ConfigError {
                reason: "subagents.max_concurrent must be at least 1".to_string(),
            });
        }
        Ok(self)
    }

    /// Serialize back to TOML for display.
    pub fn to_toml_string(&self) -> WardenResult<String> {
        toml::to_string_pretty(self).map_err(|e| WardenError::ConfigError {
            reason: format!("failed to render config: {}", e),
        })
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Safety policy section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    /// When false, `Confirm` classification is skipped. Hard blocks still apply.
    pub enabled: bool,
    /// Seconds an approval stays pending before failing closed.
    pub approval_timeout: u64,
    /// Extra confirm-trigger command patterns, appended to the built-ins.
    pub custom_patterns: Vec<String>,
    /// Extra confirm-trigger path patterns, appended to the built-ins.
    pub sensitive_paths: Vec<String>,
    /// Extra hard-block command patterns.
    pub blocked_commands: Vec<String>,
    /// Extra hard-block path prefixes.
    pub blocked_paths: Vec<String>,
    pub bash: ToolToggle,
    pub write_file: ToolToggle,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            approval_timeout: 120,
            custom_patterns: Vec::new(),
            sensitive_paths: Vec::new(),
            blocked_commands: Vec::new(),
            blocked_paths: Vec::new(),
            bash: ToolToggle::default(),
            write_file: ToolToggle::default(),
        }
    }
}

impl SafetyConfig {
    pub fn approval_timeout(&self) -> Duration {
        Duration::from_secs(self.approval_timeout)
    }

    /// Whether command confirm-checks run at all.
    pub fn command_checks_enabled(&self) -> bool {
        self.enabled && self.bash.enabled
    }

    /// Whether sensitive-path confirm-checks run at all.
    pub fn path_checks_enabled(&self) -> bool {
        self.enabled && self.write_file.enabled
    }
}

/// Per-tool switch for confirm checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolToggle {
    pub enabled: bool,
}

impl Default for ToolToggle {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Per-phase stream timeouts and the interactive retry budget, in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub connect_timeout: u64,
    pub first_token_timeout: u64,
    pub stream_timeout: u64,
    pub stall_timeout: u64,
    pub max_attempts: u32,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            connect_timeout: 5,
            first_token_timeout: 30,
            stream_timeout: 120,
            stall_timeout: 30,
            max_attempts: MAX_INTERACTIVE_ATTEMPTS,
        }
    }
}

/// Sub-agent scheduling limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubAgentConfig {
    /// Running siblings per parent; further spawns wait for a slot.
    pub max_concurrent: usize,
    /// Sub-agents live at once across the whole run tree.
    pub max_total: usize,
    pub max_depth: u32,
    /// Model iterations per sub-agent.
    pub max_iterations: u32,
    /// Wall-clock seconds per sub-agent.
    pub timeout: u64,
}

impl Default for SubAgentConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            max_total: 10,
            max_depth: 3,
            max_iterations: 15,
            timeout: 120,
        }
    }
}

impl SubAgentConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

/// Root agent loop settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub max_tool_iterations: u32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_tool_iterations: 50,
        }
    }
}
