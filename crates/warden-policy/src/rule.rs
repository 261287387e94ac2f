//! Command classification rules.
//!
//! Built-in rules come in two strengths. Hard-block signatures describe
//! operations that destroy the host (root deletion, raw device writes,
//! filesystem creation on a block device, fork bombs) and can never be
//! relaxed by configuration. Confirm rules describe destructive but
//! legitimate operations; they are checked only when command checks are
//! enabled, and user patterns are appended after them.
//!
//! Every pattern runs against the normalized command: whitespace runs
//! collapsed to a single space, ends trimmed. Command words are anchored on
//! `(?:^|[\s;&|(])` so `myrmdir` and `docker run --rm` do not match `rm`.

use regex::Regex;

/// Built-in hard-block regexes: `(rule id, pattern, reason)`.
const BLOCK_PATTERNS: &[(&str, &str, &str)] = &[
    (
        "raw-device-write",
        r"(?:^|[\s;&|(])dd\s.*\bof=/dev/(?:sd|hd|nvme|vd|xvd|mmcblk|disk|md|dm-|mapper/|loop)",
        "raw write to a block device via dd",
    ),
    (
        "raw-device-write",
        r"/dev/(?:zero|u?random)\b.*>{1,2}\s*/dev/(?:sd|hd|nvme|vd|xvd|mmcblk|disk|md|dm-|loop)",
        "zeroing a block device by redirection",
    ),
    (
        "device-wipe",
        r"(?:^|[\s;&|(])(?:shred|wipefs)\s.*/dev/(?:sd|hd|nvme|vd|xvd|mmcblk|disk|md|dm-|loop)",
        "wiping a block device",
    ),
    (
        "mkfs-device",
        r"(?:^|[\s;&|(])(?:mkfs(?:\.\w+)?|mke2fs|mkswap)\s.*/dev/",
        "filesystem creation on a block device",
    ),
];

/// Built-in confirm regexes: `(rule id, pattern, reason)`.
const CONFIRM_PATTERNS: &[(&str, &str, &str)] = &[
    ("rm", r"(?:^|[\s;&|(])rm(?:\s|$)", "destructive delete via rm"),
    ("rmdir", r"(?:^|[\s;&|(])rmdir(?:\s|$)", "directory removal via rmdir"),
    (
        "git-push-force",
        r"(?:^|[\s;&|(])git\s+push\b.*\s(?:--force(?:-with-lease)?|-f)(?:\s|$|=)",
        "forced history rewrite via git push --force",
    ),
    (
        "git-reset-hard",
        r"(?:^|[\s;&|(])git\s+reset\b.*\s--hard(?:\s|$)",
        "git reset --hard discards uncommitted work",
    ),
    (
        "git-clean",
        r"(?:^|[\s;&|(])git\s+clean\b.*\s(?:-[a-zA-Z]*f|--force)",
        "git clean deletes untracked files",
    ),
    (
        "git-checkout-dot",
        r"(?:^|[\s;&|(])git\s+(?:checkout|restore)\s+(?:--\s+)?\.(?:\s|$)",
        "working-tree wipe via git checkout .",
    ),
    (
        "sql-drop",
        r"(?i)\bdrop\s+(?:table|database|schema)\b",
        "database drop",
    ),
    (
        "sql-truncate",
        r"(?i)(?:^|[\s;&|('\x22])truncate(?:\s|$)",
        "table truncation",
    ),
    (
        "device-redirect",
        r">{1,2}\s*/dev/(?:sd|hd|nvme|vd|xvd|mmcblk|disk|mem|kmem|port)",
        "redirection into a device file",
    ),
    (
        "chmod-permissive",
        r"(?:^|[\s;&|(])chmod\s+(?:-[a-zA-Z]+\s+)*(?:0?777|[ugoa]*\+rwx|o\+w)(?:\s|$)",
        "overly permissive permission change",
    ),
    (
        "kill-force",
        r"(?:^|[\s;&|(])(?:kill|pkill|killall)\s+(?:\S+\s+)*-(?:9|KILL|SIGKILL)(?:\s|$)",
        "forceful process kill",
    ),
];

/// Words that may precede the real command in a segment.
const COMMAND_PREFIXES: &[&str] = &["sudo", "doas", "command", "exec", "nohup", "nice", "time", "env"];

#[derive(Debug)]
enum Matcher {
    Regex(Regex),
    /// Fallback for user patterns that are not valid regexes.
    Literal(String),
}

/// One compiled command rule.
#[derive(Debug)]
pub(crate) struct CommandRule {
    pub(crate) id: String,
    pub(crate) reason: String,
    matcher: Matcher,
}

impl CommandRule {
    /// Compile a user pattern. An invalid regex becomes a literal substring match.
    pub(crate) fn custom(id_prefix: &str, pattern: &str, reason: &str) -> Self {
        let matcher = match Regex::new(pattern) {
            Ok(regex) => Matcher::Regex(regex),
            Err(_) => Matcher::Literal(pattern.to_string()),
        };
        Self {
            id: format!("{}:{}", id_prefix, pattern),
            reason: format!("{} (pattern '{}')", reason, pattern),
            matcher,
        }
    }

    pub(crate) fn is_match(&self, command: &str) -> bool {
        match &self.matcher {
            Matcher::Regex(regex) => regex.is_match(command),
            Matcher::Literal(literal) => command.contains(literal.as_str()),
        }
    }
}

fn compile_builtin(table: &[(&str, &str, &str)]) -> Vec<CommandRule> {
    table
        .iter()
        .map(|(id, pattern, reason)| CommandRule {
            id: (*id).to_string(),
            reason: (*reason).to_string(),
            // Built-in tables are constants covered by tests.
            matcher: Matcher::Regex(Regex::new(pattern).expect("built-in command pattern compiles")),
        })
        .collect()
}

/// Compiled built-in hard-block regexes.
///
/// # Panics
///
/// Panics if a built-in pattern fails to compile, which the unit tests rule out.
pub(crate) fn builtin_block_rules() -> Vec<CommandRule> {
    compile_builtin(BLOCK_PATTERNS)
}

/// Compiled built-in confirm regexes. Same panic contract as `builtin_block_rules`.
pub(crate) fn builtin_confirm_rules() -> Vec<CommandRule> {
    compile_builtin(CONFIRM_PATTERNS)
}

/// Collapse whitespace runs (tabs, newlines) into single spaces and trim.
pub(crate) fn normalize_command(command: &str) -> String {
    command.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Hard-block signatures that need more than a regex: recursive deletion of
/// the filesystem root, and fork bombs. Returns `(rule id, reason)`.
pub(crate) fn structural_block(command: &str) -> Option<(&'static str, &'static str)> {
    if segments(command).any(|segment| deletes_root(&segment)) {
        return Some(("rm-root", "recursive force delete of the filesystem root via rm"));
    }
    if is_fork_bomb(command) {
        return Some(("fork-bomb", "fork bomb: a function that pipes into itself in the background"));
    }
    None
}

fn segments(command: &str) -> impl Iterator<Item = Vec<String>> + '_ {
    command
        .split(|c| matches!(c, ';' | '&' | '|' | '(' | ')' | '`' | '\n'))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|segment| {
            shell_words::split(segment)
                .unwrap_or_else(|_| segment.split_whitespace().map(str::to_string).collect())
        })
}

fn deletes_root(tokens: &[String]) -> bool {
    let mut words = tokens
        .iter()
        .skip_while(|t| COMMAND_PREFIXES.contains(&t.as_str()) || t.contains('='))
        .skip_while(|t| t.starts_with('-'));
    let Some(program) = words.next() else {
        return false;
    };
    if program.rsplit('/').next() != Some("rm") {
        return false;
    }

    let mut recursive = false;
    let mut no_preserve_root = false;
    let mut operands = Vec::new();
    let mut options_done = false;
    for word in words {
        if options_done || !word.starts_with('-') || word == "-" {
            operands.push(word.as_str());
        } else if word == "--" {
            options_done = true;
        } else if let Some(long) = word.strip_prefix("--") {
            recursive |= long == "recursive";
            no_preserve_root |= long == "no-preserve-root";
        } else {
            recursive |= word.contains(['r', 'R']);
        }
    }

    recursive && (no_preserve_root || operands.iter().any(|op| is_root_like(op)))
}

fn is_root_like(operand: &str) -> bool {
    let trimmed = operand.trim_end_matches('*');
    trimmed.starts_with('/') && trimmed.chars().all(|c| c == '/' || c == '.')
}

fn is_fork_bomb(command: &str) -> bool {
    let compact: String = command.chars().filter(|c| !c.is_whitespace()).collect();
    let mut rest = compact.as_str();
    while let Some(open) = rest.find("(){") {
        let name_start = rest[..open]
            .rfind(|c: char| !(c.is_alphanumeric() || matches!(c, '_' | ':' | '.')))
            .map(|i| i + 1)
            .unwrap_or(0);
        let name = &rest[name_start..open];
        let body_start = open + 3;
        let body_end = rest[body_start..]
            .find('}')
            .map(|i| body_start + i)
            .unwrap_or(rest.len());
        let body = &rest[body_start..body_end];
        if !name.is_empty() && body.contains(&format!("{}|{}&", name, name)) {
            return true;
        }
        rest = &rest[body_start..];
    }
    false
}
