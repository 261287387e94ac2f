//! Write-path resolution and matching.
//!
//! A write target is judged by where it really lands, not by how it is
//! spelled. `resolve_real_path` follows every symbolic link along the path,
//! including links whose targets do not exist yet, so a link named
//! `notes.txt` that points at `/etc/shadow` resolves to `/etc/shadow`.

use std::ffi::OsString;
use std::fs;
use std::path::{Component, Path, PathBuf};

/// Links followed before a path is declared unresolvable.
const MAX_SYMLINK_HOPS: usize = 40;

/// System locations no tool may write to, on any configuration.
pub(crate) const BLOCKED_PREFIXES: &[&str] = &[
    "/etc/shadow",
    "/etc/gshadow",
    "/etc/passwd",
    "/etc/master.passwd",
    "/etc/sudoers",
    "/etc/sudoers.d",
    "/private/etc/shadow",
    "/private/etc/master.passwd",
    "/private/etc/sudoers",
    "/private/etc/sudoers.d",
    "/proc",
    "/sys",
    "/dev",
];

/// Secret-bearing files and directories that need approval before a write.
pub(crate) const SENSITIVE_DEFAULTS: &[&str] = &[
    ".env",
    ".ssh",
    ".aws",
    ".gnupg",
    ".config/gcloud",
    ".netrc",
    ".git-credentials",
    ".kube/config",
    ".docker/config.json",
    ".npmrc",
    ".pypirc",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ResolveError {
    SymlinkLoop,
    Unreadable(String),
}

enum Part {
    Parent,
    Normal(OsString),
}

fn parts_of(path: &Path) -> Vec<Part> {
    path.components()
        .filter_map(|c| match c {
            Component::ParentDir => Some(Part::Parent),
            Component::Normal(name) => Some(Part::Normal(name.to_os_string())),
            Component::RootDir | Component::CurDir | Component::Prefix(_) => None,
        })
        .collect()
}

/// Resolve `.` and `..` without touching the filesystem.
pub(crate) fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::from("/");
    for part in parts_of(path) {
        match part {
            Part::Parent => {
                out.pop();
            }
            Part::Normal(name) => out.push(name),
        }
    }
    out
}

/// Follow every symlink in the absolute `path`. Missing components are kept
/// as spelled, since a write may create them.
pub(crate) fn resolve_real_path(path: &Path) -> Result<PathBuf, ResolveError> {
    let mut resolved = PathBuf::from("/");
    let mut stack: Vec<Part> = parts_of(path);
    stack.reverse();
    let mut hops = 0;

    while let Some(part) = stack.pop() {
        let name = match part {
            Part::Parent => {
                resolved.pop();
                continue;
            }
            Part::Normal(name) => name,
        };

        let candidate = resolved.join(&name);
        let is_link = fs::symlink_metadata(&candidate)
            .map(|meta| meta.file_type().is_symlink())
            .unwrap_or(false);
        if !is_link {
            resolved = candidate;
            continue;
        }

        hops += 1;
        if hops > MAX_SYMLINK_HOPS {
            return Err(ResolveError::SymlinkLoop);
        }
        let target = fs::read_link(&candidate)
            .map_err(|e| ResolveError::Unreadable(format!("{}: {}", candidate.display(), e)))?;
        if target.is_absolute() {
            resolved = PathBuf::from("/");
        }
        let mut target_parts = parts_of(&target);
        target_parts.reverse();
        stack.extend(target_parts);
    }

    Ok(resolved)
}

/// Replace a leading `~` with `home`. Other paths are returned unchanged.
pub(crate) fn expand_home(raw: &str, home: Option<&Path>) -> PathBuf {
    match (raw.strip_prefix('~'), home) {
        (Some(""), Some(home)) => home.to_path_buf(),
        (Some(rest), Some(home)) if rest.starts_with('/') => home.join(rest.trim_start_matches('/')),
        _ => PathBuf::from(raw),
    }
}

#[derive(Debug)]
enum ComponentMatcher {
    Literal(String),
    Glob(glob::Pattern),
}

impl ComponentMatcher {
    fn parse(raw: &str) -> Self {
        if raw.contains(['*', '?', '[']) {
            if let Ok(pattern) = glob::Pattern::new(raw) {
                return Self::Glob(pattern);
            }
        }
        Self::Literal(raw.to_string())
    }

    fn matches(&self, component: &str) -> bool {
        match self {
            Self::Literal(literal) => literal == component,
            Self::Glob(pattern) => pattern.matches(component),
        }
    }
}

/// A sensitive-path pattern, matched against resolved path components.
///
/// Absolute patterns match as a prefix. Relative and `~/` patterns match as
/// a consecutive component sequence anywhere in the path, which covers the
/// copy under the home directory as well as any project-local copy.
#[derive(Debug)]
pub(crate) struct SensitivePattern {
    pub(crate) raw: String,
    anchored: bool,
    components: Vec<ComponentMatcher>,
}

impl SensitivePattern {
    pub(crate) fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        let anchored = trimmed.starts_with('/');
        let body = trimmed
            .strip_prefix("~/")
            .or_else(|| (trimmed == "~").then_some(""))
            .unwrap_or(trimmed);
        let components = body
            .split('/')
            .filter(|c| !c.is_empty() && *c != ".")
            .map(ComponentMatcher::parse)
            .collect();
        Self {
            raw: raw.to_string(),
            anchored,
            components,
        }
    }

    pub(crate) fn matches(&self, path: &Path) -> bool {
        if self.components.is_empty() {
            return false;
        }
        let names: Vec<String> = path
            .components()
            .filter_map(|c| match c {
                Component::Normal(name) => Some(name.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();
        if names.len() < self.components.len() {
            return false;
        }

        let window_matches = |start: usize| {
            self.components
                .iter()
                .zip(&names[start..])
                .all(|(matcher, name)| matcher.matches(name))
        };
        if self.anchored {
            window_matches(0)
        } else {
            (0..=names.len() - self.components.len()).any(window_matches)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lexical_normalize_resolves_dot_segments() {
        assert_eq!(
            lexical_normalize(Path::new("/home/u/project/deep/dir/../../.ssh/id_rsa")),
            PathBuf::from("/home/u/project/.ssh/id_rsa")
        );
        assert_eq!(lexical_normalize(Path::new("/../../etc")), PathBuf::from("/etc"));
    }

    #[test]
    fn missing_tail_is_kept_as_spelled() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("not/yet/created.txt");
        let resolved = resolve_real_path(&target).unwrap();
        let real_dir = fs::canonicalize(dir.path()).unwrap();
        assert_eq!(resolved, real_dir.join("not/yet/created.txt"));
    }

    #[cfg(unix)]
    #[test]
    fn dangling_link_resolves_to_its_target() {
        let dir = tempfile::tempdir().unwrap();
        let link = dir.path().join("innocent.txt");
        std::os::unix::fs::symlink("/etc/does-not-exist-anywhere", &link).unwrap();
        assert_eq!(
            resolve_real_path(&link).unwrap(),
            PathBuf::from("/etc/does-not-exist-anywhere")
        );
    }

    #[cfg(unix)]
    #[test]
    fn symlink_loop_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        std::os::unix::fs::symlink(&b, &a).unwrap();
        std::os::unix::fs::symlink(&a, &b).unwrap();
        assert_eq!(resolve_real_path(&a.join("file")), Err(ResolveError::SymlinkLoop));
    }

    #[test]
    fn expand_home_only_touches_leading_tilde() {
        let home = Path::new("/home/u");
        assert_eq!(expand_home("~/.ssh", Some(home)), PathBuf::from("/home/u/.ssh"));
        assert_eq!(expand_home("~", Some(home)), PathBuf::from("/home/u"));
        assert_eq!(expand_home("a/~b", Some(home)), PathBuf::from("a/~b"));
        assert_eq!(expand_home("~/.ssh", None), PathBuf::from("~/.ssh"));
    }

    #[test]
    fn relative_patterns_match_component_sequences() {
        let pattern = SensitivePattern::parse(".config/gcloud");
        assert!(pattern.matches(Path::new("/home/u/.config/gcloud/creds.json")));
        assert!(!pattern.matches(Path::new("/home/u/.config/other/gcloud")));

        let env = SensitivePattern::parse(".env");
        assert!(env.matches(Path::new("/srv/app/.env")));
        assert!(!env.matches(Path::new("/srv/app/.envrc")));
    }

    #[test]
    fn tilde_patterns_float() {
        let pattern = SensitivePattern::parse("~/.my_secret");
        assert!(pattern.matches(Path::new("/home/u/.my_secret/key")));
        assert!(pattern.matches(Path::new("/home/u/project/.my_secret/key")));
    }

    #[test]
    fn absolute_patterns_are_anchored() {
        let pattern = SensitivePattern::parse("/srv/secrets");
        assert!(pattern.matches(Path::new("/srv/secrets/db.key")));
        assert!(!pattern.matches(Path::new("/home/srv/secrets/db.key")));
    }

    #[test]
    fn glob_components() {
        let pattern = SensitivePattern::parse("*.pem");
        assert!(pattern.matches(Path::new("/home/u/certs/server.pem")));
        assert!(!pattern.matches(Path::new("/home/u/certs/server.crt")));
    }
}
