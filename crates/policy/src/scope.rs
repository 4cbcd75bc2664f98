//! Filesystem predicates for the file tools: directory scoping, sensitive
//! path blocking, and write locks on infrastructure files.

use std::path::{Component, Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScopeViolation {
    #[error("outside allowed directories")]
    OutsideScopes,

    #[error("sensitive path ({0})")]
    SensitivePath(&'static str),

    #[error("core file is write-locked")]
    CoreFileLocked,

    #[error("protected system path")]
    ProtectedRoot,
}

/// Path fragments that are never readable, regardless of scope.
const SENSITIVE_READ_PATTERNS: &[(&str, &str)] = &[
    (".ssh/", "ssh keys"),
    (".ssh", "ssh keys"),
    (".aws/credentials", "aws credentials"),
    (".gnupg/", "gpg keyring"),
    (".gnupg", "gpg keyring"),
    ("keychain.enc", "keychain"),
    ("keychain.key", "keychain"),
    (".env", "dotenv secrets"),
];

/// Basenames the gateway refuses to overwrite: its own configuration and
/// persisted state, plus common infrastructure files.
const CORE_FILE_BASENAMES: &[&str] = &[
    "torbo.toml",
    "keychain.enc",
    "keychain.key",
    "audit.log",
    "Cargo.toml",
    "Cargo.lock",
];

/// Roots under which writes are always rejected.
const PROTECTED_WRITE_ROOTS: &[&str] = &[
    "/System",
    "/Library",
    "/usr",
    "/bin",
    "/sbin",
    "/Applications",
];

/// Per-agent filesystem policy. `vip` is true only at the `Full` level and
/// waives directory scoping and the core-file lock; it does not waive the
/// sensitive-read blocklist or the protected system roots.
pub struct ScopePolicy {
    scopes: Vec<PathBuf>,
    vip: bool,
}

impl ScopePolicy {
    pub fn new(scope_roots: &[String], vip: bool) -> Self {
        let scopes = scope_roots
            .iter()
            .map(|s| canonicalize_lenient(&expand_tilde(s)))
            .collect();
        Self { scopes, vip }
    }

    /// Resolve and check a path for reading. Returns the canonical path.
    pub fn check_read(&self, raw: &str) -> Result<PathBuf, ScopeViolation> {
        let path = canonicalize_lenient(&expand_tilde(raw));

        if let Some(reason) = sensitive_read_reason(&path) {
            return Err(ScopeViolation::SensitivePath(reason));
        }
        self.check_scopes(&path)?;
        Ok(path)
    }

    /// Resolve and check a path for writing. Returns the canonical path.
    pub fn check_write(&self, raw: &str) -> Result<PathBuf, ScopeViolation> {
        let path = canonicalize_lenient(&expand_tilde(raw));

        if is_protected_root(&path) {
            return Err(ScopeViolation::ProtectedRoot);
        }
        if !self.vip && is_core_file(&path) {
            return Err(ScopeViolation::CoreFileLocked);
        }
        self.check_scopes(&path)?;
        Ok(path)
    }

    fn check_scopes(&self, path: &Path) -> Result<(), ScopeViolation> {
        if self.vip || self.scopes.is_empty() {
            return Ok(());
        }
        let allowed = self
            .scopes
            .iter()
            .any(|root| path == root || path.starts_with(root));
        if allowed {
            Ok(())
        } else {
            Err(ScopeViolation::OutsideScopes)
        }
    }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(raw: &str) -> PathBuf {
    if raw == "~" {
        return home_dir();
    }
    if let Some(rest) = raw.strip_prefix("~/") {
        return home_dir().join(rest);
    }
    PathBuf::from(raw)
}

fn home_dir() -> PathBuf {
    directories::BaseDirs::new()
        .map(|d| d.home_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("/"))
}

/// Canonicalize resolving symlinks. A missing leaf canonicalizes its parent
/// and re-appends the file name, so `a/../b` collapses even for files that
/// do not exist yet.
pub fn canonicalize_lenient(path: &Path) -> PathBuf {
    if let Ok(resolved) = std::fs::canonicalize(path) {
        return resolved;
    }
    if let (Some(parent), Some(name)) = (path.parent(), path.file_name())
        && let Ok(resolved_parent) = std::fs::canonicalize(parent)
    {
        return resolved_parent.join(name);
    }
    // Nothing on disk to resolve against: collapse `.` and `..` lexically.
    normalize_lexically(path)
}

fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {},
            Component::ParentDir => {
                out.pop();
            },
            other => out.push(other),
        }
    }
    out
}

fn sensitive_read_reason(path: &Path) -> Option<&'static str> {
    let text = path.to_string_lossy();
    SENSITIVE_READ_PATTERNS.iter().find_map(|(pattern, reason)| {
        let hit = if pattern.ends_with('/') {
            text.contains(pattern)
        } else {
            text.ends_with(pattern) || text.contains(&format!("{pattern}/"))
        };
        hit.then_some(*reason)
    })
}

fn is_core_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|name| CORE_FILE_BASENAMES.contains(&name))
        .unwrap_or(false)
}

fn is_protected_root(path: &Path) -> bool {
    PROTECTED_WRITE_ROOTS
        .iter()
        .any(|root| path.starts_with(root))
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn scoped(dir: &Path) -> ScopePolicy {
        ScopePolicy::new(&[dir.to_string_lossy().into_owned()], false)
    }

    #[test]
    fn read_inside_scope_is_allowed() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "hi").unwrap();
        let policy = scoped(dir.path());

        let resolved = policy
            .check_read(&dir.path().join("a.txt").to_string_lossy())
            .unwrap();
        assert!(resolved.ends_with("a.txt"));
    }

    #[test]
    fn dotdot_escape_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().join("project");
        std::fs::create_dir(&project).unwrap();
        std::fs::write(dir.path().join("secret.txt"), "s").unwrap();
        let policy = scoped(&project);

        let escape = project.join("..").join("secret.txt");
        assert_eq!(
            policy.check_read(&escape.to_string_lossy()),
            Err(ScopeViolation::OutsideScopes)
        );
    }

    #[cfg(unix)]
    #[test]
    fn symlink_escape_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().join("project");
        let outside = dir.path().join("outside");
        std::fs::create_dir_all(&project).unwrap();
        std::fs::create_dir_all(&outside).unwrap();
        std::fs::write(outside.join("secret.txt"), "s").unwrap();
        std::os::unix::fs::symlink(&outside, project.join("link")).unwrap();

        let policy = scoped(&project);
        let through_link = project.join("link").join("secret.txt");
        assert_eq!(
            policy.check_read(&through_link.to_string_lossy()),
            Err(ScopeViolation::OutsideScopes)
        );
    }

    #[test]
    fn empty_scopes_mean_unrestricted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.txt"), "x").unwrap();
        let policy = ScopePolicy::new(&[], false);
        assert!(
            policy
                .check_read(&dir.path().join("f.txt").to_string_lossy())
                .is_ok()
        );
    }

    #[test]
    fn sensitive_paths_blocked_even_in_scope() {
        let dir = tempfile::tempdir().unwrap();
        let ssh = dir.path().join(".ssh");
        std::fs::create_dir(&ssh).unwrap();
        std::fs::write(ssh.join("id_rsa"), "key").unwrap();
        let policy = scoped(dir.path());

        assert!(matches!(
            policy.check_read(&ssh.join("id_rsa").to_string_lossy()),
            Err(ScopeViolation::SensitivePath(_))
        ));
        assert!(matches!(
            policy.check_read(&dir.path().join(".env").to_string_lossy()),
            Err(ScopeViolation::SensitivePath(_))
        ));
    }

    #[test]
    fn sensitive_paths_blocked_for_vip_too() {
        let policy = ScopePolicy::new(&[], true);
        assert!(matches!(
            policy.check_read("~/.aws/credentials"),
            Err(ScopeViolation::SensitivePath(_))
        ));
    }

    #[test]
    fn core_files_are_write_locked() {
        let dir = tempfile::tempdir().unwrap();
        let policy = scoped(dir.path());
        assert_eq!(
            policy.check_write(&dir.path().join("keychain.enc").to_string_lossy()),
            Err(ScopeViolation::CoreFileLocked)
        );
        assert!(
            policy
                .check_write(&dir.path().join("notes.txt").to_string_lossy())
                .is_ok()
        );
    }

    #[test]
    fn vip_waives_scope_and_core_lock_but_not_protected_roots() {
        let policy = ScopePolicy::new(&["/nonexistent-scope".into()], true);
        assert!(policy.check_write("/tmp/anywhere/audit.log").is_ok());
        assert_eq!(
            policy.check_write("/usr/local/bin/thing"),
            Err(ScopeViolation::ProtectedRoot)
        );
    }

    #[test]
    fn protected_roots_reject_writes() {
        let policy = ScopePolicy::new(&[], false);
        for path in ["/System/x", "/Library/y", "/usr/bin/z", "/bin/sh", "/sbin/a"] {
            assert_eq!(
                policy.check_write(path),
                Err(ScopeViolation::ProtectedRoot),
                "{path} should be protected"
            );
        }
    }

    #[test]
    fn tilde_expansion() {
        let expanded = expand_tilde("~/Documents/x.txt");
        assert!(expanded.is_absolute());
        assert!(expanded.ends_with("Documents/x.txt"));
        assert_eq!(expand_tilde("/abs/path"), PathBuf::from("/abs/path"));
    }

    #[test]
    fn lexical_normalization_collapses_dotdot() {
        assert_eq!(
            normalize_lexically(Path::new("/a/b/../c/./d")),
            PathBuf::from("/a/c/d")
        );
    }
}
