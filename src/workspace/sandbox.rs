use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use crate::constants::{AUDIT_LOG_FILE, HISTORY_DIR, SENSITIVE_SEGMENTS};
use crate::utils::{PaiError, PaiResult};

/// Outcome of a sandbox check. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathVerdict {
    pub allowed: bool,
    pub reason: String,
    /// Absolute location under the root, present when `allowed`
    pub resolved: Option<PathBuf>,
}

impl PathVerdict {
    fn allow(resolved: PathBuf) -> Self {
        Self {
            allowed: true,
            reason: "ok".to_string(),
            resolved: Some(resolved),
        }
    }

    fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
            resolved: None,
        }
    }
}

/// Keeps every path under the project root and away from sensitive entries
#[derive(Debug, Clone)]
pub struct PathSandbox {
    root: PathBuf,
    denylist: Vec<String>,
}

impl PathSandbox {
    /// Create a sandbox rooted at `root` with the default denylist
    pub fn new(root: &Path) -> Result<Self> {
        let root = root
            .canonicalize()
            .with_context(|| format!("Project root does not exist: {}", root.display()))?;
        Ok(Self {
            root,
            denylist: SENSITIVE_SEGMENTS.iter().map(|s| s.to_string()).collect(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether a single entry name is on the denylist
    pub fn is_denied_name(&self, name: &str) -> bool {
        self.denylist.iter().any(|d| d == name)
    }

    pub fn is_safe(&self, path: &str) -> bool {
        self.check(path).allowed
    }

    /// Join `path` onto the root after lexical normalization
    fn lexical_join(&self, path: &str) -> Result<PathBuf, PathVerdict> {
        let trimmed = path.trim();
        if trimmed.is_empty() {
            return Err(PathVerdict::deny("empty path"));
        }

        let unified = trimmed.replace('\\', "/");
        let candidate = Path::new(&unified);

        let mut relative = PathBuf::new();
        let mut absolute = false;
        for component in candidate.components() {
            match component {
                Component::ParentDir => {
                    return Err(PathVerdict::deny("parent-directory traversal is not allowed"));
                }
                Component::CurDir => {}
                Component::RootDir | Component::Prefix(_) => absolute = true,
                Component::Normal(part) => relative.push(part),
            }
        }

        if absolute {
            let abs = PathBuf::from(&unified);
            match abs.strip_prefix(&self.root) {
                Ok(rest) => Ok(self.root.join(rest)),
                Err(_) => Err(PathVerdict::deny("path is outside the project directory")),
            }
        } else {
            Ok(self.root.join(&relative))
        }
    }

    /// Containment and denylist check on an already resolved path
    fn verdict_for(&self, resolved: PathBuf) -> PathVerdict {
        if !resolved.starts_with(&self.root) {
            return PathVerdict::deny("path resolves outside the project directory");
        }

        let inside = resolved.strip_prefix(&self.root).unwrap_or(Path::new(""));
        for segment in inside.components() {
            if let Component::Normal(part) = segment {
                let part = part.to_string_lossy();
                if self.is_denied_name(&part) {
                    return PathVerdict::deny(format!("access to sensitive entry '{}' is denied", part));
                }
            }
        }

        PathVerdict::allow(resolved)
    }

    /// Resolve `path` against the root, or explain why it is refused
    pub fn check(&self, path: &str) -> PathVerdict {
        let joined = match self.lexical_join(path) {
            Ok(joined) => joined,
            Err(verdict) => return verdict,
        };
        match resolve_existing_prefix(&joined) {
            Some(resolved) => self.verdict_for(resolved),
            None => PathVerdict::deny("path could not be resolved"),
        }
    }

    /// Like `check`, but a symlink in the last segment is kept as the link itself.
    /// Only the parent is resolved, so delete and move act on the entry, not its target.
    pub fn check_entry(&self, path: &str) -> PathVerdict {
        let joined = match self.lexical_join(path) {
            Ok(joined) => joined,
            Err(verdict) => return verdict,
        };
        if joined == self.root {
            return PathVerdict::allow(self.root.clone());
        }
        let (Some(parent), Some(name)) = (joined.parent(), joined.file_name()) else {
            return PathVerdict::deny("path could not be resolved");
        };
        match resolve_existing_prefix(parent) {
            Some(resolved_parent) => self.verdict_for(resolved_parent.join(name)),
            None => PathVerdict::deny("path could not be resolved"),
        }
    }

    /// Gate used by every component before touching the filesystem
    pub fn resolve(&self, path: &str) -> PaiResult<PathBuf> {
        Self::into_result(path, self.check(path))
    }

    /// Gate for operations on the entry itself (delete, move source)
    pub fn resolve_entry(&self, path: &str) -> PaiResult<PathBuf> {
        Self::into_result(path, self.check_entry(path))
    }

    fn into_result(path: &str, verdict: PathVerdict) -> PaiResult<PathBuf> {
        match verdict.resolved {
            Some(resolved) if verdict.allowed => Ok(resolved),
            _ => {
                debug!(path, reason = %verdict.reason, "sandbox rejected path");
                Err(PaiError::SandboxViolation {
                    path: path.to_string(),
                    reason: verdict.reason,
                })
            }
        }
    }

    /// Render an absolute path relative to the root with forward slashes
    pub fn display_relative(&self, path: &Path) -> String {
        let rel = path.strip_prefix(&self.root).unwrap_or(path);
        let text = rel.to_string_lossy().replace('\\', "/");
        if text.is_empty() {
            ".".to_string()
        } else {
            text
        }
    }
}

/// Canonicalize the deepest existing ancestor and re-append the rest, so symlinks
/// anywhere along an existing prefix are followed.
fn resolve_existing_prefix(path: &Path) -> Option<PathBuf> {
    let mut existing = path.to_path_buf();
    let mut tail = Vec::new();
    loop {
        if existing.exists() || existing.symlink_metadata().is_ok() {
            break;
        }
        let name = existing.file_name()?.to_os_string();
        tail.push(name);
        if !existing.pop() {
            return None;
        }
    }

    let mut resolved = existing.canonicalize().ok()?;
    for part in tail.into_iter().rev() {
        resolved.push(part);
    }
    Some(resolved)
}

/// Explicit context shared by every component instead of process-wide globals
#[derive(Debug, Clone)]
pub struct WorkspaceContext {
    sandbox: PathSandbox,
}

impl WorkspaceContext {
    pub fn new(root: &Path) -> Result<Self> {
        Ok(Self {
            sandbox: PathSandbox::new(root)?,
        })
    }

    pub fn sandbox(&self) -> &PathSandbox {
        &self.sandbox
    }

    pub fn root(&self) -> &Path {
        self.sandbox.root()
    }

    /// The tool's own history directory; denylisted for the agent itself
    pub fn history_dir(&self) -> PathBuf {
        self.root().join(HISTORY_DIR)
    }

    pub fn audit_log_path(&self) -> PathBuf {
        self.history_dir().join(AUDIT_LOG_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sandbox() -> (TempDir, PathSandbox) {
        let temp_dir = TempDir::new().unwrap();
        let sandbox = PathSandbox::new(temp_dir.path()).unwrap();
        (temp_dir, sandbox)
    }

    #[test]
    fn test_plain_relative_paths_are_allowed() {
        let (_dir, sandbox) = sandbox();
        assert!(sandbox.is_safe("src/main.rs"));
        assert!(sandbox.is_safe("./notes.txt"));
        assert!(sandbox.is_safe("."));
        assert!(sandbox.is_safe("src\\lib.rs"));
    }

    #[test]
    fn test_traversal_is_rejected() {
        let (_dir, sandbox) = sandbox();
        for path in ["../secret", "a/../../b", "a/../b", "..", "src/..\\..\\etc"] {
            let verdict = sandbox.check(path);
            assert!(!verdict.allowed, "{path} should be rejected");
            assert!(verdict.reason.contains("traversal"));
        }
    }

    #[test]
    fn test_absolute_paths_outside_root_are_rejected() {
        let (_dir, sandbox) = sandbox();
        assert!(!sandbox.is_safe("/etc/passwd"));
    }

    #[test]
    fn test_absolute_paths_inside_root_are_allowed() {
        let (dir, sandbox) = sandbox();
        let inside = sandbox.root().join("data.txt");
        assert!(sandbox.is_safe(&inside.to_string_lossy()));
        drop(dir);
    }

    #[test]
    fn test_denylisted_segments_at_any_depth() {
        let (_dir, sandbox) = sandbox();
        for path in [
            ".git/config",
            "pkg/.git",
            "deep/nested/__pycache__/x.pyc",
            ".env",
            "venv/bin/python",
            ".pai_history/audit.log",
            ".vscode/settings.json",
            "app/.idea",
        ] {
            let verdict = sandbox.check(path);
            assert!(!verdict.allowed, "{path} should be denied");
            assert!(verdict.reason.contains("sensitive"));
        }
        // Only whole segments match
        assert!(sandbox.is_safe("docs/git-notes.md"));
        assert!(sandbox.is_safe("environment.md"));
    }

    #[test]
    fn test_empty_path_is_rejected() {
        let (_dir, sandbox) = sandbox();
        assert!(!sandbox.is_safe(""));
        assert!(!sandbox.is_safe("   "));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_escape_is_rejected() {
        let (dir, sandbox) = sandbox();
        let outside = TempDir::new().unwrap();
        std::fs::write(outside.path().join("secret.txt"), "x").unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).unwrap();

        let verdict = sandbox.check("link/secret.txt");
        assert!(!verdict.allowed);
        assert!(verdict.reason.contains("outside"));
        // Non-existent leaf under the escaping link is caught too
        assert!(!sandbox.is_safe("link/new-file.txt"));
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_entry_keeps_the_link_itself() {
        let (dir, sandbox) = sandbox();
        std::fs::create_dir(dir.path().join("docs")).unwrap();
        std::os::unix::fs::symlink(dir.path().join("docs"), dir.path().join("docs_link")).unwrap();

        assert_eq!(sandbox.resolve("docs_link").unwrap(), sandbox.root().join("docs"));
        assert_eq!(sandbox.resolve_entry("docs_link").unwrap(), sandbox.root().join("docs_link"));
        assert_eq!(sandbox.resolve_entry(".").unwrap(), sandbox.root());

        // Parents are still resolved, so an escaping parent link is refused
        let outside = TempDir::new().unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("out")).unwrap();
        assert!(!sandbox.check_entry("out/file.txt").allowed);
        assert!(!sandbox.check_entry("../docs").allowed);
        assert!(!sandbox.check_entry(".git").allowed);
    }

    #[test]
    fn test_resolve_returns_sandbox_violation() {
        let (_dir, sandbox) = sandbox();
        match sandbox.resolve("../x") {
            Err(PaiError::SandboxViolation { path, .. }) => assert_eq!(path, "../x"),
            other => panic!("Expected sandbox violation, got {:?}", other),
        }
    }

    #[test]
    fn test_display_relative() {
        let (_dir, sandbox) = sandbox();
        let resolved = sandbox.resolve("src/app.py").unwrap();
        assert_eq!(sandbox.display_relative(&resolved), "src/app.py");
        assert_eq!(sandbox.display_relative(sandbox.root()), ".");
    }

    #[test]
    fn test_context_history_paths() {
        let dir = TempDir::new().unwrap();
        let ctx = WorkspaceContext::new(dir.path()).unwrap();
        assert!(ctx.audit_log_path().ends_with(".pai_history/audit.log"));
        assert!(!ctx.sandbox().is_safe(".pai_history/audit.log"));
    }
}
