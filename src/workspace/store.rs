use ignore::WalkBuilder;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use super::sandbox::WorkspaceContext;
use crate::agents::{ActionOutcome, Effect, Payload};
use crate::utils::{PaiError, PaiResult};

/// Sandbox-gated file and directory operations on the project workspace
#[derive(Debug, Clone)]
pub struct WorkspaceStore {
    ctx: Arc<WorkspaceContext>,
}

impl WorkspaceStore {
    pub fn new(ctx: Arc<WorkspaceContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &WorkspaceContext {
        &self.ctx
    }

    /// Whether an allowed path exists; refused paths report `false`
    pub fn exists(&self, path: &str) -> bool {
        self.ctx
            .sandbox()
            .resolve(path)
            .map(|p| p.exists())
            .unwrap_or(false)
    }

    /// Whether an allowed path is an existing regular file
    pub fn is_file(&self, path: &str) -> bool {
        self.ctx
            .sandbox()
            .resolve(path)
            .map(|p| p.is_file())
            .unwrap_or(false)
    }

    /// Create an empty file. Never overwrites.
    pub fn create_file(&self, path: &str) -> ActionOutcome {
        let full = match self.ctx.sandbox().resolve(path) {
            Ok(p) => p,
            Err(e) => return denied(e),
        };

        if full.exists() {
            return ActionOutcome::warning(format!(
                "File already exists: {}. Use MODIFY_FILE to change it.",
                path
            ));
        }

        if let Err(e) = ensure_parent(&full) {
            return ActionOutcome::error(format!("Failed to create file '{}': {}", path, e));
        }

        match fs::OpenOptions::new().write(true).create_new(true).open(&full) {
            Ok(_) => ActionOutcome::success(format!("File created: {}", path), Effect::Changed),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                ActionOutcome::warning(format!("File already exists: {}", path))
            }
            Err(e) => ActionOutcome::error(format!("Failed to create file '{}': {}", path, e)),
        }
    }

    /// Create a directory and any missing parents
    pub fn create_directory(&self, path: &str) -> ActionOutcome {
        let full = match self.ctx.sandbox().resolve(path) {
            Ok(p) => p,
            Err(e) => return denied(e),
        };

        if full.is_dir() {
            return ActionOutcome::warning(format!("Directory already exists: {}", path));
        }
        if full.exists() {
            return ActionOutcome::error(format!(
                "Failed to create directory '{}': a file with that name exists",
                path
            ));
        }

        match fs::create_dir_all(&full) {
            Ok(()) => ActionOutcome::success(format!("Directory created: {}", path), Effect::Changed),
            Err(e) => ActionOutcome::error(format!("Failed to create directory '{}': {}", path, e)),
        }
    }

    /// Delete a file, or a directory recursively
    pub fn delete(&self, path: &str) -> ActionOutcome {
        let full = match self.ctx.sandbox().resolve_entry(path) {
            Ok(p) => p,
            Err(e) => return denied(e),
        };

        if full == self.ctx.root() {
            return ActionOutcome::error("Refusing to delete the project root");
        }

        // symlink_metadata does not follow links; a link is removed, never its target
        let result = match fs::symlink_metadata(&full) {
            Ok(meta) if meta.file_type().is_symlink() => {
                fs::remove_file(&full).map(|_| format!("Link deleted: {}", path))
            }
            Ok(meta) if meta.is_dir() => {
                fs::remove_dir_all(&full).map(|_| format!("Directory deleted: {}", path))
            }
            Ok(_) => fs::remove_file(&full).map(|_| format!("File deleted: {}", path)),
            Err(_) => {
                return ActionOutcome::warning(format!("Item not found, nothing deleted: {}", path))
            }
        };

        match result {
            Ok(message) => ActionOutcome::success(message, Effect::Changed),
            Err(e) => ActionOutcome::error(format!("Failed to delete '{}': {}", path, e)),
        }
    }

    /// Move or rename. A destination that is an existing directory receives the
    /// source inside it.
    pub fn move_path(&self, source: &str, destination: &str) -> ActionOutcome {
        let sandbox = self.ctx.sandbox();
        let (from, mut to) = match (sandbox.resolve_entry(source), sandbox.resolve(destination)) {
            (Ok(from), Ok(to)) => (from, to),
            (Err(e), _) | (_, Err(e)) => return denied(e),
        };

        if from.symlink_metadata().is_err() {
            return ActionOutcome::error(format!(
                "Failed to move '{}': source does not exist",
                source
            ));
        }
        if from == self.ctx.root() {
            return ActionOutcome::error("Refusing to move the project root");
        }

        if to.is_dir() {
            if let Some(name) = from.file_name() {
                to = to.join(name);
            }
        }
        if to.exists() {
            return ActionOutcome::error(format!(
                "Failed to move '{}': destination '{}' already exists",
                source, destination
            ));
        }
        if let Err(e) = ensure_parent(&to) {
            return ActionOutcome::error(format!("Failed to move '{}': {}", source, e));
        }

        match fs::rename(&from, &to) {
            Ok(()) => ActionOutcome::success(
                format!("Item moved from '{}' to '{}'", source, destination),
                Effect::Changed,
            ),
            Err(e) => ActionOutcome::error(format!("Failed to move '{}': {}", source, e)),
        }
    }

    /// Read a file. A missing file is `Ok(None)`, distinct from an empty one.
    pub fn read(&self, path: &str) -> PaiResult<Option<String>> {
        let full = self.ctx.sandbox().resolve(path)?;
        if !full.exists() {
            return Ok(None);
        }
        if full.is_dir() {
            return Err(PaiError::NotFound(format!("'{}' is a directory, not a file", path)));
        }
        let bytes = fs::read(&full)?;
        Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
    }

    /// Write content, skipping the disk entirely when nothing would change
    pub fn write(&self, path: &str, content: &str) -> ActionOutcome {
        let full = match self.ctx.sandbox().resolve(path) {
            Ok(p) => p,
            Err(e) => return denied(e),
        };

        if full.is_dir() {
            return ActionOutcome::error(format!(
                "Failed to write '{}': path is a directory",
                path
            ));
        }

        if let Ok(current) = fs::read(&full) {
            if current == content.as_bytes() {
                debug!(path, "write skipped, content identical");
                return ActionOutcome::warning(format!(
                    "No changes: {} already has this content",
                    path
                ));
            }
        }

        if let Err(e) = ensure_parent(&full) {
            return ActionOutcome::error(format!("Failed to write to '{}': {}", path, e));
        }

        match fs::write(&full, content) {
            Ok(()) => ActionOutcome::success(
                format!("Content written to: {} ({} bytes)", path, content.len()),
                Effect::Changed,
            ),
            Err(e) => ActionOutcome::error(format!("Failed to write to '{}': {}", path, e)),
        }
    }

    /// Recursive, sorted listing relative to the root. Directories end in `/`.
    pub fn list(&self, path: &str) -> PaiResult<Vec<String>> {
        let full = self.ctx.sandbox().resolve(path)?;
        if !full.is_dir() {
            return Err(PaiError::NotFound(format!("'{}' is not a valid directory", path)));
        }

        let sandbox = self.ctx.sandbox().clone();
        let filter_sandbox = sandbox.clone();
        let mut builder = WalkBuilder::new(&full);
        builder
            .standard_filters(false)
            .follow_links(false)
            .filter_entry(move |entry| {
                entry.depth() == 0
                    || !filter_sandbox.is_denied_name(&entry.file_name().to_string_lossy())
            });

        let mut paths = Vec::new();
        for result in builder.build() {
            let entry = match result {
                Ok(entry) => entry,
                Err(e) => {
                    debug!(error = %e, "skipping unreadable entry");
                    continue;
                }
            };
            if entry.depth() == 0 {
                continue;
            }
            let mut rel = sandbox.display_relative(entry.path());
            if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                rel.push('/');
            }
            paths.push(rel);
        }

        paths.sort();
        Ok(paths)
    }

    /// ASCII tree rooted at `path`, optionally limited to `max_depth` levels
    pub fn tree(&self, path: &str, max_depth: Option<usize>) -> PaiResult<String> {
        let full = self.ctx.sandbox().resolve(path)?;
        if !full.is_dir() {
            return Err(PaiError::NotFound(format!("'{}' is not a valid directory", path)));
        }

        let name = full
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| ".".to_string());
        let mut lines = vec![format!("{}/", name)];
        self.build_tree(&full, "", 1, max_depth, &mut lines);
        Ok(lines.join("\n"))
    }

    fn build_tree(
        &self,
        dir: &Path,
        prefix: &str,
        depth: usize,
        max_depth: Option<usize>,
        lines: &mut Vec<String>,
    ) {
        if max_depth.is_some_and(|max| depth > max) {
            return;
        }

        let mut items: Vec<(String, bool)> = match fs::read_dir(dir) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .map(|e| {
                    let is_dir = e.file_type().map(|t| t.is_dir()).unwrap_or(false);
                    (e.file_name().to_string_lossy().into_owned(), is_dir)
                })
                .filter(|(name, _)| !self.ctx.sandbox().is_denied_name(name))
                .collect(),
            Err(_) => return,
        };
        items.sort();

        let count = items.len();
        for (i, (name, is_dir)) in items.into_iter().enumerate() {
            let last = i + 1 == count;
            let pointer = if last { "└── " } else { "├── " };
            let label = if is_dir { format!("{}/", name) } else { name.clone() };
            lines.push(format!("{}{}{}", prefix, pointer, label));
            if is_dir {
                let extension = if last { "    " } else { "│   " };
                self.build_tree(
                    &dir.join(&name),
                    &format!("{}{}", prefix, extension),
                    depth + 1,
                    max_depth,
                    lines,
                );
            }
        }
    }

    /// Listing wrapped as an outcome for the dispatcher
    pub fn list_outcome(&self, path: &str) -> ActionOutcome {
        match self.list(path) {
            Ok(paths) => ActionOutcome::success(
                format!("Listed {} entries under '{}'", paths.len(), path),
                Effect::Observed,
            )
            .with_payload(Payload::Listing(paths)),
            Err(e) => outcome_for_error(e),
        }
    }

    /// Tree wrapped as an outcome for the dispatcher
    pub fn tree_outcome(&self, path: &str, max_depth: Option<usize>) -> ActionOutcome {
        match self.tree(path, max_depth) {
            Ok(tree) => ActionOutcome::success(
                format!("Displayed directory structure of '{}'", path),
                Effect::Observed,
            )
            .with_payload(Payload::Tree(tree)),
            Err(e) => outcome_for_error(e),
        }
    }
}

fn ensure_parent(path: &Path) -> std::io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

fn denied(error: PaiError) -> ActionOutcome {
    match error {
        PaiError::SandboxViolation { path, reason } => {
            ActionOutcome::error(format!("Access to path '{}' is denied: {}", path, reason))
        }
        other => ActionOutcome::error(other.to_string()),
    }
}

/// Map an error onto the outcome the dispatcher reports. Retryable signals
/// come back as warnings the planner can act on.
pub(crate) fn outcome_for_error(error: PaiError) -> ActionOutcome {
    match error {
        PaiError::SandboxViolation { .. } => denied(error),
        PaiError::NotFound(what) => ActionOutcome::error(format!("Not found: {}", what)),
        PaiError::UnrecognizedAction(header) => {
            ActionOutcome::warning(format!("Unrecognized action '{}' ignored", header))
        }
        signal if signal.is_retryable() => ActionOutcome::warning(signal.to_string()),
        other => ActionOutcome::error(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::OutcomeStatus;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn store() -> (TempDir, WorkspaceStore) {
        let temp_dir = TempDir::new().unwrap();
        let ctx = Arc::new(WorkspaceContext::new(temp_dir.path()).unwrap());
        (temp_dir, WorkspaceStore::new(ctx))
    }

    #[test]
    fn test_create_file_twice_warns() {
        let (_dir, store) = store();
        let first = store.create_file("notes.txt");
        assert_eq!(first.status, OutcomeStatus::Success);

        store.write("notes.txt", "keep me");
        let second = store.create_file("notes.txt");
        assert_eq!(second.status, OutcomeStatus::Warning);
        assert!(second.message.contains("already exists"));
        assert_eq!(store.read("notes.txt").unwrap().as_deref(), Some("keep me"));
    }

    #[test]
    fn test_create_file_makes_parents() {
        let (dir, store) = store();
        assert!(store.create_file("src/pkg/mod.py").is_success());
        assert!(dir.path().join("src/pkg/mod.py").is_file());
    }

    #[test]
    fn test_write_is_idempotent() {
        let (dir, store) = store();
        let first = store.write("a.txt", "hello");
        assert_eq!(first.status, OutcomeStatus::Success);
        assert_eq!(first.effect, Effect::Changed);

        let modified_before = fs::metadata(dir.path().join("a.txt")).unwrap().modified().unwrap();
        let second = store.write("a.txt", "hello");
        assert_eq!(second.status, OutcomeStatus::Warning);
        assert!(second.message.contains("No changes"));
        assert_eq!(second.effect, Effect::NoChange);
        let modified_after = fs::metadata(dir.path().join("a.txt")).unwrap().modified().unwrap();
        assert_eq!(modified_before, modified_after);
    }

    #[test]
    fn test_read_missing_vs_empty() {
        let (_dir, store) = store();
        assert_eq!(store.read("missing.txt").unwrap(), None);
        store.create_file("empty.txt");
        assert_eq!(store.read("empty.txt").unwrap(), Some(String::new()));
    }

    #[test]
    fn test_read_outside_root_is_violation() {
        let (_dir, store) = store();
        assert!(matches!(
            store.read("../etc/passwd"),
            Err(PaiError::SandboxViolation { .. })
        ));
    }

    #[test]
    fn test_move_missing_source_fails() {
        let (_dir, store) = store();
        let outcome = store.move_path("a.txt", "b.txt");
        assert_eq!(outcome.status, OutcomeStatus::Error);
        assert!(outcome.message.contains("Failed to move"));
    }

    #[test]
    fn test_move_into_directory() {
        let (dir, store) = store();
        store.write("a.txt", "x");
        store.create_directory("dest");
        let outcome = store.move_path("a.txt", "dest");
        assert!(outcome.is_success(), "{}", outcome.message);
        assert!(dir.path().join("dest/a.txt").is_file());
        assert!(!dir.path().join("a.txt").exists());
    }

    #[test]
    fn test_move_to_denylisted_destination_is_refused() {
        let (dir, store) = store();
        store.write("a.txt", "x");
        let outcome = store.move_path("a.txt", ".git/a.txt");
        assert_eq!(outcome.status, OutcomeStatus::Error);
        assert!(outcome.message.contains("denied"));
        assert!(dir.path().join("a.txt").exists());
    }

    #[test]
    fn test_delete_is_recursive() {
        let (dir, store) = store();
        store.write("pkg/a/b.txt", "x");
        let outcome = store.delete("pkg");
        assert!(outcome.is_success());
        assert!(!dir.path().join("pkg").exists());

        let again = store.delete("pkg");
        assert_eq!(again.status, OutcomeStatus::Warning);
    }

    #[test]
    fn test_delete_root_is_refused() {
        let (_dir, store) = store();
        assert_eq!(store.delete(".").status, OutcomeStatus::Error);
    }

    #[test]
    fn test_error_signals_map_to_outcomes() {
        let noop = outcome_for_error(PaiError::NoOpEdit("a.py".into()));
        assert_eq!(noop.status, OutcomeStatus::Warning);
        assert_eq!(noop.effect, Effect::NoChange);

        let timeout = outcome_for_error(PaiError::Timeout { secs: 2 });
        assert_eq!(timeout.status, OutcomeStatus::Warning);
        assert!(timeout.message.contains("2 seconds"));

        let unknown = outcome_for_error(PaiError::UnrecognizedAction("RUN".into()));
        assert_eq!(unknown.status, OutcomeStatus::Warning);
        assert_eq!(unknown.message, "Unrecognized action 'RUN' ignored");

        assert_eq!(outcome_for_error(PaiError::NotFound("x".into())).status, OutcomeStatus::Error);
        assert_eq!(
            outcome_for_error(PaiError::Config("bad".into())).status,
            OutcomeStatus::Error
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_delete_symlink_keeps_target() {
        let (dir, store) = store();
        store.write("docs/keep.md", "keep");
        std::os::unix::fs::symlink(dir.path().join("docs"), dir.path().join("docs_link")).unwrap();

        let outcome = store.delete("docs_link");
        assert!(outcome.is_success(), "{}", outcome.message);
        assert_eq!(outcome.message, "Link deleted: docs_link");
        assert!(dir.path().join("docs_link").symlink_metadata().is_err());
        assert_eq!(fs::read_to_string(dir.path().join("docs/keep.md")).unwrap(), "keep");
    }

    #[cfg(unix)]
    #[test]
    fn test_move_symlink_moves_the_link() {
        let (dir, store) = store();
        store.write("docs/keep.md", "keep");
        std::os::unix::fs::symlink(dir.path().join("docs"), dir.path().join("docs_link")).unwrap();

        let outcome = store.move_path("docs_link", "renamed_link");
        assert!(outcome.is_success(), "{}", outcome.message);
        let moved = dir.path().join("renamed_link");
        assert!(moved.symlink_metadata().unwrap().file_type().is_symlink());
        assert!(dir.path().join("docs/keep.md").is_file());
        assert!(dir.path().join("docs_link").symlink_metadata().is_err());
    }

    #[test]
    fn test_list_prunes_and_sorts() {
        let (dir, store) = store();
        store.write("src/main.py", "");
        store.write("README.md", "");
        fs::create_dir_all(dir.path().join(".git/objects")).unwrap();
        fs::create_dir_all(dir.path().join("src/__pycache__")).unwrap();
        fs::write(dir.path().join("src/__pycache__/main.pyc"), "").unwrap();

        let listing = store.list(".").unwrap();
        assert_eq!(
            listing,
            vec![
                "README.md".to_string(),
                "src/".to_string(),
                "src/main.py".to_string(),
            ]
        );
    }

    #[test]
    fn test_tree_renders_hierarchy() {
        let (_dir, store) = store();
        store.write("b.txt", "");
        store.write("a/inner.txt", "");
        store.write("a/deep/x.txt", "");

        let tree = store.tree(".", None).unwrap();
        let lines: Vec<&str> = tree.lines().skip(1).collect();
        assert_eq!(
            lines,
            vec![
                "├── a/",
                "│   ├── deep/",
                "│   │   └── x.txt",
                "│   └── inner.txt",
                "└── b.txt",
            ]
        );

        let shallow = store.tree(".", Some(1)).unwrap();
        assert!(!shallow.contains("inner.txt"));
        assert!(shallow.contains("a/"));
    }

    #[test]
    fn test_list_of_file_is_not_found() {
        let (_dir, store) = store();
        store.write("a.txt", "");
        assert!(matches!(store.list("a.txt"), Err(PaiError::NotFound(_))));
    }
}
