use serde::{Deserialize, Serialize};
use similar::{ChangeTag, TextDiff};
use tracing::{debug, info};

use super::store::{outcome_for_error, WorkspaceStore};
use crate::agents::{ActionOutcome, Effect, Payload};
use crate::constants::DIFF_PREVIEW_LINES;
use crate::utils::{PaiError, PaiResult};

/// Upper bound on how many lines a single edit may change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", content = "lines", rename_all = "lowercase")]
pub enum DiffCeiling {
    #[default]
    Off,
    /// Apply, but say the edit was large
    Advise(usize),
    /// Refuse and return a preview
    Reject(usize),
}

impl DiffCeiling {
    /// Build from the flat config pair; `0` disables the ceiling
    pub fn from_config(lines: usize, reject: bool) -> Self {
        match (lines, reject) {
            (0, _) => DiffCeiling::Off,
            (n, true) => DiffCeiling::Reject(n),
            (n, false) => DiffCeiling::Advise(n),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffResult {
    pub changed_line_count: usize,
    pub applied: bool,
    pub message: String,
    /// First lines of the diff, set when the edit was refused
    pub preview: Option<String>,
}

/// Normalize CRLF and lone CR line endings to LF
pub fn normalize_newlines(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

/// Inserted plus deleted lines between two texts
pub fn changed_lines(original: &str, proposed: &str) -> usize {
    let original = normalize_newlines(original);
    let proposed = normalize_newlines(proposed);
    TextDiff::from_lines(&original, &proposed)
        .iter_all_changes()
        .filter(|c| c.tag() != ChangeTag::Equal)
        .count()
}

/// Unified-style preview of at most `limit` changed lines
pub fn preview(original: &str, proposed: &str, limit: usize) -> String {
    let original = normalize_newlines(original);
    let proposed = normalize_newlines(proposed);
    let diff = TextDiff::from_lines(&original, &proposed);

    let mut lines = Vec::new();
    let mut total = 0;
    for change in diff.iter_all_changes() {
        let sign = match change.tag() {
            ChangeTag::Delete => "-",
            ChangeTag::Insert => "+",
            ChangeTag::Equal => continue,
        };
        total += 1;
        if lines.len() < limit {
            lines.push(format!("{}{}", sign, change.value().trim_end_matches('\n')));
        }
    }

    if total > lines.len() {
        lines.push(format!("... ({} more changed lines)", total - lines.len()));
    }
    lines.join("\n")
}

/// Computes line diffs and writes the proposed content only when it differs
#[derive(Debug, Clone)]
pub struct DiffPatchApplier {
    store: WorkspaceStore,
    ceiling: DiffCeiling,
}

impl DiffPatchApplier {
    pub fn new(store: WorkspaceStore) -> Self {
        Self {
            store,
            ceiling: DiffCeiling::Off,
        }
    }

    pub fn with_ceiling(mut self, ceiling: DiffCeiling) -> Self {
        self.ceiling = ceiling;
        self
    }

    pub fn ceiling(&self) -> DiffCeiling {
        self.ceiling
    }

    /// Write `proposed` when it differs from `original`. An empty diff is
    /// `PaiError::NoOpEdit` and leaves the file untouched.
    pub fn apply(&self, path: &str, original: &str, proposed: &str) -> PaiResult<DiffResult> {
        let count = changed_lines(original, proposed);

        if count == 0 {
            debug!(path, "empty diff, leaving file untouched");
            return Err(PaiError::NoOpEdit(path.to_string()));
        }

        if let DiffCeiling::Reject(limit) = self.ceiling {
            if count > limit {
                info!(path, count, limit, "edit exceeds diff ceiling");
                return Ok(DiffResult {
                    changed_line_count: count,
                    applied: false,
                    message: format!(
                        "Edit to {} changes {} lines, above the limit of {}. Split it into smaller modifications.",
                        path, count, limit
                    ),
                    preview: Some(preview(original, proposed, DIFF_PREVIEW_LINES)),
                });
            }
        }

        let outcome = self.store.write(path, proposed);
        if !outcome.is_success() {
            return Ok(DiffResult {
                changed_line_count: count,
                applied: false,
                message: outcome.message,
                preview: None,
            });
        }

        let mut message = format!("Modified {} ({} lines changed)", path, count);
        if let DiffCeiling::Advise(limit) = self.ceiling {
            if count > limit {
                message.push_str(&format!(
                    ". This edit exceeds the advised limit of {} lines",
                    limit
                ));
            }
        }

        Ok(DiffResult {
            changed_line_count: count,
            applied: true,
            message,
            preview: None,
        })
    }

    /// `apply` wrapped as an outcome for the dispatcher
    pub fn apply_outcome(&self, path: &str, original: &str, proposed: &str) -> ActionOutcome {
        match self.apply(path, original, proposed) {
            Ok(result) => Self::outcome(result),
            Err(e) => outcome_for_error(e),
        }
    }

    /// Outcome for an edit that produced a diff
    pub fn outcome(result: DiffResult) -> ActionOutcome {
        let outcome = if result.applied {
            ActionOutcome::success(result.message.clone(), Effect::Changed)
        } else {
            let mut message = result.message.clone();
            if let Some(preview) = &result.preview {
                message.push_str("\nPreview:\n");
                message.push_str(preview);
            }
            ActionOutcome::error(message)
        };
        outcome.with_payload(Payload::Diff(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::WorkspaceContext;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn applier(ceiling: DiffCeiling) -> (TempDir, WorkspaceStore, DiffPatchApplier) {
        let temp_dir = TempDir::new().unwrap();
        let ctx = Arc::new(WorkspaceContext::new(temp_dir.path()).unwrap());
        let store = WorkspaceStore::new(ctx);
        let applier = DiffPatchApplier::new(store.clone()).with_ceiling(ceiling);
        (temp_dir, store, applier)
    }

    #[test]
    fn test_empty_diff_does_not_write() {
        let (dir, store, applier) = applier(DiffCeiling::Off);
        store.write("a.py", "print(1)\n");
        let before = std::fs::metadata(dir.path().join("a.py")).unwrap().modified().unwrap();

        let err = applier.apply("a.py", "print(1)\n", "print(1)\n").unwrap_err();
        assert!(matches!(&err, PaiError::NoOpEdit(path) if path == "a.py"));
        assert!(err.is_retryable());
        assert!(err.to_string().contains("No changes detected"));
        let after = std::fs::metadata(dir.path().join("a.py")).unwrap().modified().unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_line_ending_only_change_is_noop() {
        let (_dir, _store, applier) = applier(DiffCeiling::Off);
        let result = applier.apply("a.txt", "one\r\ntwo\r\n", "one\ntwo\n");
        assert!(matches!(result, Err(PaiError::NoOpEdit(_))));
    }

    #[test]
    fn test_apply_counts_inserted_and_deleted() {
        let (_dir, store, applier) = applier(DiffCeiling::Off);
        store.write("a.txt", "one\ntwo\nthree\n");
        let result = applier
            .apply("a.txt", "one\ntwo\nthree\n", "one\n2\nthree\nfour\n")
            .unwrap();
        assert!(result.applied);
        // -two +2 +four
        assert_eq!(result.changed_line_count, 3);
        assert_eq!(
            store.read("a.txt").unwrap().as_deref(),
            Some("one\n2\nthree\nfour\n")
        );
    }

    #[test]
    fn test_reject_ceiling_returns_preview() {
        let (_dir, store, applier) = applier(DiffCeiling::Reject(2));
        store.write("a.txt", "a\n");
        let proposed: String = (0..30).map(|i| format!("line {}\n", i)).collect();
        let result = applier.apply("a.txt", "a\n", &proposed).unwrap();
        assert!(!result.applied);
        let preview = result.preview.unwrap();
        assert!(preview.lines().count() <= DIFF_PREVIEW_LINES + 1);
        assert!(preview.contains("more changed lines"));
        assert_eq!(store.read("a.txt").unwrap().as_deref(), Some("a\n"));
    }

    #[test]
    fn test_advise_ceiling_applies_with_note() {
        let (_dir, _store, applier) = applier(DiffCeiling::Advise(1));
        let result = applier.apply("a.txt", "a\n", "b\nc\n").unwrap();
        assert!(result.applied);
        assert!(result.message.contains("advised limit"));
    }

    #[test]
    fn test_ceiling_from_config() {
        assert_eq!(DiffCeiling::from_config(0, true), DiffCeiling::Off);
        assert_eq!(DiffCeiling::from_config(50, true), DiffCeiling::Reject(50));
        assert_eq!(DiffCeiling::from_config(50, false), DiffCeiling::Advise(50));
    }

    #[test]
    fn test_preview_marks_changes() {
        let text = preview("a\nb\n", "a\nc\n", 10);
        assert_eq!(text, "-b\n+c");
    }

    #[test]
    fn test_outcome_for_noop_is_warning() {
        let (_dir, _store, applier) = applier(DiffCeiling::Off);
        let outcome = applier.apply_outcome("a.txt", "x", "x");
        assert_eq!(outcome.status, crate::agents::OutcomeStatus::Warning);
        assert_eq!(outcome.effect, Effect::NoChange);
        assert!(outcome.message.contains("No changes detected for a.txt"));
    }
}
