use chrono::Utc;
use parking_lot::Mutex;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Append-only record of every shell invocation and session transition
#[derive(Debug)]
pub struct AuditLog {
    path: Option<PathBuf>,
    lock: Mutex<()>,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            lock: Mutex::new(()),
        }
    }

    /// A log that records nothing
    pub fn disabled() -> Self {
        Self {
            path: None,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn record_exec(&self, command: &str, exit_code: Option<i32>, timed_out: bool) {
        let status = match (exit_code, timed_out) {
            (_, true) => "timeout".to_string(),
            (Some(code), false) => format!("exit={}", code),
            (None, false) => "exit=signal".to_string(),
        };
        self.append("EXEC", &status, command);
    }

    pub fn record_rejected(&self, command: &str, reason: &str) {
        self.append("REJECT", reason, command);
    }

    pub fn record_session(&self, session_id: &str, transition: &str, detail: &str) {
        self.append("SESSION", &format!("{} {}", session_id, transition), detail);
    }

    fn append(&self, kind: &str, status: &str, detail: &str) {
        let Some(path) = &self.path else {
            return;
        };

        let line = format!(
            "{}\t{}\t{}\t{}\n",
            Utc::now().to_rfc3339(),
            kind,
            status,
            detail.replace('\n', "\\n")
        );

        let _guard = self.lock.lock();
        let result = (|| -> std::io::Result<()> {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut file = OpenOptions::new().create(true).append(true).open(path)?;
            file.write_all(line.as_bytes())
        })();

        // Auditing never fails the command itself
        if let Err(e) = result {
            warn!(path = %path.display(), error = %e, "failed to append audit entry");
        }
    }
}
