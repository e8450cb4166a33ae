use anyhow::{Context, Result};
use chrono::Local;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

const ENTRY_SEPARATOR: &str = "-------------------";

/// Session history: kept in memory for prompts and appended to
/// `.pai_history/session_<timestamp>.log`
#[derive(Debug)]
pub struct Transcript {
    path: PathBuf,
    entries: Vec<String>,
}

impl Transcript {
    /// Start a new log file under `history_dir`
    pub fn create(history_dir: &Path) -> Result<Self> {
        fs::create_dir_all(history_dir)
            .with_context(|| format!("Failed to create {}", history_dir.display()))?;
        let session_id = Local::now().format("%Y%m%d_%H%M%S");
        Ok(Self {
            path: history_dir.join(format!("session_{}.log", session_id)),
            entries: Vec::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// History block for the next planner prompt
    pub fn context(&self) -> String {
        self.entries.join("\n")
    }

    /// Record one request with the plans and system responses it produced
    pub fn record(&mut self, request: &str, plan: &str, response: &str) -> Result<()> {
        let entry = format!(
            "User: {}\nAI Plan:\n{}\nSystem Response:\n{}",
            request, plan, response
        );
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open {}", self.path.display()))?;
        writeln!(file, "{}\n{}", entry, ENTRY_SEPARATOR)?;
        self.entries.push(entry);
        Ok(())
    }
}
