use serde::{Deserialize, Serialize};
use std::fmt;

use crate::shell::CapturedResult;
use crate::workspace::DiffResult;

/// Closed set of action headers the planner may emit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionKind {
    CreateDirectory,
    CreateFile,
    WriteFile,
    ReadFile,
    ModifyFile,
    DeletePath,
    MovePath,
    ListPaths,
    ShowTree,
    Execute,
    ExecuteInput,
    Finish,
}

impl ActionKind {
    pub const ALL: [ActionKind; 12] = [
        ActionKind::CreateDirectory,
        ActionKind::CreateFile,
        ActionKind::WriteFile,
        ActionKind::ReadFile,
        ActionKind::ModifyFile,
        ActionKind::DeletePath,
        ActionKind::MovePath,
        ActionKind::ListPaths,
        ActionKind::ShowTree,
        ActionKind::Execute,
        ActionKind::ExecuteInput,
        ActionKind::Finish,
    ];

    /// Protocol header, e.g. `CREATE_FILE`
    pub fn header(&self) -> &'static str {
        match self {
            ActionKind::CreateDirectory => "CREATE_DIRECTORY",
            ActionKind::CreateFile => "CREATE_FILE",
            ActionKind::WriteFile => "WRITE_FILE",
            ActionKind::ReadFile => "READ_FILE",
            ActionKind::ModifyFile => "MODIFY_FILE",
            ActionKind::DeletePath => "DELETE_PATH",
            ActionKind::MovePath => "MOVE_PATH",
            ActionKind::ListPaths => "LIST_PATHS",
            ActionKind::ShowTree => "SHOW_TREE",
            ActionKind::Execute => "EXECUTE",
            ActionKind::ExecuteInput => "EXECUTE_INPUT",
            ActionKind::Finish => "FINISH",
        }
    }

    /// Case-insensitive header lookup
    pub fn from_header(header: &str) -> Option<Self> {
        let wanted = header.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.header().eq_ignore_ascii_case(wanted))
    }

    /// How many `::`-separated parameters the kind takes; the last one keeps any
    /// further `::` verbatim (commands and descriptions may contain them).
    pub fn arity(&self) -> usize {
        match self {
            ActionKind::WriteFile
            | ActionKind::ModifyFile
            | ActionKind::MovePath
            | ActionKind::ExecuteInput => 2,
            _ => 1,
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.header())
    }
}

/// A single validated action line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedAction {
    pub kind: ActionKind,
    pub params: Vec<String>,
}

impl ParsedAction {
    pub fn new(kind: ActionKind, params: Vec<String>) -> Self {
        Self { kind, params }
    }

    /// Parameter at `index`, or an empty string
    pub fn param(&self, index: usize) -> &str {
        self.params.get(index).map(String::as_str).unwrap_or("")
    }

    /// Identity used by the duplicate guard
    pub fn signature(&self) -> String {
        format!("{}::{}", self.kind.header(), self.params.join("::"))
    }
}

impl fmt::Display for ParsedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.signature())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutcomeStatus {
    Success,
    Warning,
    Error,
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutcomeStatus::Success => f.write_str("Success"),
            OutcomeStatus::Warning => f.write_str("Warning"),
            OutcomeStatus::Error => f.write_str("Error"),
        }
    }
}

/// What an action did to the workspace; drives the no-op streak counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    Changed,
    Observed,
    NoChange,
}

/// Structured data attached to an outcome
#[derive(Debug, Clone)]
pub enum Payload {
    Listing(Vec<String>),
    Tree(String),
    Content { path: String, content: String },
    Shell(CapturedResult),
    Diff(DiffResult),
}

/// Result of an agent action
#[derive(Debug, Clone)]
pub struct ActionOutcome {
    pub status: OutcomeStatus,
    pub message: String,
    pub payload: Option<Payload>,
    pub effect: Effect,
}

impl ActionOutcome {
    pub fn success(message: impl Into<String>, effect: Effect) -> Self {
        Self {
            status: OutcomeStatus::Success,
            message: message.into(),
            payload: None,
            effect,
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Warning,
            message: message.into(),
            payload: None,
            effect: Effect::NoChange,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Error,
            message: message.into(),
            payload: None,
            effect: Effect::NoChange,
        }
    }

    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }

    /// Text fed back to the planner
    pub fn render(&self) -> String {
        let mut out = format!("{}: {}", self.status, self.message);
        match &self.payload {
            Some(Payload::Listing(paths)) if !paths.is_empty() => {
                out.push('\n');
                out.push_str(&paths.join("\n"));
            }
            Some(Payload::Tree(tree)) => {
                out.push('\n');
                out.push_str(tree);
            }
            Some(Payload::Content { path, content }) => {
                out.push_str(&format!(
                    "\n--- FILE CONTENT: {} ---\n{}\n--- END OF FILE ---",
                    path, content
                ));
            }
            Some(Payload::Shell(captured)) => {
                out.push('\n');
                out.push_str(&captured.summary());
            }
            _ => {}
        }
        out
    }
}
