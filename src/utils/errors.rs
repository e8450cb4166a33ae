use thiserror::Error;

/// Main error type for Pai
#[derive(Error, Debug)]
pub enum PaiError {
    #[error("Sandbox violation for '{path}': {reason}")]
    SandboxViolation { path: String, reason: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("No changes detected for {0}")]
    NoOpEdit(String),

    #[error("Shell session not found: {0}")]
    SessionNotFound(String),

    #[error("Shell session {0} has already exited")]
    SessionExited(String),

    #[error("Command rejected: {0}")]
    CommandRejected(String),

    #[error("Command timed out after {secs} seconds")]
    Timeout { secs: u64 },

    #[error("Rate limited on key '{key_id}': {message}")]
    RateLimited { key_id: String, message: String },

    #[error("No enabled API keys. Add one with `pai config add <id> <secret>` or enable an existing key")]
    NoCredentials,

    #[error(
        "All API keys are cooling down. Try again in {wait_secs} seconds or add another key with `pai config add`"
    )]
    AllCredentialsExhausted { wait_secs: i64 },

    #[error("Unrecognized action header: {0}")]
    UnrecognizedAction(String),

    #[error("Planner error: {0}")]
    Provider(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PaiError {
    /// Signals a calling layer can adapt to instead of giving up.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PaiError::NotFound(_)
                | PaiError::NoOpEdit(_)
                | PaiError::Timeout { .. }
                | PaiError::RateLimited { .. }
        )
    }
}

pub type PaiResult<T> = std::result::Result<T, PaiError>;
