pub mod agents;
pub mod app;
pub mod cli;
pub mod constants;
pub mod credentials;
pub mod models;
pub mod runtime;
pub mod shell;
pub mod utils;
pub mod workspace;

pub use agents::{ActionDispatcher, ActionKind, ActionOutcome, ParsedAction, StepReport};
pub use app::{load_config, Config};
pub use credentials::CredentialStore;
pub use runtime::{Engine, ResilientInvoker, RetryPolicy};
pub use shell::ShellExecutor;
pub use utils::PaiError;
pub use workspace::{DiffPatchApplier, PathSandbox, WorkspaceContext, WorkspaceStore};
