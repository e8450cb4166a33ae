// Gateway module for workspace - follows the Train Station Pattern
// All external access must go through this gateway

// Private submodules - not directly accessible from outside
mod diff;
mod sandbox;
mod store;

// Public re-exports - the ONLY way to access workspace functionality
pub use diff::{changed_lines, normalize_newlines, preview, DiffCeiling, DiffPatchApplier, DiffResult};
pub use sandbox::{PathSandbox, PathVerdict, WorkspaceContext};
pub use store::WorkspaceStore;
pub(crate) use store::outcome_for_error;
