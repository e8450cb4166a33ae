// Gateway module for shell - follows the Train Station Pattern
// All external access must go through this gateway

// Private submodules - not directly accessible from outside
mod audit;
mod executor;
mod policy;
mod session;

// Public re-exports - the ONLY way to access shell functionality
pub use audit::AuditLog;
pub use executor::{CapturedResult, OutputCallback, OutputStream, ShellExecutor};
pub use policy::{dangerous_match, network_match, Rejection, ShellPolicy};
pub use session::{SessionInfo, SessionRegistry, SessionState, SessionSummary, ShellSession, TerminationReason};
