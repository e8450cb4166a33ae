// Gateway module for agents - follows the Train Station Pattern
// All external access must go through this gateway

// Private submodules - not directly accessible from outside
mod dispatcher;
mod generator;
mod parser;
mod preview;
mod types;

// Public re-exports - the ONLY way to access agent functionality
pub use dispatcher::{ActionDispatcher, DispatchPolicy, StepReport};
pub use generator::{ContentGenerator, ContentRequest};
#[cfg(test)]
pub use generator::MockContentGenerator;
pub use parser::{parse_line, parse_plan, PlanLine};
pub use preview::{preview_commands, TargetOs};
pub use types::{ActionKind, ActionOutcome, Effect, OutcomeStatus, ParsedAction, Payload};
