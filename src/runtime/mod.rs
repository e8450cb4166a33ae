// Gateway module for the agent runtime - follows the Train Station Pattern
// All external access must go through this gateway

// Private submodules - not directly accessible from outside
mod engine;
mod generator;
mod interactive;
mod invoker;
mod non_interactive;
mod prompt;
mod transcript;

// Public re-exports - the ONLY way to access runtime functionality
pub use engine::{Engine, StepRecord, TaskOutcome};
pub use generator::PlannerContentGenerator;
pub use interactive::{parse_slash, run_interactive, SlashCommand};
pub use invoker::{CompletionOracle, NonEmptyOracle, ResilientInvoker, RetryPolicy};
#[cfg(test)]
pub use invoker::MockCompletionOracle;
pub use non_interactive::{ActionResult, ExecutionMetadata, NonInteractiveResult, NonInteractiveRunner};
pub use prompt::{build_planner_prompt, protocol_description};
pub use transcript::Transcript;
