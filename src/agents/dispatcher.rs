use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::generator::{ContentGenerator, ContentRequest};
use super::parser::{parse_plan, PlanLine};
use super::types::{ActionKind, ActionOutcome, Effect, ParsedAction, Payload};
use crate::constants::{DEFAULT_MAX_ACTIONS_PER_STEP, DEFAULT_NOOP_STREAK_THRESHOLD};
use crate::shell::ShellExecutor;
use crate::utils::{PaiError, PaiResult};
use crate::workspace::{outcome_for_error, DiffPatchApplier, WorkspaceStore};

/// Execution limits applied per planning step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchPolicy {
    pub max_actions_per_step: usize,
    pub noop_streak_threshold: usize,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self {
            max_actions_per_step: DEFAULT_MAX_ACTIONS_PER_STEP,
            noop_streak_threshold: DEFAULT_NOOP_STREAK_THRESHOLD,
        }
    }
}

/// Everything one step produced
#[derive(Debug, Clone, Default)]
pub struct StepReport {
    /// Human-readable record, in plan order
    pub lines: Vec<String>,
    pub outcomes: Vec<(ParsedAction, ActionOutcome)>,
    pub finished: bool,
    pub finish_message: Option<String>,
}

impl StepReport {
    /// Result string fed back to the planner
    pub fn render(&self) -> String {
        if self.lines.is_empty() {
            "Execution finished with no result.".to_string()
        } else {
            self.lines.join("\n")
        }
    }
}

/// Filters, validates and routes planner actions
pub struct ActionDispatcher {
    store: WorkspaceStore,
    applier: DiffPatchApplier,
    shell: Arc<ShellExecutor>,
    generator: Arc<dyn ContentGenerator>,
    policy: DispatchPolicy,
    noop_streak: usize,
    finished: bool,
    finish_message: Option<String>,
}

impl ActionDispatcher {
    pub fn new(
        store: WorkspaceStore,
        applier: DiffPatchApplier,
        shell: Arc<ShellExecutor>,
        generator: Arc<dyn ContentGenerator>,
    ) -> Self {
        Self {
            store,
            applier,
            shell,
            generator,
            policy: DispatchPolicy::default(),
            noop_streak: 0,
            finished: false,
            finish_message: None,
        }
    }

    pub fn with_policy(mut self, policy: DispatchPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn noop_streak(&self) -> usize {
        self.noop_streak
    }

    pub fn shell(&self) -> &Arc<ShellExecutor> {
        &self.shell
    }

    /// Start a fresh task: clears the finish flag and the no-op streak
    pub fn reset(&mut self) {
        self.noop_streak = 0;
        self.finished = false;
        self.finish_message = None;
    }

    /// Parse and execute one planner block
    pub async fn execute_step(&mut self, plan: &str) -> StepReport {
        let mut report = StepReport::default();

        if self.finished {
            report.lines.push("Task already finished; no further actions executed.".to_string());
            report.finished = true;
            report.finish_message = self.finish_message.clone();
            return report;
        }

        if plan.trim().is_empty() {
            report.lines.push("Agent did not produce an action plan.".to_string());
            return report;
        }

        let mut seen = HashSet::new();
        let mut executed = 0;
        let mut skipped = 0;

        for line in parse_plan(plan) {
            let action = match line {
                PlanLine::Commentary(text) => {
                    report.lines.push(text);
                    continue;
                }
                PlanLine::Unrecognized { header, line } => {
                    warn!(header = %header, line = %line, "unrecognized action header");
                    let outcome = outcome_for_error(PaiError::UnrecognizedAction(header));
                    report.lines.push(outcome.render());
                    continue;
                }
                PlanLine::Action(action) => action,
            };

            if action.kind == ActionKind::Finish {
                if skipped > 0 {
                    report.lines.push(
                        "FINISH ignored: some actions in this step were not executed yet.".to_string(),
                    );
                    continue;
                }
                let message = match action.param(0) {
                    "" => "Task is considered complete.".to_string(),
                    text => text.to_string(),
                };
                info!(message = %message, "planner finished the task");
                report.lines.push(format!("Finish: {}", message));
                self.finish(message);
                break;
            }

            let signature = action.signature();
            if !seen.insert(signature.clone()) {
                debug!(%signature, "duplicate action skipped");
                report.lines.push(format!("Skipped duplicate action: {}", signature));
                continue;
            }

            if executed >= self.policy.max_actions_per_step {
                skipped += 1;
                report.lines.push(format!(
                    "Skipped (limit of {} action(s) per step): {}",
                    self.policy.max_actions_per_step, signature
                ));
                continue;
            }
            executed += 1;

            info!(action = %signature, "executing action");
            let outcome = self.execute_action(&action).await;
            report.lines.push(format!("[{}]\n{}", signature, outcome.render()));
            self.track_effect(outcome.effect);
            report.outcomes.push((action, outcome));

            if self.noop_streak >= self.policy.noop_streak_threshold {
                let message = format!(
                    "No effective changes in the last {} actions; finishing the task.",
                    self.noop_streak
                );
                warn!("{}", message);
                report.lines.push(format!("{}::{}", ActionKind::Finish, message));
                self.finish(message);
                break;
            }
        }

        report.finished = self.finished;
        report.finish_message = self.finish_message.clone();
        report
    }

    fn finish(&mut self, message: String) {
        self.finished = true;
        self.finish_message = Some(message);
    }

    fn track_effect(&mut self, effect: Effect) {
        match effect {
            Effect::Changed => self.noop_streak = 0,
            Effect::NoChange => self.noop_streak += 1,
            Effect::Observed => {}
        }
    }

    /// Route a single action to its component
    pub async fn execute_action(&self, action: &ParsedAction) -> ActionOutcome {
        let kind = action.kind;
        let first = action.param(0);
        let second = action.param(1);

        let needs_first = !matches!(kind, ActionKind::ListPaths | ActionKind::ShowTree | ActionKind::Finish);
        if needs_first && first.is_empty() {
            return ActionOutcome::error(format!("{} requires a parameter", kind));
        }

        match kind {
            ActionKind::CreateDirectory => self.store.create_directory(first),
            ActionKind::CreateFile => self.store.create_file(first),
            ActionKind::WriteFile => self.write_file(first, second).await,
            ActionKind::ReadFile => self.read_file(first),
            ActionKind::ModifyFile => self.modify_file(first, second).await,
            ActionKind::DeletePath => self.store.delete(first),
            ActionKind::MovePath => {
                if second.is_empty() {
                    return ActionOutcome::error("MOVE_PATH requires a source and a destination");
                }
                self.store.move_path(first, second)
            }
            ActionKind::ListPaths => self.store.list_outcome(or_root(first)),
            ActionKind::ShowTree => self.store.tree_outcome(or_root(first), None),
            ActionKind::Execute => self.shell.execute_outcome(first, None).await,
            ActionKind::ExecuteInput => self.shell.execute_outcome(first, Some(second)).await,
            ActionKind::Finish => ActionOutcome::success("Task is considered complete.", Effect::Observed),
        }
    }

    fn read_file(&self, path: &str) -> ActionOutcome {
        match self.store.read(path) {
            Ok(Some(content)) => ActionOutcome::success(format!("Read {}", path), Effect::Observed)
                .with_payload(Payload::Content {
                    path: path.to_string(),
                    content,
                }),
            Ok(None) => ActionOutcome::error(format!("File not found: {}", path)),
            Err(e) => outcome_for_error(e),
        }
    }

    async fn write_file(&self, path: &str, description: &str) -> ActionOutcome {
        let verdict = self.store.context().sandbox().check(path);
        if !verdict.allowed {
            return ActionOutcome::error(format!("Access to path '{}' is denied: {}", path, verdict.reason));
        }
        if self.store.is_file(path) {
            return ActionOutcome::warning(format!(
                "File already exists: {}. Use MODIFY_FILE to change it.",
                path
            ));
        }

        let request = ContentRequest::write(path, description);
        match self.generator.generate(&request).await {
            Ok(content) => self.store.write(path, &content),
            Err(e) => ActionOutcome::error(format!(
                "Failed to generate content for file {}: {}",
                path, e
            )),
        }
    }

    async fn modify_file(&self, path: &str, description: &str) -> ActionOutcome {
        let original = match self.store.read(path) {
            Ok(Some(content)) => content,
            Ok(None) => {
                return ActionOutcome::error(format!(
                    "Cannot modify '{}': file does not exist. Use WRITE_FILE or CREATE_FILE first.",
                    path
                ))
            }
            Err(e) => return outcome_for_error(e),
        };

        let request = ContentRequest::modify(path, description, original.clone());
        match self.generate_and_apply(&request, &original).await {
            Ok(outcome) => outcome,
            Err(signal) if signal.is_retryable() => {
                debug!(path, %signal, "retrying modification with a stricter request");
                match self.generate_and_apply(&request.stricter(), &original).await {
                    Ok(outcome) => outcome,
                    Err(PaiError::NoOpEdit(_)) => ActionOutcome::warning(format!(
                        "No changes detected for {} even after a stricter retry",
                        path
                    )),
                    Err(e) => outcome_for_error(e),
                }
            }
            Err(e) => outcome_for_error(e),
        }
    }

    /// Generation failures are reported as outcomes; edit signals such as
    /// `NoOpEdit` are returned for the caller to act on.
    async fn generate_and_apply(&self, request: &ContentRequest, original: &str) -> PaiResult<ActionOutcome> {
        let proposed = match self.generator.generate(request).await {
            Ok(proposed) => proposed,
            Err(e) => {
                return Ok(ActionOutcome::error(format!(
                    "Failed to generate modification for {}: {}",
                    request.path, e
                )))
            }
        };
        let result = self.applier.apply(&request.path, original, &proposed)?;
        Ok(DiffPatchApplier::outcome(result))
    }
}

fn or_root(path: &str) -> &str {
    if path.is_empty() {
        "."
    } else {
        path
    }
}
