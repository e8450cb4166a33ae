use anyhow::{Context, Result};
use colored::Colorize;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, instrument};

use super::generator::PlannerContentGenerator;
use super::invoker::{NonEmptyOracle, ResilientInvoker};
use super::prompt::build_planner_prompt;
use crate::agents::{
    parse_plan, ActionDispatcher, ActionOutcome, OutcomeStatus, ParsedAction, PlanLine, StepReport,
};
use crate::app::Config;
use crate::constants::MAX_PLANNING_STEPS;
use crate::credentials::CredentialStore;
use crate::models::{ModelConfig, ModelFactory, ModelRequest};
use crate::shell::{AuditLog, OutputCallback, OutputStream, ShellExecutor};
use crate::workspace::{DiffPatchApplier, WorkspaceContext, WorkspaceStore};

/// One planning step: what the planner said and what came of it
#[derive(Debug, Clone)]
pub struct StepRecord {
    pub plan: String,
    pub result: String,
    pub outcomes: Vec<(ParsedAction, ActionOutcome)>,
}

/// How a task ended
#[derive(Debug, Clone, Default)]
pub struct TaskOutcome {
    pub steps: Vec<StepRecord>,
    pub finished: bool,
    pub finish_message: Option<String>,
    pub cancelled: bool,
}

impl TaskOutcome {
    /// All executed actions across steps
    pub fn outcomes(&self) -> impl Iterator<Item = &(ParsedAction, ActionOutcome)> {
        self.steps.iter().flat_map(|step| step.outcomes.iter())
    }
}

/// Live sink that prints streamed shell output
fn console_sink() -> OutputCallback {
    Arc::new(|stream, line| match stream {
        OutputStream::Stdout => println!("  {}", line.dimmed()),
        OutputStream::Stderr => eprintln!("  {}", line.red()),
    })
}

/// Planner loop over one workspace
pub struct Engine {
    ctx: Arc<WorkspaceContext>,
    dispatcher: ActionDispatcher,
    invoker: Arc<ResilientInvoker>,
    model_config: ModelConfig,
    max_actions_per_step: usize,
    max_steps: usize,
    cancel: Arc<AtomicBool>,
    echo: bool,
}

impl Engine {
    /// Wire every component for `project_root` from `config`
    pub fn build(project_root: &Path, config: &Config, echo: bool) -> Result<Self> {
        let ctx = Arc::new(WorkspaceContext::new(project_root)?);
        std::fs::create_dir_all(ctx.history_dir())
            .with_context(|| format!("Failed to create {}", ctx.history_dir().display()))?;

        let audit = Arc::new(AuditLog::new(ctx.audit_log_path()));
        let mut shell = ShellExecutor::new(ctx.root(), config.policy.shell_policy(), audit);
        if echo {
            shell = shell.with_sink(console_sink());
        }

        let credentials_path = config.credentials.resolve_path()?;
        let credentials = CredentialStore::open(&credentials_path)
            .with_context(|| format!("Failed to open {}", credentials_path.display()))?;

        let model = ModelFactory::create(&config.model)?;
        let invoker = Arc::new(
            ResilientInvoker::new(model, Arc::new(credentials))
                .with_policy(config.policy.retry_policy())
                .with_cooldown(config.credentials.cooldown())
                .with_oracle(Arc::new(NonEmptyOracle)),
        );
        let generator = Arc::new(PlannerContentGenerator::new(
            invoker.clone(),
            config.model.model_config(),
        ));

        let applier = DiffPatchApplier::new(WorkspaceStore::new(ctx.clone()))
            .with_ceiling(config.policy.diff_ceiling());
        let dispatcher = ActionDispatcher::new(
            WorkspaceStore::new(ctx.clone()),
            applier,
            Arc::new(shell),
            generator,
        )
        .with_policy(config.policy.dispatch_policy());

        info!(root = %ctx.root().display(), model = %config.model.name, "engine ready");
        Ok(Self::from_parts(ctx, dispatcher, invoker, config.model.model_config())
            .with_max_actions_per_step(config.policy.max_actions_per_step)
            .with_echo(echo))
    }

    pub fn from_parts(
        ctx: Arc<WorkspaceContext>,
        dispatcher: ActionDispatcher,
        invoker: Arc<ResilientInvoker>,
        model_config: ModelConfig,
    ) -> Self {
        Self {
            ctx,
            dispatcher,
            invoker,
            model_config,
            max_actions_per_step: 1,
            max_steps: MAX_PLANNING_STEPS,
            cancel: Arc::new(AtomicBool::new(false)),
            echo: false,
        }
    }

    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }

    pub fn with_max_actions_per_step(mut self, max_actions: usize) -> Self {
        self.max_actions_per_step = max_actions.max(1);
        self
    }

    pub fn context(&self) -> &WorkspaceContext {
        &self.ctx
    }

    pub fn shell(&self) -> &Arc<ShellExecutor> {
        self.dispatcher.shell()
    }

    /// Flag checked between planning steps; set it to stop the current task
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Drive the planner until it finishes, gets cancelled or runs out of steps.
    /// Planner failures (including exhausted credentials) end the task with an error.
    #[instrument(skip_all, fields(max_steps = self.max_steps))]
    pub async fn run_task(&mut self, request: &str, history: &str) -> Result<TaskOutcome> {
        self.dispatcher.reset();
        let mut outcome = TaskOutcome::default();
        let mut last_result: Option<String> = None;

        for step in 1..=self.max_steps {
            if self.cancel.swap(false, Ordering::SeqCst) {
                info!(step, "task cancelled");
                outcome.cancelled = true;
                break;
            }

            let prompt = build_planner_prompt(
                request,
                history,
                last_result.as_deref(),
                self.max_actions_per_step,
            );
            let model_request = ModelRequest::new(prompt).with_config(&self.model_config);
            let response = self
                .invoker
                .invoke(&model_request)
                .await
                .context("Planner call failed")?;

            if self.echo {
                show_plan(step, &response.content);
            }
            let report = self.dispatcher.execute_step(&response.content).await;
            if self.echo {
                show_report(&report);
            }

            let rendered = report.render();
            outcome.steps.push(StepRecord {
                plan: response.content,
                result: rendered.clone(),
                outcomes: report.outcomes,
            });

            if report.finished {
                outcome.finished = true;
                outcome.finish_message = report.finish_message;
                break;
            }
            last_result = Some(rendered);
        }

        Ok(outcome)
    }

    /// End any live shell sessions
    pub async fn shutdown(&self) {
        self.dispatcher.shell().shutdown().await;
    }
}

fn show_plan(step: usize, plan: &str) {
    println!("{}", format!("--- Step {} ---", step).cyan().bold());
    for line in parse_plan(plan) {
        match line {
            PlanLine::Commentary(text) => println!("{}", text.italic()),
            PlanLine::Action(action) => println!("{} {}", "->".blue(), action),
            PlanLine::Unrecognized { line, .. } => println!("{} {}", "?".yellow(), line),
        }
    }
}

fn show_report(report: &StepReport) {
    for (action, outcome) in &report.outcomes {
        let label = match outcome.status {
            OutcomeStatus::Success => "[OK]".green(),
            OutcomeStatus::Warning => "[WARNING]".yellow(),
            OutcomeStatus::Error => "[ERROR]".red(),
        };
        println!("{} {}: {}", label, action.kind, outcome.message);
    }
    if let Some(message) = &report.finish_message {
        if report.finished {
            println!("{} {}", "[DONE]".green().bold(), message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{DispatchPolicy, MockContentGenerator};
    use crate::models::{MockModel, ModelResponse};
    use crate::shell::ShellPolicy;
    use mockall::Sequence;
    use std::time::Duration;
    use tempfile::TempDir;

    fn plan(
        content: &'static str,
    ) -> impl Fn(&str, &ModelRequest) -> Result<ModelResponse, crate::models::ProviderError> + Send + 'static {
        move |_, _| {
            Ok(ModelResponse {
                content: content.to_string(),
                usage: None,
                model_name: "mock".to_string(),
            })
        }
    }

    fn engine(dir: &TempDir, model: MockModel, keys: usize) -> Engine {
        let ctx = Arc::new(WorkspaceContext::new(dir.path()).unwrap());
        let shell = ShellExecutor::new(ctx.root(), ShellPolicy::default(), Arc::new(AuditLog::disabled()));
        let mut generator = MockContentGenerator::new();
        generator
            .expect_generate()
            .returning(|_| Ok("print('hello')\n".to_string()));

        let dispatcher = ActionDispatcher::new(
            WorkspaceStore::new(ctx.clone()),
            DiffPatchApplier::new(WorkspaceStore::new(ctx.clone())),
            Arc::new(shell),
            Arc::new(generator),
        )
        .with_policy(DispatchPolicy::default());

        let store = CredentialStore::in_memory();
        for i in 0..keys {
            store.add_key(&format!("k{}", i), "secret", None).unwrap();
        }
        let invoker = ResilientInvoker::new(Arc::new(model), Arc::new(store))
            .with_rotation_delay(Duration::from_millis(1));
        Engine::from_parts(ctx, dispatcher, Arc::new(invoker), ModelConfig::default())
    }

    #[tokio::test]
    async fn test_task_runs_until_finish() {
        let dir = TempDir::new().unwrap();
        let mut model = MockModel::new();
        let mut seq = Sequence::new();
        model
            .expect_generate()
            .times(1)
            .in_sequence(&mut seq)
            .returning(plan("Creating the package.\nCREATE_DIRECTORY::pkg"));
        model
            .expect_generate()
            .withf(|_, request| request.prompt.contains("SYSTEM RESPONSE OF THE LAST STEP"))
            .times(1)
            .in_sequence(&mut seq)
            .returning(plan("WRITE_FILE::pkg/main.py::print hello"));
        model
            .expect_generate()
            .times(1)
            .in_sequence(&mut seq)
            .returning(plan("FINISH::all done"));

        let mut engine = engine(&dir, model, 1);
        let outcome = engine.run_task("make a package", "").await.unwrap();

        assert!(outcome.finished);
        assert_eq!(outcome.finish_message.as_deref(), Some("all done"));
        assert_eq!(outcome.steps.len(), 3);
        assert_eq!(outcome.outcomes().count(), 2);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("pkg/main.py")).unwrap(),
            "print('hello')\n"
        );
    }

    #[tokio::test]
    async fn test_step_limit_stops_task() {
        let dir = TempDir::new().unwrap();
        let mut model = MockModel::new();
        model
            .expect_generate()
            .times(2)
            .returning(plan("Still thinking about it."));

        let mut engine = engine(&dir, model, 1).with_max_steps(2);
        let outcome = engine.run_task("think", "").await.unwrap();
        assert!(!outcome.finished);
        assert_eq!(outcome.steps.len(), 2);
    }

    #[tokio::test]
    async fn test_cancel_flag_stops_before_next_step() {
        let dir = TempDir::new().unwrap();
        let mut model = MockModel::new();
        model.expect_generate().never();

        let mut engine = engine(&dir, model, 1);
        engine.cancel_flag().store(true, Ordering::SeqCst);
        let outcome = engine.run_task("anything", "").await.unwrap();
        assert!(outcome.cancelled);
        assert!(outcome.steps.is_empty());
        assert!(!engine.cancel_flag().load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_missing_credentials_end_task_with_error() {
        let dir = TempDir::new().unwrap();
        let mut model = MockModel::new();
        model.expect_generate().never();

        let mut engine = engine(&dir, model, 0);
        let err = engine.run_task("anything", "").await.unwrap_err();
        assert!(format!("{:#}", err).contains("No enabled API keys"));
    }
}
