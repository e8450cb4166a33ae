use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Instant;

use super::engine::{Engine, TaskOutcome};
use crate::app::Config;
use crate::cli::OutputFormat;

/// Result of a non-interactive run
#[derive(Debug, Serialize, Deserialize)]
pub struct NonInteractiveResult {
    /// The prompt that was executed
    pub prompt: String,
    /// Planner output per step
    pub plans: Vec<String>,
    /// Actions that were executed
    pub actions: Vec<ActionResult>,
    /// Any errors that occurred
    pub errors: Vec<String>,
    /// Metadata about the execution
    pub metadata: ExecutionMetadata,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ActionResult {
    /// Protocol header, e.g. WRITE_FILE
    pub action_type: String,
    /// First parameter (path or command)
    pub target: String,
    /// Success, Warning or Error
    pub status: String,
    pub output: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExecutionMetadata {
    pub model: String,
    pub steps: usize,
    pub finished: bool,
    pub finish_message: Option<String>,
    /// Execution time in milliseconds
    pub duration_ms: u128,
}

impl NonInteractiveResult {
    fn from_outcome(prompt: String, model: String, outcome: TaskOutcome, duration_ms: u128) -> Self {
        let actions = outcome
            .outcomes()
            .map(|(action, result)| ActionResult {
                action_type: action.kind.header().to_string(),
                target: action.param(0).to_string(),
                status: result.status.to_string(),
                output: result.render(),
            })
            .collect();

        Self {
            prompt,
            plans: outcome.steps.iter().map(|s| s.plan.clone()).collect(),
            actions,
            errors: Vec::new(),
            metadata: ExecutionMetadata {
                model,
                steps: outcome.steps.len(),
                finished: outcome.finished,
                finish_message: outcome.finish_message,
                duration_ms,
            },
        }
    }
}

/// Runs one prompt to completion without a prompt loop
pub struct NonInteractiveRunner {
    engine: Engine,
    model: String,
}

impl NonInteractiveRunner {
    pub fn new(project_path: &Path, config: &Config, stream: bool) -> Result<Self> {
        Ok(Self {
            engine: Engine::build(project_path, config, stream)?,
            model: config.model.name.clone(),
        })
    }

    pub fn from_engine(engine: Engine, model: impl Into<String>) -> Self {
        Self {
            engine,
            model: model.into(),
        }
    }

    /// Execute a single prompt and return the result
    pub async fn execute(&mut self, prompt: String) -> NonInteractiveResult {
        let start_time = Instant::now();
        let task = self.engine.run_task(&prompt, "").await;
        self.engine.shutdown().await;
        let duration_ms = start_time.elapsed().as_millis();

        match task {
            Ok(outcome) => {
                NonInteractiveResult::from_outcome(prompt, self.model.clone(), outcome, duration_ms)
            }
            Err(e) => {
                let mut result = NonInteractiveResult::from_outcome(
                    prompt,
                    self.model.clone(),
                    TaskOutcome::default(),
                    duration_ms,
                );
                result.errors.push(format!("{:#}", e));
                result
            }
        }
    }

    /// Format the result according to the output format
    pub fn format_result(&self, result: &NonInteractiveResult, format: OutputFormat) -> String {
        match format {
            OutputFormat::Json => serde_json::to_string_pretty(result).unwrap_or_else(|e| {
                format!("{{\"error\": \"Failed to serialize result: {}\"}}", e)
            }),
            OutputFormat::Text => {
                let mut output = String::new();
                for action in &result.actions {
                    output.push_str(&format!(
                        "[{}] {} {}\n",
                        action.status.to_uppercase(),
                        action.action_type,
                        action.target
                    ));
                }
                if let Some(message) = &result.metadata.finish_message {
                    output.push_str(&format!("Finished: {}\n", message));
                } else if result.errors.is_empty() {
                    output.push_str("Stopped before the task finished.\n");
                }
                if !result.errors.is_empty() {
                    output.push_str("\n--- Errors ---\n");
                    for error in &result.errors {
                        output.push_str(&format!("- {}\n", error));
                    }
                }
                output
            }
            OutputFormat::Markdown => {
                let mut output = String::new();
                output.push_str("## Actions Executed\n\n");
                for action in &result.actions {
                    output.push_str(&format!(
                        "- {} **{}**: `{}`\n",
                        action.status, action.action_type, action.target
                    ));
                    output.push_str(&format!("  ```\n  {}\n  ```\n", action.output.replace('\n', "\n  ")));
                }
                output.push('\n');

                if !result.errors.is_empty() {
                    output.push_str("## Errors\n\n");
                    for error in &result.errors {
                        output.push_str(&format!("- {}\n", error));
                    }
                    output.push('\n');
                }

                output.push_str("---\n");
                output.push_str(&format!(
                    "*Model: {} | Steps: {} | Duration: {}ms*\n",
                    result.metadata.model, result.metadata.steps, result.metadata.duration_ms
                ));
                output
            }
        }
    }
}
