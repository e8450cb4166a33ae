use anyhow::Result;
use colored::Colorize;
use std::io::Write;
use std::sync::atomic::Ordering;
use tokio::io::{AsyncBufReadExt, BufReader};

use super::engine::{Engine, TaskOutcome};
use super::transcript::Transcript;
use crate::utils::{log_error, log_warn};

const SLASH_HELP: &str = "Slash commands:
  /shell start <command>       start a long-lived shell session
  /shell feed <id> <text>      send a line to a session
  /shell output <id>           show output buffered since the last call
  /shell end <id>              end a session
  /shell list                  list sessions
  /help                        show this help";

/// Operator commands typed at the `pai>` prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlashCommand {
    ShellStart(String),
    ShellFeed { id: String, text: String },
    ShellOutput(String),
    ShellEnd(String),
    ShellList,
    Help,
    Unknown(String),
}

/// Parse a `/`-prefixed line; anything else is a task for the planner
pub fn parse_slash(input: &str) -> Option<SlashCommand> {
    let rest = input.trim().strip_prefix('/')?;
    let mut parts = rest.splitn(2, char::is_whitespace);
    let command = parts.next().unwrap_or_default();
    let args = parts.next().unwrap_or_default().trim();

    let parsed = match command {
        "help" | "?" => SlashCommand::Help,
        "shell" => {
            let mut sub = args.splitn(2, char::is_whitespace);
            let verb = sub.next().unwrap_or_default();
            let tail = sub.next().unwrap_or_default().trim();
            match (verb, tail) {
                ("list", _) => SlashCommand::ShellList,
                ("start", cmd) if !cmd.is_empty() => SlashCommand::ShellStart(cmd.to_string()),
                ("output", id) if !id.is_empty() => SlashCommand::ShellOutput(id.to_string()),
                ("end", id) if !id.is_empty() => SlashCommand::ShellEnd(id.to_string()),
                ("feed", tail) if !tail.is_empty() => {
                    let (id, text) = tail.split_once(char::is_whitespace).unwrap_or((tail, ""));
                    SlashCommand::ShellFeed {
                        id: id.to_string(),
                        text: text.trim_start().to_string(),
                    }
                }
                _ => SlashCommand::Unknown(input.trim().to_string()),
            }
        }
        _ => SlashCommand::Unknown(input.trim().to_string()),
    };
    Some(parsed)
}

async fn handle_slash(engine: &Engine, command: SlashCommand) {
    let shell = engine.shell();
    match command {
        SlashCommand::Help => println!("{}", SLASH_HELP),
        SlashCommand::Unknown(line) => {
            println!("{} Unknown command: {}", "[WARNING]".yellow(), line);
            println!("{}", SLASH_HELP);
        }
        SlashCommand::ShellStart(cmd) => match shell.session_start(&cmd).await {
            Ok(id) => println!("{} Session {} started: {}", "[OK]".green(), id.bold(), cmd),
            Err(e) => println!("{} {}", "[ERROR]".red(), e),
        },
        SlashCommand::ShellFeed { id, text } => match shell.session_feed(&id, &text).await {
            Ok(()) => println!("{} Sent to {}", "[OK]".green(), id),
            Err(e) => println!("{} {}", "[ERROR]".red(), e),
        },
        SlashCommand::ShellOutput(id) => match shell.session_output(&id) {
            Ok(output) if output.is_empty() => println!("(no new output)"),
            Ok(output) => print!("{}", output),
            Err(e) => println!("{} {}", "[ERROR]".red(), e),
        },
        SlashCommand::ShellEnd(id) => match shell.session_end(&id).await {
            Ok(summary) => {
                if !summary.output.is_empty() {
                    print!("{}", summary.output);
                }
                println!("{} Session {} {}", "[OK]".green(), summary.id, summary.state);
            }
            Err(e) => println!("{} {}", "[ERROR]".red(), e),
        },
        SlashCommand::ShellList => {
            let sessions = shell.sessions();
            if sessions.is_empty() {
                println!("No shell sessions.");
            }
            for info in sessions {
                println!(
                    "  {}  {:<12} {}  {}",
                    info.id.bold(),
                    info.state.to_string(),
                    info.started_at.format("%H:%M:%S"),
                    info.command
                );
            }
        }
    }
}

/// Plans and responses of every step, joined for the transcript
fn summarize(outcome: &TaskOutcome) -> (String, String) {
    let plans: Vec<&str> = outcome.steps.iter().map(|s| s.plan.as_str()).collect();
    let results: Vec<&str> = outcome.steps.iter().map(|s| s.result.as_str()).collect();
    (plans.join("\n"), results.join("\n"))
}

/// Read requests from stdin until `exit`, `quit`, EOF or Ctrl-C at the prompt.
/// Ctrl-C while a task runs stops it before its next planning step.
pub async fn run_interactive(engine: &mut Engine) -> Result<()> {
    let mut transcript = Transcript::create(&engine.context().history_dir())?;

    println!("{}", "=== Interactive Auto Mode ===".cyan().bold());
    println!("Type 'exit' or 'quit' to leave, '/help' for shell session commands.");

    let cancel = engine.cancel_flag();
    let watcher = tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            cancel.store(true, Ordering::SeqCst);
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("{} ", "pai>".magenta().bold());
        std::io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                println!("\n{}", "Session terminated.".yellow());
                break;
            }
        };
        let Some(line) = line else {
            println!();
            break;
        };

        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit") {
            println!("Session ended.");
            break;
        }
        if let Some(command) = parse_slash(input) {
            handle_slash(engine, command).await;
            continue;
        }

        engine.cancel_flag().store(false, Ordering::SeqCst);
        match engine.run_task(input, &transcript.context()).await {
            Ok(outcome) => {
                if outcome.cancelled {
                    log_warn("Agent", "task cancelled by user");
                    println!("{}", "Task cancelled.".yellow());
                } else if !outcome.finished {
                    println!("{}", "Step limit reached before the task finished.".yellow());
                }
                let (plan, response) = summarize(&outcome);
                transcript.record(input, &plan, &response)?;
            }
            Err(e) => {
                log_error("Agent", format!("{:#}", e));
                println!("{} {:#}", "[ERROR]".red(), e);
            }
        }
    }

    watcher.abort();
    engine.shutdown().await;
    Ok(())
}
