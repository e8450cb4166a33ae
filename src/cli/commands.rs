use anyhow::{Context, Result};
use colored::Colorize;
use std::path::Path;
use std::sync::Arc;

use crate::{
    agents::{preview_commands, TargetOs},
    app::{get_config_dir, init_config, Config},
    credentials::CredentialStore,
    workspace::{WorkspaceContext, WorkspaceStore},
};

use super::args::{Commands, ConfigAction, PreviewOs};

/// Handle CLI subcommands. Returns false for the ones the runtime drives
/// (`auto` and `run`).
pub async fn handle_command(command: &Commands, project_root: &Path, config: &Config) -> Result<bool> {
    match command {
        Commands::Auto | Commands::Run { .. } => Ok(false),
        Commands::Config { action } => {
            handle_config(action, project_root, config)?;
            Ok(true)
        }
        Commands::Tree { dir, depth } => {
            show_tree(project_root, dir, *depth)?;
            Ok(true)
        }
        Commands::Preview { plan, file, os } => {
            let plan = match (plan, file) {
                (Some(plan), _) => plan.clone(),
                (None, Some(file)) => std::fs::read_to_string(file)
                    .with_context(|| format!("Failed to read plan from {}", file.display()))?,
                (None, None) => anyhow::bail!("Provide a plan with --plan or --file"),
            };
            let os = match os {
                PreviewOs::Auto => TargetOs::current(),
                PreviewOs::Posix => TargetOs::Posix,
                PreviewOs::Windows => TargetOs::Windows,
            };
            println!("{}", preview_commands(&plan, os));
            Ok(true)
        }
        Commands::Status => {
            show_status(project_root, config)?;
            Ok(true)
        }
    }
}

fn open_store(config: &Config) -> Result<CredentialStore> {
    let path = config.credentials.resolve_path()?;
    CredentialStore::open(&path).with_context(|| format!("Failed to open {}", path.display()))
}

fn handle_config(action: &ConfigAction, project_root: &Path, config: &Config) -> Result<()> {
    match action {
        ConfigAction::Init => {
            println!("Initializing Pai configuration...");
            let created = init_config(project_root)?;
            if created.is_empty() {
                println!("Configuration already present, nothing written.");
            }
            for path in created {
                println!("  {} {}", "[OK]".green(), path.display());
            }
        }
        ConfigAction::Show => {
            print!("{}", toml::to_string_pretty(config)?);
        }
        ConfigAction::Add { id, secret, label } => {
            let store = open_store(config)?;
            let created = store.add_key(id, secret.trim(), label.as_deref())?;
            let verb = if created { "Added" } else { "Updated" };
            println!("{} {} key '{}'", "[OK]".green(), verb, id);
        }
        ConfigAction::List => {
            let store = open_store(config)?;
            let keys = store.list();
            if keys.is_empty() {
                println!("No API keys configured. Add one with `pai config add <id> <secret>`.");
            }
            for key in keys {
                let mut flags = Vec::new();
                if key.is_default {
                    flags.push("default".cyan().to_string());
                }
                if !key.enabled {
                    flags.push("disabled".red().to_string());
                }
                if let Some(secs) = key.cooldown_secs {
                    flags.push(format!("cooling down {}s", secs).yellow().to_string());
                }
                println!(
                    "  {:<16} {:<20} {} {}",
                    key.id.bold(),
                    key.masked,
                    key.label.unwrap_or_default(),
                    flags.join(", ")
                );
            }
        }
        ConfigAction::Remove { id } => {
            open_store(config)?.remove_key(id)?;
            println!("{} Removed key '{}'", "[OK]".green(), id);
        }
        ConfigAction::Enable { id } => {
            open_store(config)?.set_enabled(id, true)?;
            println!("{} Enabled key '{}'", "[OK]".green(), id);
        }
        ConfigAction::Disable { id } => {
            open_store(config)?.set_enabled(id, false)?;
            println!("{} Disabled key '{}'", "[OK]".green(), id);
        }
        ConfigAction::Default { id } => {
            open_store(config)?.set_default(id)?;
            println!("{} Default key is now '{}'", "[OK]".green(), id);
        }
    }
    Ok(())
}

fn show_tree(project_root: &Path, dir: &str, depth: Option<usize>) -> Result<()> {
    let ctx = Arc::new(WorkspaceContext::new(project_root)?);
    let store = WorkspaceStore::new(ctx);
    println!("{}", store.tree(dir, depth)?);
    Ok(())
}

/// Show configuration, credential and shell status
pub fn show_status(project_root: &Path, config: &Config) -> Result<()> {
    println!("Pai v{} Status:", env!("CARGO_PKG_VERSION"));
    println!();

    let config_file = get_config_dir()?.join("config.toml");
    if config_file.exists() {
        println!("  [OK] Configuration: {}", config_file.display());
    } else {
        println!("  [WARNING] Configuration: Not found (using defaults)");
    }
    println!("  Model: {}", config.model.name);

    let store = open_store(config)?;
    match store.enabled_count() {
        0 => println!("  [ERROR] API keys: none enabled (run `pai config add`)"),
        n => println!("  [OK] API keys: {} enabled of {}", n, store.len()),
    }
    if let Some(wait) = store.min_remaining_cooldown() {
        println!("      next key off cooldown in {}s", wait.num_seconds());
    }

    let shell = if cfg!(windows) { "powershell" } else { "bash" };
    match which::which(shell) {
        Ok(path) => println!("  [OK] Shell: {}", path.display()),
        Err(_) => println!("  [WARNING] Shell: {} not found, falling back to sh", shell),
    }

    let policy = &config.policy;
    println!("\n  Policy:");
    println!("    • shell execution: {}", on_off(policy.allow_shell_exec));
    println!("    • network commands: {}", on_off(policy.allow_network));
    println!("    • actions per step: {}", policy.max_actions_per_step);
    println!("    • shell timeout: {}s", policy.shell_timeout_secs);
    println!("  Project: {}", project_root.display());

    println!();
    Ok(())
}

fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "allowed"
    } else {
        "blocked"
    }
}
