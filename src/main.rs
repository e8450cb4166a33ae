use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};

use paicode::{
    app::{load_config, Config},
    cli::{handle_command, Cli, Commands, OutputFormat},
    runtime::{run_interactive, Engine, NonInteractiveRunner},
    utils::{init_logger, log_info},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();
    init_logger(cli.verbose);

    let project_root = cli.path.clone().unwrap_or_else(|| PathBuf::from("."));
    let config = resolve_config(&cli, &project_root)?;
    log_info("Config", format!("model {}", config.model.name));

    match &cli.command {
        Some(Commands::Run { prompt, output_format }) => {
            run_non_interactive(&project_root, &config, prompt.clone(), output_format.clone()).await
        }
        Some(command) if handle_command(command, &project_root, &config).await? => Ok(()),
        _ => {
            let mut engine = Engine::build(&project_root, &config, true)?;
            run_interactive(&mut engine).await
        }
    }
}

/// An explicit --config file replaces the layered lookup
fn resolve_config(cli: &Cli, project_root: &Path) -> Result<Config> {
    match &cli.config {
        Some(config_path) => {
            let toml_str = std::fs::read_to_string(config_path)
                .with_context(|| format!("Failed to read {}", config_path.display()))?;
            Ok(toml::from_str(&toml_str)?)
        }
        None => load_config(project_root),
    }
}

/// Run in non-interactive mode
async fn run_non_interactive(
    project_root: &Path,
    config: &Config,
    prompt: String,
    format: OutputFormat,
) -> Result<()> {
    // Stream shell output only for human-readable output
    let stream = matches!(format, OutputFormat::Text);
    let mut runner = NonInteractiveRunner::new(project_root, config, stream)?;

    let result = runner.execute(prompt).await;
    println!("{}", runner.format_result(&result, format));

    // Exit with appropriate code
    if !result.errors.is_empty() {
        std::process::exit(1);
    }

    Ok(())
}
