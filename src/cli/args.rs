use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "pai")]
#[command(version)]
#[command(about = "An autonomous coding agent that plans and executes workspace actions", long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Project directory (defaults to current directory)
    #[arg(short, long, global = true)]
    pub path: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the interactive agent (default)
    Auto,
    /// Run a single request to completion and exit
    Run {
        /// The request for the agent
        #[arg(short, long)]
        prompt: String,

        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        output_format: OutputFormat,
    },
    /// Manage configuration and API keys
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Show the project tree as the agent sees it
    Tree {
        /// Directory relative to the project root
        #[arg(default_value = ".")]
        dir: String,

        /// Maximum depth
        #[arg(short, long)]
        depth: Option<usize>,
    },
    /// Show the shell equivalents of a plan without executing it
    Preview {
        /// Plan text, one action per line
        #[arg(long, conflicts_with = "file")]
        plan: Option<String>,

        /// Read the plan from a file
        #[arg(long)]
        file: Option<PathBuf>,

        /// Target operating system
        #[arg(long, value_enum, default_value_t = PreviewOs::Auto)]
        os: PreviewOs,
    },
    /// Check configuration, keys and shell availability
    Status,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Write default configuration files
    Init,
    /// Print the effective configuration
    Show,
    /// Add or replace an API key
    Add {
        /// Identifier for the key
        id: String,

        /// The secret itself
        #[arg(env = "PAI_API_KEY", hide_env_values = true)]
        secret: String,

        /// Free-form label
        #[arg(short, long)]
        label: Option<String>,
    },
    /// List API keys with masked secrets
    List,
    /// Remove an API key
    Remove { id: String },
    /// Include a key in rotation
    Enable { id: String },
    /// Exclude a key from rotation
    Disable { id: String },
    /// Make a key the default
    Default { id: String },
}

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Plain text output
    Text,
    /// JSON structured output
    Json,
    /// Markdown formatted output
    Markdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PreviewOs {
    /// The OS pai is running on
    Auto,
    Posix,
    Windows,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_requires_prompt() {
        assert!(Cli::try_parse_from(["pai", "run"]).is_err());
        let cli = Cli::try_parse_from(["pai", "run", "--prompt", "make a cli", "--output-format", "json"]).unwrap();
        match cli.command {
            Some(Commands::Run { prompt, output_format }) => {
                assert_eq!(prompt, "make a cli");
                assert!(matches!(output_format, OutputFormat::Json));
            }
            other => panic!("Expected run, got {:?}", other),
        }
    }

    #[test]
    fn test_config_add_with_label() {
        let cli = Cli::try_parse_from(["pai", "config", "add", "work", "AIza-secret", "--label", "team"]).unwrap();
        match cli.command {
            Some(Commands::Config {
                action: ConfigAction::Add { id, secret, label },
            }) => {
                assert_eq!(id, "work");
                assert_eq!(secret, "AIza-secret");
                assert_eq!(label.as_deref(), Some("team"));
            }
            other => panic!("Expected config add, got {:?}", other),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["pai", "tree", "src", "--depth", "2", "--verbose"]).unwrap();
        assert!(cli.verbose);
        assert!(matches!(cli.command, Some(Commands::Tree { depth: Some(2), .. })));
    }

    #[test]
    fn test_preview_plan_and_file_conflict() {
        assert!(Cli::try_parse_from(["pai", "preview", "--plan", "LIST_PATHS::.", "--file", "p.txt"]).is_err());
    }

    #[test]
    fn test_no_subcommand_is_interactive() {
        let cli = Cli::try_parse_from(["pai"]).unwrap();
        assert!(cli.command.is_none());
    }
}
