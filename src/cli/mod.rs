/// CLI argument parsing and command handling - Gateway
mod args;
mod commands;

pub use args::{Cli, Commands, ConfigAction, OutputFormat, PreviewOs};
pub use commands::{handle_command, show_status};
