//! CLI definition and command handling

pub mod commands;
pub mod output;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use commands::{CompletionsCommand, RunCommand, StatusCommand, ValidateCommand};

/// backstream - stream backup command output into object storage
#[derive(Debug, Parser)]
#[command(name = "backstream")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the configuration file (.toml, .json, .yaml or .yml)
    #[arg(
        short,
        long,
        global = true,
        env = "BACKSTREAM_CONFIG",
        default_value = "backstream.toml"
    )]
    pub config: PathBuf,

    /// Suppress output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Output format
    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Output format for CLI
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    #[default]
    Text,
    /// JSON output
    Json,
}

/// Available commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run every due backup task
    Run(RunCommand),

    /// Validate the configuration file
    Validate(ValidateCommand),

    /// Show last and next run of every destination
    Status(StatusCommand),

    /// Generate shell completions
    Completions(CompletionsCommand),
}

impl Cli {
    /// Execute the CLI command
    pub fn execute(self) -> anyhow::Result<()> {
        match self.command {
            Commands::Run(ref cmd) => cmd.execute(&self),
            Commands::Validate(ref cmd) => cmd.execute(&self),
            Commands::Status(ref cmd) => cmd.execute(&self),
            Commands::Completions(ref cmd) => cmd.execute(&self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "backstream",
            "validate",
            "--config",
            "/etc/backstream.yaml",
            "--format",
            "json",
        ])
        .unwrap();
        assert_eq!(cli.config, PathBuf::from("/etc/backstream.yaml"));
        assert_eq!(cli.format, OutputFormat::Json);
        assert!(matches!(cli.command, Commands::Validate(_)));
    }
}
