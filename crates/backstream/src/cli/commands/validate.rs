//! Validate command

use clap::Args;
use console::style;
use tracing::info;

use backstream_core::config::{Config, DestinationKind};
use backstream_stores::StorageTarget;

use crate::cli::commands::load_config;
use crate::cli::{output, Cli, OutputFormat};

/// Validate the configuration file and list its tasks
#[derive(Debug, Args)]
pub struct ValidateCommand {}

impl ValidateCommand {
    /// Execute the validate command
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        info!(config = %cli.config.display(), "executing validate command");
        let config = load_config(&cli.config)?;

        match cli.format {
            OutputFormat::Json => {
                let output = serde_json::json!({
                    "valid": true,
                    "config_path": cli.config.to_string_lossy(),
                    "tasks": describe(&config),
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
            OutputFormat::Text => {
                if !cli.quiet {
                    println!("{}", output::header("Configured tasks"));
                    println!();
                    for (name, task) in &config.tasks {
                        println!("{}", style(name).bold());
                        println!("{}", output::key_value("command", &task.command.join(" ")));
                        if let Some(cwd) = &task.cwd {
                            println!("{}", output::key_value("cwd", &cwd.display().to_string()));
                        }
                        if let Some(timeout) = &task.timeout {
                            println!("{}", output::key_value("timeout", timeout));
                        }
                        for destination in &task.destination {
                            println!(
                                "{}",
                                output::key_value(
                                    destination.kind.type_name(),
                                    &format!(
                                        "{} ({})",
                                        output::path_style().apply_to(location(&destination.kind)),
                                        destination.schedule
                                    )
                                )
                            );
                        }
                        println!();
                    }
                    output::success(&format!(
                        "Configuration {} is valid ({} task(s))",
                        cli.config.display(),
                        config.len()
                    ));
                }
            }
        }

        Ok(())
    }
}

fn location(kind: &DestinationKind) -> String {
    match kind {
        DestinationKind::S3 { s3 } => {
            StorageTarget::new(&s3.bucket, &s3.prefix, &s3.suffix).to_string()
        }
    }
}

fn describe(config: &Config) -> serde_json::Value {
    config
        .tasks
        .iter()
        .map(|(name, task)| {
            serde_json::json!({
                "name": name,
                "command": task.command,
                "cwd": task.cwd,
                "timeout": task.timeout,
                "destinations": task.destination.iter().map(|d| serde_json::json!({
                    "type": d.kind.type_name(),
                    "location": location(&d.kind),
                    "schedule": d.schedule.to_string(),
                })).collect::<Vec<_>>(),
            })
        })
        .collect()
}
