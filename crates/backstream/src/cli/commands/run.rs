//! Run command

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use clap::Args;
use console::style;
use thiserror::Error;
use tracing::{error, info, warn};

use backstream_core::config::defaults::{
    DEFAULT_CHUNK_BUFFER, DEFAULT_CHUNK_SIZE, DEFAULT_PARALLEL_TASKS, DEFAULT_PID_FILE,
    MIN_CHUNK_SIZE,
};
use backstream_stores::DEFAULT_PART_CONCURRENCY;
use backstream_tasks::{TaskExecutor, TaskOptions, TaskResults, TaskStatus, TracingReporter};

use crate::cli::commands::{build_tasks, load_config};
use crate::cli::{output, Cli, OutputFormat};
use crate::notifier::SlackNotifier;
use crate::pid::{PidError, PidFile};

/// Returned when at least one task failed or timed out
#[derive(Debug, Error)]
#[error("{failed} of {total} backup tasks failed")]
pub struct TasksFailed {
    pub failed: usize,
    pub total: usize,
}

/// Run every due backup task
#[derive(Debug, Args)]
pub struct RunCommand {
    /// PID file guarding against concurrent runs
    #[arg(long, env = "BACKSTREAM_PID_FILE", default_value = DEFAULT_PID_FILE)]
    pub pid_file: PathBuf,

    /// Number of tasks run at the same time
    #[arg(short, long, default_value_t = DEFAULT_PARALLEL_TASKS)]
    pub parallel: usize,

    /// Slack webhook URL notified with the results (repeatable)
    #[arg(long, env = "BACKSTREAM_SLACK_WEBHOOKS", value_delimiter = ',')]
    pub slack_webhook: Vec<String>,

    /// Size in bytes of each streamed chunk and uploaded part
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE, value_parser = parse_chunk_size)]
    pub chunk_size: usize,

    /// Chunks buffered between a command and each destination
    #[arg(long, default_value_t = DEFAULT_CHUNK_BUFFER)]
    pub chunk_buffer: usize,

    /// Part uploads running at once per destination
    #[arg(long, default_value_t = DEFAULT_PART_CONCURRENCY)]
    pub part_concurrency: usize,
}

impl RunCommand {
    /// Execute the run command
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        info!(
            config = %cli.config.display(),
            parallel = self.parallel,
            "executing run command"
        );
        let runtime = tokio::runtime::Runtime::new()?;
        runtime.block_on(self.execute_async(cli))
    }

    async fn execute_async(&self, cli: &Cli) -> anyhow::Result<()> {
        let notifier = SlackNotifier::new(self.slack_webhook.clone());

        let results = match self.run(cli).await {
            Ok(results) => results,
            Err(e) => {
                if let Err(notify_error) = notifier.error(&e).await {
                    error!(error = %notify_error, "failed to send error notification");
                }
                return Err(e);
            }
        };

        print_results(cli, &results)?;

        if let Err(e) = notifier.notify(&results).await {
            error!(error = %e, "failed to send notifications");
        }

        if results.has_failures() {
            return Err(TasksFailed {
                failed: results.count(TaskStatus::Failed) + results.count(TaskStatus::Timeout),
                total: results.len(),
            }
            .into());
        }
        Ok(())
    }

    async fn run(&self, cli: &Cli) -> anyhow::Result<TaskResults> {
        let config = load_config(&cli.config)?;
        let options = TaskOptions {
            chunk_size: self.chunk_size,
            chunk_buffer: self.chunk_buffer,
            part_concurrency: self.part_concurrency,
        };
        let tasks = build_tasks(&config, &options).await?;

        let lock = match PidFile::acquire(&self.pid_file) {
            Ok(lock) => lock,
            Err(PidError::AlreadyRunning(pid)) => {
                warn!(pid, "another instance is running, nothing to do");
                return Ok(TaskResults::new());
            }
            Err(e) => return Err(e).context("failed to acquire pid file"),
        };

        let executor = TaskExecutor::new(self.parallel, Arc::new(TracingReporter));
        let results = executor.run(tasks, Utc::now()).await;

        if let Err(e) = lock.release() {
            warn!(error = %e, "failed to release pid file");
        }
        Ok(results)
    }
}

fn print_results(cli: &Cli, results: &TaskResults) -> anyhow::Result<()> {
    match cli.format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&summary_json(results))?);
        }
        OutputFormat::Text => {
            if cli.quiet {
                return Ok(());
            }
            if results.is_empty() {
                output::warning("No tasks were run");
                return Ok(());
            }

            println!("{}", output::header("Backup results"));
            for result in results.iter() {
                let status = output::status_style(result.status).apply_to(result.status.as_str());
                println!(
                    "  {:<8} {} ({:.1}s)",
                    status,
                    result.name(),
                    result.duration.as_secs_f64()
                );
                if let Some(errors) = &result.errors {
                    println!("           {}", style(errors).red());
                }
            }
            println!();

            let failed = results.count(TaskStatus::Failed) + results.count(TaskStatus::Timeout);
            let summary = format!(
                "{} succeeded, {} skipped, {} failed",
                results.count(TaskStatus::Success),
                results.count(TaskStatus::Skipped),
                failed
            );
            if failed == 0 {
                output::success(&summary);
            } else {
                output::error(&summary);
            }
        }
    }
    Ok(())
}

fn summary_json(results: &TaskResults) -> serde_json::Value {
    serde_json::json!({
        "success": !results.has_failures(),
        "tasks": results.iter().map(|r| serde_json::json!({
            "name": r.name(),
            "status": r.status.as_str(),
            "command": r.task.command_string(),
            "duration_ms": r.duration.as_millis() as u64,
            "errors": r.errors.as_ref().map(|e| e.iter().map(ToString::to_string).collect::<Vec<_>>()),
            "logs": r.logs,
        })).collect::<Vec<_>>(),
    })
}

fn parse_chunk_size(value: &str) -> Result<usize, String> {
    let size: usize = value
        .trim()
        .parse()
        .map_err(|_| format!("'{}' is not a size in bytes", value))?;
    if size < MIN_CHUNK_SIZE {
        return Err(format!(
            "chunk size must be at least {} bytes, got {}",
            MIN_CHUNK_SIZE, size
        ));
    }
    Ok(size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Commands;
    use backstream_tasks::{Task, TaskError, TaskErrorKind, TaskErrors, TaskResult};
    use clap::Parser;
    use std::time::Duration;

    fn parse(args: &[&str]) -> RunCommand {
        let mut argv = vec!["backstream", "run"];
        argv.extend_from_slice(args);
        match Cli::try_parse_from(argv).unwrap().command {
            Commands::Run(cmd) => cmd,
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_defaults() {
        let cmd = parse(&["--pid-file", "/tmp/test.pid"]);
        assert_eq!(cmd.parallel, DEFAULT_PARALLEL_TASKS);
        assert_eq!(cmd.chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(cmd.chunk_buffer, DEFAULT_CHUNK_BUFFER);
        assert_eq!(cmd.part_concurrency, DEFAULT_PART_CONCURRENCY);
    }

    #[test]
    fn test_repeatable_webhooks() {
        let cmd = parse(&[
            "--slack-webhook",
            "https://hooks.example/a,https://hooks.example/b",
            "--slack-webhook",
            "https://hooks.example/c",
        ]);
        assert_eq!(cmd.slack_webhook.len(), 3);
        assert_eq!(cmd.slack_webhook[2], "https://hooks.example/c");
    }

    #[test]
    fn test_chunk_size_minimum() {
        assert_eq!(parse_chunk_size("5242880"), Ok(MIN_CHUNK_SIZE));
        assert!(parse_chunk_size("1024").unwrap_err().contains("at least"));
        assert!(parse_chunk_size("10MB").is_err());

        let cli = Cli::try_parse_from(["backstream", "run", "--chunk-size", "1"]);
        assert!(cli.is_err());
    }

    #[test]
    fn test_summary_json() {
        let task = Arc::new(Task::new("db", ["sh", "-c", "exit 1"]));
        let results: TaskResults = vec![TaskResult {
            status: TaskStatus::Failed,
            task,
            logs: vec!["ERROR: command failed: exit status: 1".to_string()],
            errors: Some(TaskErrors::from(TaskError::new(
                TaskErrorKind::CommandFailed,
                "exit status: 1",
            ))),
            duration: Duration::from_millis(1500),
        }]
        .into_iter()
        .collect();

        let summary = summary_json(&results);
        assert_eq!(summary["success"], false);
        assert_eq!(summary["tasks"][0]["name"], "db");
        assert_eq!(summary["tasks"][0]["status"], "failed");
        assert_eq!(summary["tasks"][0]["duration_ms"], 1500);
        assert_eq!(
            summary["tasks"][0]["errors"][0],
            "command failed: exit status: 1"
        );
    }

    #[test]
    fn test_tasks_failed_display() {
        let err = TasksFailed { failed: 1, total: 4 };
        assert_eq!(err.to_string(), "1 of 4 backup tasks failed");
    }
}
