//! Status command

use chrono::{DateTime, Utc};
use clap::Args;
use console::style;
use futures::future::join_all;
use serde::Serialize;
use tracing::info;

use backstream_tasks::{Destination, Task, TaskOptions};

use crate::cli::commands::{build_tasks, load_config};
use crate::cli::{output, Cli, OutputFormat};

/// Show the last and next run of every destination
#[derive(Debug, Args)]
pub struct StatusCommand {}

/// Schedule state of one destination
#[derive(Debug, Serialize)]
struct DestinationStatus {
    task: String,
    destination: String,
    schedule: String,
    last_run: Option<DateTime<Utc>>,
    next_run: Option<DateTime<Utc>>,
    due: bool,
    error: Option<String>,
}

impl StatusCommand {
    /// Execute the status command
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        info!(config = %cli.config.display(), "executing status command");
        let runtime = tokio::runtime::Runtime::new()?;
        runtime.block_on(self.execute_async(cli))
    }

    async fn execute_async(&self, cli: &Cli) -> anyhow::Result<()> {
        let config = load_config(&cli.config)?;
        let tasks = build_tasks(&config, &TaskOptions::default()).await?;
        let now = Utc::now();

        let lookups = tasks.iter().flat_map(|task| {
            task.destinations
                .iter()
                .map(move |destination| destination_status(task, destination, now))
        });
        let statuses = join_all(lookups).await;

        match cli.format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&statuses)?);
            }
            OutputFormat::Text => {
                if cli.quiet {
                    return Ok(());
                }
                println!("{}", output::header("Destination status"));
                for status in &statuses {
                    println!();
                    println!(
                        "{} {}",
                        style(&status.task).bold(),
                        output::path_style().apply_to(&status.destination)
                    );
                    println!("{}", output::key_value("schedule", &status.schedule));
                    if let Some(error) = &status.error {
                        println!("{}", output::key_value("error", &style(error).red().to_string()));
                        continue;
                    }
                    println!("{}", output::key_value("last run", &format_time(status.last_run)));
                    println!("{}", output::key_value("next run", &format_time(status.next_run)));
                    if status.due {
                        println!("{}", output::key_value("due", &style("yes").green().to_string()));
                    }
                }
            }
        }

        Ok(())
    }
}

async fn destination_status(
    task: &Task,
    destination: &Destination,
    now: DateTime<Utc>,
) -> DestinationStatus {
    let mut status = DestinationStatus {
        task: task.name.clone(),
        destination: destination.label(),
        schedule: destination.schedule().to_string(),
        last_run: None,
        next_run: None,
        due: false,
        error: None,
    };

    match destination.last_run().await {
        Ok(last_run) => {
            status.last_run = last_run;
            status.next_run = Some(destination.next_run(last_run, now));
            status.due = destination.is_due(last_run, now);
        }
        Err(e) => status.error = Some(e.to_string()),
    }
    status
}

fn format_time(time: Option<DateTime<Utc>>) -> String {
    match time {
        Some(time) => time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        None => "never".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backstream_core::Schedule;
    use backstream_stores::{MemoryStorage, MultipartUploader, StorageTarget};
    use chrono::TimeZone;
    use std::sync::Arc;

    fn destination(storage: MemoryStorage) -> Destination {
        Destination::new(
            Schedule::parse("@daily").unwrap(),
            MultipartUploader::new(
                Arc::new(storage),
                StorageTarget::new("bucket", "db/", ".sql"),
            ),
        )
    }

    #[tokio::test]
    async fn test_status_from_last_artifact() {
        let task = Task::new("db", ["pg_dump"]);
        let destination = destination(
            MemoryStorage::new().with_object("bucket", "db/20210821093000.sql", "dump"),
        );
        let now = Utc.with_ymd_and_hms(2021, 8, 22, 12, 0, 0).unwrap();

        let status = destination_status(&task, &destination, now).await;
        assert_eq!(status.destination, "s3://bucket/db/*.sql");
        assert_eq!(
            status.last_run,
            Some(Utc.with_ymd_and_hms(2021, 8, 21, 9, 30, 0).unwrap())
        );
        assert_eq!(
            status.next_run,
            Some(Utc.with_ymd_and_hms(2021, 8, 22, 0, 0, 0).unwrap())
        );
        assert!(status.due);
        assert!(status.error.is_none());
    }

    #[tokio::test]
    async fn test_status_reports_listing_errors() {
        let task = Task::new("db", ["pg_dump"]);
        let destination = destination(MemoryStorage::new().fail_list("access denied"));

        let status = destination_status(&task, &destination, Utc::now()).await;
        assert!(status.error.is_some());
        assert!(!status.due);
    }

    #[test]
    fn test_format_time() {
        assert_eq!(format_time(None), "never");
        let time = Utc.with_ymd_and_hms(2021, 8, 17, 9, 30, 0).unwrap();
        assert_eq!(format_time(Some(time)), "2021-08-17 09:30:00 UTC");
    }
}
