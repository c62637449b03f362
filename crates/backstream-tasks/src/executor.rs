//! Bounded-concurrency task executor using tokio

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;
use tracing::error;

use crate::error::{TaskError, TaskErrors};
use crate::reporter::{TaskEvent, TaskReporter};
use crate::result::{TaskResult, TaskResults, TaskStatus};
use crate::task::Task;

/// Runs tasks with at most `parallelism` of them at once
pub struct TaskExecutor {
    parallelism: usize,
    reporter: Arc<dyn TaskReporter>,
}

impl TaskExecutor {
    /// Create a new executor; a parallelism of zero is treated as one
    pub fn new(parallelism: usize, reporter: Arc<dyn TaskReporter>) -> Self {
        Self {
            parallelism: parallelism.max(1),
            reporter,
        }
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    /// Run every task and return all results, sorted.
    ///
    /// A task that panics yields a failed result instead of taking the run
    /// down.
    pub async fn run(&self, tasks: Vec<Arc<Task>>, now: DateTime<Utc>) -> TaskResults {
        let start = Instant::now();
        let semaphore = Arc::new(Semaphore::new(self.parallelism));
        let mut handles = Vec::with_capacity(tasks.len());

        for task in tasks {
            // The semaphore is never closed.
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            let reporter = self.reporter.clone();
            let runnable = task.clone();

            let handle = tokio::spawn(async move {
                reporter.report(&TaskEvent::Started {
                    task: runnable.name.clone(),
                    command: runnable.command_string(),
                });
                let result = runnable.run(now).await;
                reporter.report(&finish_event(&result));
                drop(permit);
                result
            });
            handles.push((task, handle));
        }

        let mut results = TaskResults::new();
        for (task, handle) in handles {
            match handle.await {
                Ok(result) => results.push(result),
                Err(e) => {
                    error!(task = %task.name, error = %e, "task panicked");
                    let errors = TaskErrors::from(TaskError::handler(format!("task panicked: {}", e)));
                    let result = TaskResult {
                        status: TaskStatus::Failed,
                        logs: vec![format!("ERROR: {}", errors)],
                        errors: Some(errors),
                        task,
                        duration: Duration::ZERO,
                    };
                    self.reporter.report(&finish_event(&result));
                    results.push(result);
                }
            }
        }

        self.reporter.report(&TaskEvent::AllCompleted {
            total: results.len(),
            succeeded: results.count(TaskStatus::Success),
            skipped: results.count(TaskStatus::Skipped),
            failed: results.count(TaskStatus::Failed) + results.count(TaskStatus::Timeout),
            duration: start.elapsed(),
        });

        results.sort();
        results
    }
}

fn finish_event(result: &TaskResult) -> TaskEvent {
    let task = result.name().to_string();
    match result.status {
        TaskStatus::Skipped => TaskEvent::Skipped { task },
        TaskStatus::Success => TaskEvent::Completed {
            task,
            duration: result.duration,
        },
        TaskStatus::Failed | TaskStatus::Timeout => TaskEvent::Failed {
            task,
            status: result.status,
            duration: result.duration,
            error: result
                .errors
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default(),
        },
    }
}
