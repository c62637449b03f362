//! Task execution reporting

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::result::TaskStatus;

/// Events emitted during task execution
#[derive(Debug, Clone, PartialEq)]
pub enum TaskEvent {
    /// A task acquired an execution slot and is starting
    Started { task: String, command: String },
    /// No destination of the task was due
    Skipped { task: String },
    /// A task stored its artifact everywhere it was due
    Completed { task: String, duration: Duration },
    /// A task failed or timed out
    Failed {
        task: String,
        status: TaskStatus,
        duration: Duration,
        error: String,
    },
    /// All tasks completed
    AllCompleted {
        total: usize,
        succeeded: usize,
        skipped: usize,
        failed: usize,
        duration: Duration,
    },
}

impl TaskEvent {
    /// Name of the task the event is about, if any
    pub fn task(&self) -> Option<&str> {
        match self {
            Self::Started { task, .. }
            | Self::Skipped { task }
            | Self::Completed { task, .. }
            | Self::Failed { task, .. } => Some(task),
            Self::AllCompleted { .. } => None,
        }
    }

    /// Whether the event ends a task run
    pub fn is_finish(&self) -> bool {
        matches!(
            self,
            Self::Skipped { .. } | Self::Completed { .. } | Self::Failed { .. }
        )
    }
}

/// Trait for reporting task execution progress
pub trait TaskReporter: Send + Sync {
    /// Handle a task event
    fn report(&self, event: &TaskEvent);
}

/// Simple reporter that logs to tracing
#[derive(Debug, Default)]
pub struct TracingReporter;

impl TaskReporter for TracingReporter {
    fn report(&self, event: &TaskEvent) {
        match event {
            TaskEvent::Started { task, command } => {
                tracing::info!("Starting {}: {}", task, command);
            }
            TaskEvent::Skipped { task } => {
                tracing::info!("{} skipped: no destination due", task);
            }
            TaskEvent::Completed { task, duration } => {
                tracing::info!("{} completed in {:.1}s", task, duration.as_secs_f64());
            }
            TaskEvent::Failed {
                task,
                status,
                duration,
                error,
            } => {
                tracing::error!(
                    "{} {} after {:.1}s: {}",
                    task,
                    status,
                    duration.as_secs_f64(),
                    error
                );
            }
            TaskEvent::AllCompleted {
                total,
                succeeded,
                skipped,
                failed,
                duration,
            } => {
                tracing::info!(
                    "All tasks complete: {}/{} succeeded, {} skipped, {} failed ({:.1}s)",
                    succeeded,
                    total,
                    skipped,
                    failed,
                    duration.as_secs_f64()
                );
            }
        }
    }
}

/// Reporter that collects events for later inspection (useful for testing)
#[derive(Debug, Default)]
pub struct CollectingReporter {
    events: Mutex<Vec<TaskEvent>>,
}

impl CollectingReporter {
    fn lock(&self) -> MutexGuard<'_, Vec<TaskEvent>> {
        self.events.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Get all collected events
    pub fn events(&self) -> Vec<TaskEvent> {
        self.lock().clone()
    }

    /// Highest number of tasks running at once, replayed from event order
    pub fn max_concurrency(&self) -> usize {
        let mut running = 0usize;
        let mut max = 0;
        for event in self.lock().iter() {
            if matches!(event, TaskEvent::Started { .. }) {
                running += 1;
                max = max.max(running);
            } else if event.is_finish() {
                running = running.saturating_sub(1);
            }
        }
        max
    }
}

impl TaskReporter for CollectingReporter {
    fn report(&self, event: &TaskEvent) {
        self.lock().push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started(task: &str) -> TaskEvent {
        TaskEvent::Started {
            task: task.to_string(),
            command: "pg_dump app".to_string(),
        }
    }

    fn completed(task: &str) -> TaskEvent {
        TaskEvent::Completed {
            task: task.to_string(),
            duration: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_collecting_reporter() {
        let reporter = CollectingReporter::default();
        reporter.report(&started("db"));
        reporter.report(&completed("db"));

        let events = reporter.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].task(), Some("db"));
        assert!(events[1].is_finish());
    }

    #[test]
    fn test_max_concurrency() {
        let reporter = CollectingReporter::default();
        for event in [
            started("a"),
            started("b"),
            completed("a"),
            started("c"),
            TaskEvent::Skipped {
                task: "b".to_string(),
            },
            completed("c"),
        ] {
            reporter.report(&event);
        }
        assert_eq!(reporter.max_concurrency(), 2);
    }

    #[test]
    fn test_tracing_reporter() {
        let reporter = TracingReporter;
        reporter.report(&started("db"));
        reporter.report(&TaskEvent::Failed {
            task: "db".to_string(),
            status: TaskStatus::Timeout,
            duration: Duration::from_millis(30),
            error: "command timed out".to_string(),
        });
        reporter.report(&TaskEvent::AllCompleted {
            total: 1,
            succeeded: 0,
            skipped: 0,
            failed: 1,
            duration: Duration::from_secs(1),
        });
    }
}
