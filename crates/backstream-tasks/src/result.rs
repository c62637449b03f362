//! Task run outcomes

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::error::TaskErrors;
use crate::task::Task;

/// Final status of a task run.
///
/// Variants are declared in report order, so the derived ordering puts
/// skipped runs first and timeouts last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// No destination was due
    Skipped,
    /// Every due destination stored the artifact
    Success,
    /// Something failed
    Failed,
    /// The command exceeded its timeout
    Timeout,
}

impl TaskStatus {
    /// Whether this status counts as a successful run
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success | Self::Skipped)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Skipped => "skipped",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one task run
#[derive(Debug, Clone)]
pub struct TaskResult {
    /// Final status
    pub status: TaskStatus,
    /// The task that ran
    pub task: Arc<Task>,
    /// Captured stderr lines followed by a final marker
    pub logs: Vec<String>,
    /// Every failure, when the run did not succeed
    pub errors: Option<TaskErrors>,
    /// Wall-clock duration of the run
    pub duration: Duration,
}

impl TaskResult {
    /// Task name
    pub fn name(&self) -> &str {
        &self.task.name
    }

    /// Whether the run failed or timed out
    pub fn is_failure(&self) -> bool {
        !self.status.is_success()
    }
}

/// Results of one executor run
#[derive(Debug, Clone, Default)]
pub struct TaskResults(Vec<TaskResult>);

impl TaskResults {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, result: TaskResult) {
        self.0.push(result);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TaskResult> {
        self.0.iter()
    }

    /// Sort by status (skipped, success, failed, timeout), then by name
    pub fn sort(&mut self) {
        self.0
            .sort_by(|a, b| a.status.cmp(&b.status).then_with(|| a.name().cmp(b.name())));
    }

    /// Whether any task failed or timed out
    pub fn has_failures(&self) -> bool {
        self.0.iter().any(TaskResult::is_failure)
    }

    /// Number of results with the given status
    pub fn count(&self, status: TaskStatus) -> usize {
        self.0.iter().filter(|r| r.status == status).count()
    }
}

impl FromIterator<TaskResult> for TaskResults {
    fn from_iter<I: IntoIterator<Item = TaskResult>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for TaskResults {
    type Item = TaskResult;
    type IntoIter = std::vec::IntoIter<TaskResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a TaskResults {
    type Item = &'a TaskResult;
    type IntoIter = std::slice::Iter<'a, TaskResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(name: &str, status: TaskStatus) -> TaskResult {
        TaskResult {
            status,
            task: Arc::new(Task::new(name, ["true"])),
            logs: Vec::new(),
            errors: None,
            duration: Duration::ZERO,
        }
    }

    #[test]
    fn test_sort_by_status_then_name() {
        let mut results: TaskResults = [
            result("b", TaskStatus::Timeout),
            result("c", TaskStatus::Failed),
            result("a", TaskStatus::Failed),
            result("z", TaskStatus::Skipped),
            result("m", TaskStatus::Success),
        ]
        .into_iter()
        .collect();
        results.sort();

        let order: Vec<(&str, TaskStatus)> = results.iter().map(|r| (r.name(), r.status)).collect();
        assert_eq!(
            order,
            vec![
                ("z", TaskStatus::Skipped),
                ("m", TaskStatus::Success),
                ("a", TaskStatus::Failed),
                ("c", TaskStatus::Failed),
                ("b", TaskStatus::Timeout),
            ]
        );
    }

    #[test]
    fn test_failures() {
        let mut results = TaskResults::new();
        results.push(result("a", TaskStatus::Success));
        results.push(result("b", TaskStatus::Skipped));
        assert!(!results.has_failures());

        results.push(result("c", TaskStatus::Timeout));
        assert!(results.has_failures());
        assert_eq!(results.count(TaskStatus::Timeout), 1);
    }
}
