//! Task error taxonomy

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

/// What went wrong during a task run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskErrorKind {
    /// A destination failed (listing, upload, completion)
    Handler,
    /// The command could not be spawned
    CommandStart,
    /// The command exited unsuccessfully or its output could not be read
    CommandFailed,
    /// The command exceeded its timeout
    CommandTimeout,
    /// The command could not be killed after the timeout
    CommandKill,
}

impl fmt::Display for TaskErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Handler => "destination error",
            Self::CommandStart => "failed to start command",
            Self::CommandFailed => "command failed",
            Self::CommandTimeout => "command timed out",
            Self::CommandKill => "failed to kill command",
        };
        f.write_str(text)
    }
}

/// A single task failure
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct TaskError {
    /// Failure category
    pub kind: TaskErrorKind,
    /// Human readable detail
    pub message: String,
    /// Underlying cause
    #[source]
    pub source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl TaskError {
    /// Create an error without a cause
    pub fn new(kind: TaskErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Destination failure
    pub fn handler(message: impl Into<String>) -> Self {
        Self::new(TaskErrorKind::Handler, message)
    }

    /// Attach the underlying cause
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }
}

/// Every failure of one task run, in the order they happened
#[derive(Debug, Clone, Default)]
pub struct TaskErrors(Vec<TaskError>);

impl TaskErrors {
    /// Empty list
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, error: TaskError) {
        self.0.push(error);
    }

    pub fn extend(&mut self, other: TaskErrors) {
        self.0.extend(other.0);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TaskError> {
        self.0.iter()
    }

    /// Whether any error has the given kind
    pub fn has_kind(&self, kind: TaskErrorKind) -> bool {
        self.0.iter().any(|e| e.kind == kind)
    }
}

impl From<TaskError> for TaskErrors {
    fn from(error: TaskError) -> Self {
        Self(vec![error])
    }
}

impl FromIterator<TaskError> for TaskErrors {
    fn from_iter<I: IntoIterator<Item = TaskError>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a TaskErrors {
    type Item = &'a TaskError;
    type IntoIter = std::slice::Iter<'a, TaskError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for TaskErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, error) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}", error)?;
        }
        Ok(())
    }
}

impl std::error::Error for TaskErrors {}

/// Errors while turning configuration into runnable tasks
#[derive(Debug, Error)]
pub enum SetupError {
    /// The task has no command
    #[error("task '{task}' has an empty command")]
    EmptyCommand { task: String },

    /// The task has no destination
    #[error("task '{task}' has no destination")]
    NoDestination { task: String },

    /// The timeout could not be parsed
    #[error("task '{task}' has an invalid timeout: {message}")]
    InvalidTimeout { task: String, message: String },
}
