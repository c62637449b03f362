//! Backstream Tasks - backup task execution engine
//!
//! This crate runs backup commands and streams their output to every due
//! destination, collects one result per task, and executes many tasks with
//! bounded parallelism.

pub mod destination;
pub mod error;
pub mod executor;
pub mod logs;
pub mod reporter;
pub mod result;
pub mod task;

pub use destination::Destination;
pub use error::{SetupError, TaskError, TaskErrorKind, TaskErrors};
pub use executor::TaskExecutor;
pub use logs::LogCollector;
pub use reporter::{CollectingReporter, TaskEvent, TaskReporter, TracingReporter};
pub use result::{TaskResult, TaskResults, TaskStatus};
pub use task::{Task, TaskOptions};
