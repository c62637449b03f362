//! Backup task: run a command and stream its stdout to every due destination

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use backstream_core::config::{
    TaskConfig, DEFAULT_CHUNK_BUFFER, DEFAULT_CHUNK_SIZE, DEFAULT_TIMEOUT,
};
use backstream_stores::stream::{fanout, ChunkWriter, StreamAbort};
use backstream_stores::{UploadCompletion, DEFAULT_PART_CONCURRENCY};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::destination::Destination;
use crate::error::{SetupError, TaskError, TaskErrorKind, TaskErrors};
use crate::logs::LogCollector;
use crate::result::{TaskResult, TaskStatus};

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Streaming settings shared by every task of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskOptions {
    /// Size of each chunk and uploaded part
    pub chunk_size: usize,
    /// Chunks buffered per destination
    pub chunk_buffer: usize,
    /// Part uploads running at once per destination
    pub part_concurrency: usize,
}

impl Default for TaskOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_buffer: DEFAULT_CHUNK_BUFFER,
            part_concurrency: DEFAULT_PART_CONCURRENCY,
        }
    }
}

/// A named command plus the destinations receiving its output
#[derive(Debug)]
pub struct Task {
    /// Unique task name
    pub name: String,
    /// Argv vector; the first element is the program
    pub command: Vec<String>,
    /// Working directory, the current one when unset
    pub cwd: Option<PathBuf>,
    /// Variables added to the inherited environment
    pub env: HashMap<String, String>,
    /// Deadline for the command
    pub timeout: Duration,
    /// Size of each chunk
    pub chunk_size: usize,
    /// Chunks buffered per destination
    pub chunk_buffer: usize,
    /// Storage targets
    pub destinations: Vec<Destination>,
}

enum Outcome {
    Skipped,
    Done,
}

impl Task {
    /// Create a task with default settings and no destination
    pub fn new<I, S>(name: impl Into<String>, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            command: command.into_iter().map(Into::into).collect(),
            cwd: None,
            env: HashMap::new(),
            timeout: DEFAULT_TIMEOUT,
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_buffer: DEFAULT_CHUNK_BUFFER,
            destinations: Vec::new(),
        }
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_chunking(mut self, chunk_size: usize, chunk_buffer: usize) -> Self {
        self.chunk_size = chunk_size;
        self.chunk_buffer = chunk_buffer;
        self
    }

    pub fn with_destination(mut self, destination: Destination) -> Self {
        self.destinations.push(destination);
        self
    }

    /// Build a task from its configuration
    pub async fn from_config(
        name: &str,
        config: &TaskConfig,
        options: &TaskOptions,
    ) -> Result<Self, SetupError> {
        if config.command.is_empty() {
            return Err(SetupError::EmptyCommand {
                task: name.to_string(),
            });
        }
        if config.destination.is_empty() {
            return Err(SetupError::NoDestination {
                task: name.to_string(),
            });
        }

        let timeout = config
            .timeout_duration()
            .map_err(|message| SetupError::InvalidTimeout {
                task: name.to_string(),
                message,
            })?;

        let mut task = Task::new(name, config.command.iter().cloned())
            .with_timeout(timeout)
            .with_chunking(options.chunk_size, options.chunk_buffer);
        task.cwd = config.cwd.clone();
        task.env = config.env.clone();

        for destination in &config.destination {
            task.destinations
                .push(Destination::from_config(destination, options.part_concurrency).await);
        }
        Ok(task)
    }

    /// The command as a shell-quoted string
    pub fn command_string(&self) -> String {
        self.command
            .iter()
            .map(|arg| shell_quote(arg))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Working directory the command runs in
    pub fn actual_cwd(&self) -> PathBuf {
        match &self.cwd {
            Some(cwd) => cwd.clone(),
            None => std::env::current_dir().unwrap_or_default(),
        }
    }

    /// Run the task once, stamping artifacts with `now`
    pub async fn run(self: Arc<Self>, now: DateTime<Utc>) -> TaskResult {
        let start = Instant::now();
        let logs = LogCollector::new();

        info!(task = %self.name, command = %self.command_string(), "running task");
        let outcome = self.execute(now, &logs).await;
        let duration = start.elapsed();

        let mut lines = logs.lines();
        let (status, errors) = match outcome {
            Ok(Outcome::Skipped) => {
                info!(task = %self.name, "no destination due, skipped");
                lines.push("SKIPPED".to_string());
                (TaskStatus::Skipped, None)
            }
            Ok(Outcome::Done) => {
                info!(task = %self.name, duration_ms = duration.as_millis() as u64, "task succeeded");
                lines.push("DONE".to_string());
                (TaskStatus::Success, None)
            }
            Err(errors) => {
                warn!(task = %self.name, error = %errors, "task failed");
                lines.push(format!("ERROR: {}", errors));
                let status = if errors.has_kind(TaskErrorKind::CommandTimeout) {
                    TaskStatus::Timeout
                } else {
                    TaskStatus::Failed
                };
                (status, Some(errors))
            }
        };

        TaskResult {
            status,
            task: self,
            logs: lines,
            errors,
            duration,
        }
    }

    async fn execute(&self, now: DateTime<Utc>, logs: &LogCollector) -> Result<Outcome, TaskErrors> {
        let due = self.due_destinations(now).await?;
        if due.is_empty() {
            return Ok(Outcome::Skipped);
        }

        let (mut writer, readers) = fanout(self.chunk_size, self.chunk_buffer, due.len());
        let mut completions = Vec::with_capacity(due.len());
        let mut errors = TaskErrors::new();

        for (destination, reader) in due.into_iter().zip(readers) {
            match destination.start(reader, now).await {
                Ok(completion) => completions.push((destination.label(), completion)),
                Err(e) => {
                    errors.push(
                        TaskError::handler(format!("{}: {}", destination.label(), e))
                            .with_source(e),
                    );
                    break;
                }
            }
        }

        if errors.is_empty() {
            match self.run_command(&mut writer, logs).await {
                Ok(()) => {
                    if let Err(e) = writer.close().await {
                        errors.push(TaskError::handler(e.to_string()).with_source(e));
                    }
                }
                Err(command_errors) => errors.extend(command_errors),
            }
        }

        if !writer.is_closed() {
            if let Err(e) = writer.abort(StreamAbort::new(errors.to_string())).await {
                errors.push(TaskError::handler(e.to_string()).with_source(e));
            }
        }

        errors.extend(self.await_completions(completions).await);
        if errors.is_empty() {
            Ok(Outcome::Done)
        } else {
            Err(errors)
        }
    }

    async fn due_destinations(&self, now: DateTime<Utc>) -> Result<Vec<&Destination>, TaskErrors> {
        let checks = join_all(
            self.destinations
                .iter()
                .map(|destination| async move { (destination, destination.last_run().await) }),
        )
        .await;

        let mut due = Vec::new();
        let mut errors = TaskErrors::new();
        for (destination, last_run) in checks {
            match last_run {
                Ok(last_run) => {
                    let next = destination.next_run(last_run, now);
                    debug!(
                        task = %self.name,
                        destination = %destination.label(),
                        last_run = ?last_run,
                        next_run = %next,
                        "checked destination"
                    );
                    if destination.is_due(last_run, now) {
                        due.push(destination);
                    }
                }
                Err(e) => errors.push(
                    TaskError::handler(format!("{}: {}", destination.label(), e)).with_source(e),
                ),
            }
        }

        if errors.is_empty() {
            Ok(due)
        } else {
            Err(errors)
        }
    }

    async fn await_completions(&self, completions: Vec<(String, UploadCompletion)>) -> TaskErrors {
        let outcomes = join_all(
            completions
                .into_iter()
                .map(|(label, completion)| async move { (label, completion.wait().await) }),
        )
        .await;

        let mut errors = TaskErrors::new();
        for (label, outcome) in outcomes {
            match outcome {
                Ok(upload) => info!(
                    task = %self.name,
                    destination = %label,
                    key = %upload.key,
                    parts = upload.parts,
                    bytes = upload.bytes,
                    "artifact stored"
                ),
                Err(e) => {
                    errors.push(TaskError::handler(format!("{}: {}", label, e)).with_source(e))
                }
            }
        }
        errors
    }

    async fn run_command(
        &self,
        writer: &mut ChunkWriter,
        logs: &LogCollector,
    ) -> Result<(), TaskErrors> {
        let (program, args) = self.command.split_first().ok_or_else(|| {
            TaskErrors::from(TaskError::new(TaskErrorKind::CommandStart, "empty command"))
        })?;

        let mut command = Command::new(program);
        command
            .args(args)
            .envs(&self.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &self.cwd {
            command.current_dir(cwd);
        }

        let mut child = command.spawn().map_err(|e| {
            TaskErrors::from(
                TaskError::new(TaskErrorKind::CommandStart, format!("{}: {}", program, e))
                    .with_source(e),
            )
        })?;
        debug!(task = %self.name, pid = ?child.id(), "command started");

        let stdout = child.stdout.take();
        let mut stderr = child
            .stderr
            .take()
            .map(|stderr| logs.collect(self.name.clone(), stderr));

        // A background process can hold stderr open; its collection counts
        // against the deadline.
        let mut errors = TaskErrors::new();
        let finished = tokio::time::timeout(self.timeout, async {
            let command_errors = pump_and_wait(&mut child, stdout, &mut *writer).await;
            if let Some(handle) = stderr.as_mut() {
                let _ = handle.await;
            }
            command_errors
        })
        .await;

        match finished {
            Ok(command_errors) => errors.extend(command_errors),
            Err(_) => {
                warn!(task = %self.name, timeout = ?self.timeout, "command timed out, killing");
                errors.push(TaskError::new(
                    TaskErrorKind::CommandTimeout,
                    format!("exceeded timeout of {:?}", self.timeout),
                ));
                if let Some(handle) = stderr {
                    handle.abort();
                }
                if let Err(e) = kill_if_running(&mut child).await {
                    errors.push(
                        TaskError::new(TaskErrorKind::CommandKill, e.to_string()).with_source(e),
                    );
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Kill the child unless it has already been reaped
async fn kill_if_running(child: &mut Child) -> std::io::Result<()> {
    match child.try_wait() {
        Ok(Some(_)) => Ok(()),
        _ => child.kill().await,
    }
}

/// Copy stdout into the stream, then wait for the process to exit.
///
/// After a stream write fails the remaining output is drained and discarded
/// so the process can finish.
async fn pump_and_wait<R>(
    child: &mut Child,
    stdout: Option<R>,
    writer: &mut ChunkWriter,
) -> TaskErrors
where
    R: AsyncRead + Unpin,
{
    let mut errors = TaskErrors::new();
    let mut write_failed = false;

    if let Some(mut stdout) = stdout {
        let mut buffer = vec![0u8; READ_BUFFER_SIZE];
        loop {
            let read = match stdout.read(&mut buffer).await {
                Ok(0) => break,
                Ok(read) => read,
                Err(e) => {
                    errors.push(
                        TaskError::new(
                            TaskErrorKind::CommandFailed,
                            format!("failed to read output: {}", e),
                        )
                        .with_source(e),
                    );
                    break;
                }
            };

            if write_failed {
                continue;
            }
            if let Err(e) = writer.write(&buffer[..read]).await {
                write_failed = true;
                errors.push(TaskError::handler(e.to_string()).with_source(e));
            }
        }
    }

    match child.wait().await {
        Ok(status) if status.success() => {}
        Ok(status) => errors.push(TaskError::new(
            TaskErrorKind::CommandFailed,
            status.to_string(),
        )),
        Err(e) => errors.push(
            TaskError::new(TaskErrorKind::CommandFailed, e.to_string()).with_source(e),
        ),
    }
    errors
}

/// Quote an argument for a POSIX shell when it contains special characters
fn shell_quote(arg: &str) -> String {
    let safe = |c: char| c.is_ascii_alphanumeric() || "@%+=:,./_-".contains(c);
    if !arg.is_empty() && arg.chars().all(safe) {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', "'\"'\"'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backstream_core::config::{DestinationConfig, S3Config};
    use backstream_core::Schedule;
    use backstream_stores::{MemoryStorage, MultipartUploader, StorageTarget};
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2021, 8, 22, 12, 0, 0).unwrap()
    }

    const KEY: &str = "db/20210822120000.sql";

    fn destination(storage: &Arc<MemoryStorage>, prefix: &str, schedule: &str) -> Destination {
        let schedule = if schedule.is_empty() {
            Schedule::default()
        } else {
            Schedule::parse(schedule).unwrap()
        };
        Destination::new(
            schedule,
            MultipartUploader::new(storage.clone(), StorageTarget::new("bucket", prefix, ".sql")),
        )
    }

    fn shell(name: &str, script: &str) -> Task {
        Task::new(name, ["sh", "-c", script])
            .with_timeout(Duration::from_secs(5))
            .with_chunking(4, 2)
    }

    #[test]
    fn test_command_string() {
        let task = Task::new(
            "test",
            ["bash", "-c", "echo 'hello world' \"${PWD:-/tmp}\" | bzip2"],
        );
        assert_eq!(
            task.command_string(),
            "bash -c 'echo '\"'\"'hello world'\"'\"' \"${PWD:-/tmp}\" | bzip2'"
        );
        assert_eq!(
            Task::new("test", ["echo", "hello world"]).command_string(),
            "echo 'hello world'"
        );
        assert_eq!(Task::new("test", ["printf", ""]).command_string(), "printf ''");
    }

    #[test]
    fn test_defaults() {
        let task = Task::new("test", ["echo", "hello"]);
        assert_eq!(task.timeout, DEFAULT_TIMEOUT);
        assert_eq!(task.actual_cwd(), std::env::current_dir().unwrap());

        let task = task.with_cwd("/srv");
        assert_eq!(task.actual_cwd(), PathBuf::from("/srv"));
    }

    #[tokio::test]
    async fn test_success_streams_stdout() {
        let storage = Arc::new(MemoryStorage::new());
        let task = shell("db", "printf 'backup-data'; echo progress >&2")
            .with_destination(destination(&storage, "db/", "@daily"));

        let result = Arc::new(task).run(now()).await;

        assert_eq!(result.status, TaskStatus::Success, "{:?}", result.errors);
        assert!(result.errors.is_none());
        assert_eq!(result.logs, vec!["progress", "DONE"]);
        assert_eq!(storage.object("bucket", KEY).unwrap().as_ref(), b"backup-data");
    }

    #[tokio::test]
    async fn test_failing_command() {
        let storage = Arc::new(MemoryStorage::new());
        let task = shell("db", "printf partial; echo hello >&2; exit 1")
            .with_destination(destination(&storage, "db/", ""));

        let result = Arc::new(task).run(now()).await;

        assert_eq!(result.status, TaskStatus::Failed);
        let errors = result.errors.unwrap();
        assert!(errors.has_kind(TaskErrorKind::CommandFailed));
        assert!(errors.has_kind(TaskErrorKind::Handler));
        assert_eq!(result.logs[0], "hello");
        assert!(result.logs.last().unwrap().starts_with("ERROR: "));
        assert_eq!(storage.aborted_uploads().len(), 1);
        assert!(storage.object("bucket", KEY).is_none());
    }

    #[tokio::test]
    async fn test_timeout() {
        let storage = Arc::new(MemoryStorage::new());
        let task = Task::new("slow", ["sleep", "1"])
            .with_timeout(Duration::from_millis(30))
            .with_destination(destination(&storage, "db/", ""));

        let started = Instant::now();
        let result = Arc::new(task).run(now()).await;

        assert_eq!(result.status, TaskStatus::Timeout);
        assert!(result.errors.unwrap().has_kind(TaskErrorKind::CommandTimeout));
        assert!(started.elapsed() < Duration::from_millis(900));
        assert_eq!(storage.aborted_uploads().len(), 1);
    }

    #[tokio::test]
    async fn test_timeout_covers_inherited_stderr() {
        let storage = Arc::new(MemoryStorage::new());
        let task = shell("bg", "printf data; sleep 3 >/dev/null &")
            .with_timeout(Duration::from_millis(300))
            .with_destination(destination(&storage, "db/", ""));

        let started = Instant::now();
        let result = Arc::new(task).run(now()).await;

        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(result.status, TaskStatus::Timeout);
        let errors = result.errors.unwrap();
        assert!(errors.has_kind(TaskErrorKind::CommandTimeout));
        assert!(!errors.has_kind(TaskErrorKind::CommandKill));
        assert_eq!(storage.aborted_uploads().len(), 1);
        assert!(storage.object("bucket", KEY).is_none());
    }

    #[tokio::test]
    async fn test_command_and_abort_failures_are_both_reported() {
        let storage = Arc::new(MemoryStorage::new().fail_abort("abort denied"));
        let task = shell("db", "printf partial; exit 2")
            .with_destination(destination(&storage, "db/", ""));

        let result = Arc::new(task).run(now()).await;

        assert_eq!(result.status, TaskStatus::Failed);
        let errors = result.errors.unwrap();
        assert!(errors.has_kind(TaskErrorKind::CommandFailed));
        let handler = errors
            .iter()
            .find(|error| error.kind == TaskErrorKind::Handler)
            .expect("handler error");
        assert!(handler.to_string().contains("abort denied"), "{}", handler);
        assert!(result.logs.last().unwrap().contains("abort denied"));
        assert!(storage.object("bucket", KEY).is_none());
    }

    #[tokio::test]
    async fn test_skipped_when_nothing_due() {
        let storage = Arc::new(
            MemoryStorage::new().with_object("bucket", "db/20210822000000.sql", "old"),
        );
        let marker = TempDir::new().unwrap();
        let script = format!("touch {}/ran", marker.path().display());
        let task = shell("db", &script).with_destination(destination(&storage, "db/", "@daily"));

        let result = Arc::new(task).run(now()).await;

        assert_eq!(result.status, TaskStatus::Skipped);
        assert_eq!(result.logs, vec!["SKIPPED"]);
        assert!(!marker.path().join("ran").exists());
        assert_eq!(storage.open_uploads(), 0);
        assert_eq!(storage.keys("bucket").len(), 1);
    }

    #[tokio::test]
    async fn test_fanout_to_every_due_destination() {
        let storage = Arc::new(
            MemoryStorage::new().with_object("bucket", "weekly/20210822000000.sql", "old"),
        );
        let task = shell("db", "printf 'nightly dump'")
            .with_destination(destination(&storage, "daily/", "@daily"))
            .with_destination(destination(&storage, "hourly/", "@hourly"))
            .with_destination(destination(&storage, "weekly/", "@weekly"));

        let result = Arc::new(task).run(now()).await;

        assert_eq!(result.status, TaskStatus::Success, "{:?}", result.errors);
        for prefix in ["daily/", "hourly/"] {
            let key = format!("{}20210822120000.sql", prefix);
            assert_eq!(storage.object("bucket", &key).unwrap().as_ref(), b"nightly dump");
        }
        assert!(storage.object("bucket", "weekly/20210822120000.sql").is_none());
    }

    #[tokio::test]
    async fn test_last_run_failure() {
        let storage = Arc::new(MemoryStorage::new().fail_list("throttled"));
        let task = shell("db", "printf data").with_destination(destination(&storage, "db/", ""));

        let result = Arc::new(task).run(now()).await;

        assert_eq!(result.status, TaskStatus::Failed);
        let errors = result.errors.unwrap();
        assert_eq!(errors.len(), 1);
        assert!(errors.has_kind(TaskErrorKind::Handler));
    }

    #[tokio::test]
    async fn test_upload_start_failure_skips_command() {
        let good = Arc::new(MemoryStorage::new());
        let bad = Arc::new(MemoryStorage::new().fail_create("access denied"));
        let task = shell("db", "echo ran >&2; printf data")
            .with_destination(destination(&good, "a/", ""))
            .with_destination(destination(&bad, "b/", ""));

        let result = Arc::new(task).run(now()).await;

        assert_eq!(result.status, TaskStatus::Failed);
        assert!(!result.logs.iter().any(|line| line == "ran"));
        assert_eq!(good.aborted_uploads().len(), 1);
        assert_eq!(good.open_uploads(), 0);
    }

    #[tokio::test]
    async fn test_command_start_failure() {
        let storage = Arc::new(MemoryStorage::new());
        let task = Task::new("db", ["/nonexistent/backstream-test-binary"])
            .with_destination(destination(&storage, "db/", ""));

        let result = Arc::new(task).run(now()).await;

        assert_eq!(result.status, TaskStatus::Failed);
        assert!(result.errors.unwrap().has_kind(TaskErrorKind::CommandStart));
        assert_eq!(storage.aborted_uploads().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_output_fails() {
        let storage = Arc::new(MemoryStorage::new());
        let task = Task::new("db", ["true"]).with_destination(destination(&storage, "db/", ""));

        let result = Arc::new(task).run(now()).await;

        assert_eq!(result.status, TaskStatus::Failed);
        let errors = result.errors.unwrap();
        assert!(errors.has_kind(TaskErrorKind::Handler));
        assert!(errors.to_string().contains("No data"));
    }

    #[tokio::test]
    async fn test_env_and_cwd() {
        let storage = Arc::new(MemoryStorage::new());
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("payload.txt"), "from cwd").unwrap();

        let task = shell("db", "printf '%s ' \"$BACKSTREAM_TEST\"; cat payload.txt")
            .with_env("BACKSTREAM_TEST", "from env")
            .with_cwd(dir.path())
            .with_destination(destination(&storage, "db/", ""));

        let result = Arc::new(task).run(now()).await;

        assert_eq!(result.status, TaskStatus::Success, "{:?}", result.errors);
        assert_eq!(
            storage.object("bucket", KEY).unwrap().as_ref(),
            b"from env from cwd"
        );
    }

    #[tokio::test]
    async fn test_from_config() {
        let config = TaskConfig::new(["pg_dump", "app"])
            .with_timeout("30m")
            .with_env("PGHOST", "db")
            .with_destination(DestinationConfig::s3(
                Schedule::parse("@daily").unwrap(),
                S3Config {
                    bucket: "bucket".to_string(),
                    region: Some("eu-west-1".to_string()),
                    ..Default::default()
                },
            ));

        let task = Task::from_config("app", &config, &TaskOptions::default())
            .await
            .unwrap();
        assert_eq!(task.name, "app");
        assert_eq!(task.timeout, Duration::from_secs(30 * 60));
        assert_eq!(task.chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(task.destinations.len(), 1);

        let bad = TaskConfig::new(["true"]);
        assert!(matches!(
            Task::from_config("bad", &bad, &TaskOptions::default()).await,
            Err(SetupError::NoDestination { .. })
        ));
    }
}
