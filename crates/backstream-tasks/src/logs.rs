//! Line-oriented capture of command stderr

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;
use tracing::info;

/// Shared buffer of captured log lines
#[derive(Debug, Clone, Default)]
pub struct LogCollector {
    lines: Arc<Mutex<Vec<String>>>,
}

impl LogCollector {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<String>> {
        self.lines.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append a line
    pub fn push(&self, line: impl Into<String>) {
        self.lock().push(line.into());
    }

    /// Snapshot of the captured lines
    pub fn lines(&self) -> Vec<String> {
        self.lock().clone()
    }

    /// Read `reader` line by line until EOF, logging each line under `task`.
    ///
    /// Invalid UTF-8 is replaced rather than dropped; a trailing line without
    /// a newline is kept.
    pub fn collect<R>(&self, task: String, reader: R) -> JoinHandle<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let collector = self.clone();
        tokio::spawn(async move {
            let mut segments = BufReader::new(reader).split(b'\n');
            while let Ok(Some(segment)) = segments.next_segment().await {
                let line = String::from_utf8_lossy(&segment);
                let line = line.trim_end_matches('\r');
                info!(task = %task, "{}", line);
                collector.push(line);
            }
        })
    }
}
