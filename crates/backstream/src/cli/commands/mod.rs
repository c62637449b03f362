//! CLI commands

mod completions;
mod run;
mod status;
mod validate;

pub use completions::CompletionsCommand;
pub use run::{RunCommand, TasksFailed};
pub use status::StatusCommand;
pub use validate::ValidateCommand;

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use backstream_core::Config;
use backstream_tasks::{Task, TaskOptions};
use tracing::debug;

/// Load and validate the configuration file
pub(crate) fn load_config(path: &Path) -> anyhow::Result<Config> {
    let config = backstream_core::load_config(path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))?;
    debug!(path = %path.display(), tasks = config.len(), "configuration loaded");
    Ok(config)
}

/// Build runnable tasks in configuration order
pub(crate) async fn build_tasks(
    config: &Config,
    options: &TaskOptions,
) -> anyhow::Result<Vec<Arc<Task>>> {
    let mut tasks = Vec::with_capacity(config.len());
    for (name, task_config) in &config.tasks {
        let task = Task::from_config(name, task_config, options)
            .await
            .with_context(|| format!("failed to set up task '{}'", name))?;
        tasks.push(Arc::new(task));
    }
    Ok(tasks)
}
