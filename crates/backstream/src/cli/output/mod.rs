//! Output formatting utilities

use backstream_tasks::TaskStatus;
use console::{style, Style};

/// Print a success message
pub fn success(message: &str) {
    println!("{} {}", style("✓").green().bold(), message);
}

/// Print an error message
pub fn error(message: &str) {
    eprintln!("{} {}", style("✗").red().bold(), message);
}

/// Print a warning message
pub fn warning(message: &str) {
    println!("{} {}", style("!").yellow().bold(), message);
}

/// Create a styled header
pub fn header(text: &str) -> String {
    style(text).bold().to_string()
}

/// Create a styled key-value line
pub fn key_value(key: &str, value: &str) -> String {
    format!("  {}: {}", style(key).dim(), value)
}

/// Style for a task status
pub fn status_style(status: TaskStatus) -> Style {
    match status {
        TaskStatus::Skipped => Style::new().dim(),
        TaskStatus::Success => Style::new().green().bold(),
        TaskStatus::Failed => Style::new().red().bold(),
        TaskStatus::Timeout => Style::new().yellow().bold(),
    }
}

/// Style for destinations and paths
pub fn path_style() -> Style {
    Style::new().cyan()
}
