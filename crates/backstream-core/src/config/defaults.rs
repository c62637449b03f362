//! Default configuration values

use std::time::Duration;

/// Timeout applied to tasks that do not set one
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Size of each streamed chunk (and each uploaded part)
pub const DEFAULT_CHUNK_SIZE: usize = 10 << 20;

/// Smallest chunk size accepted for multipart uploads
pub const MIN_CHUNK_SIZE: usize = 5 << 20;

/// Number of chunks buffered between the command and each upload
pub const DEFAULT_CHUNK_BUFFER: usize = 8;

/// Number of tasks run at the same time
pub const DEFAULT_PARALLEL_TASKS: usize = 2;

/// Default PID file location
pub const DEFAULT_PID_FILE: &str = "/var/run/backstream.pid";

/// Layout of the timestamp embedded in object keys
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Get list of supported config file extensions
pub fn config_file_extensions() -> Vec<&'static str> {
    vec!["toml", "json", "yaml", "yml"]
}

/// Example configuration template
pub const DEFAULT_CONFIG_TEMPLATE: &str = r#"# backstream configuration

[backup_mysql_database]
command = ["/bin/sh", "-c", "mysqldump --single-transaction my_database | bzip2"]
timeout = "30m"
    [[backup_mysql_database.destination]]
    type = "s3"
    schedule = "30 4 * * *"
        [backup_mysql_database.destination.s3]
        region = "eu-west-1"
        profile = "backups"
        bucket = "example-bucket"
        prefix = "my_database/daily/"
        suffix = "-my_database.sql.bz2"
"#;
