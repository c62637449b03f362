//! Configuration validation

use tracing::debug;

use crate::duration::parse_duration;
use crate::error::{ConfigError, Result};

use super::types::{Config, DestinationKind, S3Config, TaskConfig};

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    debug!("validating configuration");
    if config.is_empty() {
        return Err(ConfigError::invalid("tasks", "no task is configured").into());
    }

    for (name, task) in &config.tasks {
        validate_task(name, task)?;
    }
    debug!("configuration validation passed");
    Ok(())
}

fn validate_task(name: &str, task: &TaskConfig) -> Result<()> {
    if name.trim().is_empty() {
        return Err(ConfigError::invalid("tasks", "task name cannot be empty").into());
    }

    if task.command.is_empty() || task.command[0].trim().is_empty() {
        return Err(ConfigError::invalid(
            format!("{}.command", name),
            "command cannot be empty",
        )
        .into());
    }

    if let Some(timeout) = &task.timeout {
        parse_duration(timeout)
            .map_err(|message| ConfigError::invalid(format!("{}.timeout", name), message))?;
    }

    if task.destination.is_empty() {
        return Err(ConfigError::invalid(
            format!("{}.destination", name),
            "at least one destination is required",
        )
        .into());
    }

    for (index, destination) in task.destination.iter().enumerate() {
        let field = format!("{}.destination[{}]", name, index);
        match &destination.kind {
            DestinationKind::S3 { s3 } => validate_s3(&field, s3)?,
        }
    }

    Ok(())
}

fn validate_s3(field: &str, s3: &S3Config) -> Result<()> {
    if s3.bucket.trim().is_empty() {
        return Err(ConfigError::invalid(
            format!("{}.s3.bucket", field),
            "bucket cannot be empty",
        )
        .into());
    }

    if s3.credentials.is_some() && s3.profile.is_some() {
        return Err(ConfigError::invalid(
            format!("{}.s3", field),
            "set either credentials or profile, not both",
        )
        .into());
    }

    if let Some(credentials) = &s3.credentials {
        if credentials.access_key_id.is_empty() || credentials.secret_access_key.is_empty() {
            return Err(ConfigError::invalid(
                format!("{}.s3.credentials", field),
                "access_key_id and secret_access_key are required",
            )
            .into());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::{DestinationConfig, S3Credentials};
    use crate::error::BackstreamError;
    use crate::schedule::Schedule;

    fn s3(bucket: &str) -> S3Config {
        S3Config {
            bucket: bucket.to_string(),
            ..Default::default()
        }
    }

    fn config_with(task: TaskConfig) -> Config {
        let mut config = Config::default();
        config.tasks.insert("db".to_string(), task);
        config
    }

    fn valid_task() -> TaskConfig {
        TaskConfig::new(["echo", "hello"])
            .with_destination(DestinationConfig::s3(Schedule::default(), s3("bucket")))
    }

    fn invalid_field(err: BackstreamError) -> String {
        match err {
            BackstreamError::Config(ConfigError::InvalidValue { field, .. }) => field,
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(validate_config(&config_with(valid_task())).is_ok());
    }

    #[test]
    fn test_empty_config() {
        let err = validate_config(&Config::default()).unwrap_err();
        assert_eq!(invalid_field(err), "tasks");
    }

    #[test]
    fn test_empty_command() {
        let mut task = valid_task();
        task.command.clear();
        let err = validate_config(&config_with(task)).unwrap_err();
        assert_eq!(invalid_field(err), "db.command");
    }

    #[test]
    fn test_bad_timeout() {
        let task = valid_task().with_timeout("soon");
        let err = validate_config(&config_with(task)).unwrap_err();
        assert_eq!(invalid_field(err), "db.timeout");

        let task = valid_task().with_timeout("1h30m");
        assert!(validate_config(&config_with(task)).is_ok());
    }

    #[test]
    fn test_missing_destination() {
        let task = TaskConfig::new(["true"]);
        let err = validate_config(&config_with(task)).unwrap_err();
        assert_eq!(invalid_field(err), "db.destination");
    }

    #[test]
    fn test_empty_bucket() {
        let task = TaskConfig::new(["true"])
            .with_destination(DestinationConfig::s3(Schedule::default(), s3("")));
        let err = validate_config(&config_with(task)).unwrap_err();
        assert_eq!(invalid_field(err), "db.destination[0].s3.bucket");
    }

    #[test]
    fn test_credentials_and_profile_conflict() {
        let mut target = s3("bucket");
        target.profile = Some("backups".to_string());
        target.credentials = Some(S3Credentials {
            access_key_id: "id".to_string(),
            secret_access_key: "secret".to_string(),
            session_token: None,
        });
        let task = TaskConfig::new(["true"])
            .with_destination(DestinationConfig::s3(Schedule::default(), target));

        let err = validate_config(&config_with(task)).unwrap_err();
        assert_eq!(invalid_field(err), "db.destination[0].s3");
    }
}
