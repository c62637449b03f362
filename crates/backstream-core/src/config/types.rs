//! Configuration types

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::time::Duration;

use crate::duration::parse_duration;
use crate::schedule::Schedule;

use super::defaults::DEFAULT_TIMEOUT;

/// Main configuration: backup tasks keyed by their unique name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Config {
    /// Task definitions by name
    pub tasks: BTreeMap<String, TaskConfig>,
}

impl Config {
    /// Look up a task by name
    pub fn task(&self, name: &str) -> Option<&TaskConfig> {
        self.tasks.get(name)
    }

    /// Number of configured tasks
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether no task is configured
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// A single backup task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Command to execute, as an argv vector
    pub command: Vec<String>,

    /// Working directory (defaults to the current directory)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,

    /// Environment variables added to the inherited environment, given as a
    /// table or as a list of `KEY=VALUE` strings
    #[serde(
        default,
        deserialize_with = "deserialize_env",
        skip_serializing_if = "HashMap::is_empty"
    )]
    pub env: HashMap<String, String>,

    /// Timeout such as "30m" or "1h30m" (defaults to 10 minutes)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,

    /// Where the command output is stored
    #[serde(default, alias = "destinations")]
    pub destination: Vec<DestinationConfig>,
}

impl TaskConfig {
    /// Create a task configuration for a command
    pub fn new<I, S>(command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into_iter().map(Into::into).collect(),
            cwd: None,
            env: HashMap::new(),
            timeout: None,
            destination: Vec::new(),
        }
    }

    /// Set the working directory
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Add an environment variable
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set the timeout string
    pub fn with_timeout(mut self, timeout: impl Into<String>) -> Self {
        self.timeout = Some(timeout.into());
        self
    }

    /// Add a destination
    pub fn with_destination(mut self, destination: DestinationConfig) -> Self {
        self.destination.push(destination);
        self
    }

    /// Effective timeout, falling back to [`DEFAULT_TIMEOUT`]
    pub fn timeout_duration(&self) -> Result<Duration, String> {
        match &self.timeout {
            Some(timeout) => parse_duration(timeout),
            None => Ok(DEFAULT_TIMEOUT),
        }
    }
}

fn deserialize_env<'de, D>(deserializer: D) -> Result<HashMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum EnvForm {
        Table(HashMap<String, String>),
        List(Vec<String>),
    }

    match EnvForm::deserialize(deserializer)? {
        EnvForm::Table(env) => Ok(env),
        EnvForm::List(entries) => entries
            .into_iter()
            .map(|entry| match entry.split_once('=') {
                Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
                _ => Err(serde::de::Error::custom(format!(
                    "invalid env entry '{}': expected KEY=VALUE",
                    entry
                ))),
            })
            .collect(),
    }
}

/// A schedule-gated storage target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DestinationConfig {
    /// When a new artifact is due
    pub schedule: Schedule,

    /// Backend-specific settings, tagged by `type`
    #[serde(flatten)]
    pub kind: DestinationKind,
}

/// Supported destination backends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DestinationKind {
    /// Amazon S3 or an S3-compatible service
    S3 {
        /// Bucket and credentials
        s3: S3Config,
    },
}

impl DestinationKind {
    /// Short name of the backend type
    pub fn type_name(&self) -> &'static str {
        match self {
            DestinationKind::S3 { .. } => "s3",
        }
    }
}

/// S3 destination settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct S3Config {
    /// Bucket name
    pub bucket: String,

    /// Key prefix placed before the timestamp
    #[serde(default)]
    pub prefix: String,

    /// Key suffix placed after the timestamp
    #[serde(default)]
    pub suffix: String,

    /// AWS region (falls back to the environment)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    /// Static credentials
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<S3Credentials>,

    /// Named profile from the shared AWS config files
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
}

/// Static S3 credentials
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct S3Credentials {
    /// Access key id
    pub access_key_id: String,

    /// Secret access key
    pub secret_access_key: String,

    /// Optional session token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
}

impl std::fmt::Debug for S3Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl DestinationConfig {
    /// Create an S3 destination
    pub fn s3(schedule: Schedule, s3: S3Config) -> Self {
        Self {
            schedule,
            kind: DestinationKind::S3 { s3 },
        }
    }
}
