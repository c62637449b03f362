//! Backstream Core - configuration and scheduling primitives
//!
//! This crate provides the configuration model for backup tasks, the loader
//! and validation rules for configuration files, the cron-style schedule
//! evaluator used to decide whether a backup is due, and the shared error
//! types.

pub mod config;
pub mod duration;
pub mod error;
pub mod schedule;

pub use config::{
    load_config, validate_config, Config, DestinationConfig, DestinationKind, S3Config,
    S3Credentials, TaskConfig,
};
pub use duration::parse_duration;
pub use error::{BackstreamError, ConfigError, Result, ScheduleError};
pub use schedule::Schedule;
