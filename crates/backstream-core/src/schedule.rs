//! Schedule parsing and next occurrence calculation.
//!
//! Supports standard 5-field cron expressions, extended 6-field cron (with
//! seconds) and the usual shortcuts (`@daily`, `@weekly`, ...). All
//! evaluation happens in UTC.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule as CronSchedule;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ScheduleError;

/// A parsed cron-style schedule.
///
/// `Schedule::default()` is the unset schedule: it renders as an empty string
/// and is always due.
#[derive(Debug, Clone, Default)]
pub struct Schedule {
    expression: Option<String>,
    cron: Option<Box<CronSchedule>>,
}

impl Schedule {
    /// Parse a cron expression or shortcut.
    pub fn parse(expression: &str) -> Result<Self, ScheduleError> {
        let trimmed = expression.trim();
        let cron_expr = if trimmed.starts_with('@') {
            Self::expand_shortcut(trimmed)?
        } else {
            Self::normalize_fields(trimmed)?
        };

        let cron = CronSchedule::from_str(&cron_expr).map_err(|e| invalid(expression, e))?;

        Ok(Self {
            expression: Some(expression.to_string()),
            cron: Some(Box::new(cron)),
        })
    }

    fn expand_shortcut(expression: &str) -> Result<String, ScheduleError> {
        let expanded = match expression.to_lowercase().as_str() {
            "@yearly" | "@annually" => "0 0 0 1 1 *",
            "@monthly" => "0 0 0 1 * *",
            "@weekly" => "0 0 0 * * SUN",
            "@daily" | "@midnight" => "0 0 0 * * *",
            "@hourly" => "0 0 * * * *",
            _ => return Err(invalid(expression, "unknown shortcut")),
        };
        Ok(expanded.to_string())
    }

    /// The cron crate wants a seconds field first.
    fn normalize_fields(expression: &str) -> Result<String, ScheduleError> {
        let fields = expression.split_whitespace().count();
        match fields {
            5 => Ok(format!("0 {}", expression)),
            6 => Ok(expression.to_string()),
            n => Err(invalid(
                expression,
                format!("expected 5 or 6 fields, got {}", n),
            )),
        }
    }

    /// Whether this schedule was parsed from an expression.
    pub fn is_set(&self) -> bool {
        self.cron.is_some()
    }

    /// The original expression, if any.
    pub fn expression(&self) -> Option<&str> {
        self.expression.as_deref()
    }

    /// Next scheduled instant strictly after `last_run`.
    ///
    /// With no previous run (or an unset schedule) the answer is `now`.
    pub fn next(&self, last_run: Option<DateTime<Utc>>, now: DateTime<Utc>) -> DateTime<Utc> {
        match (last_run, &self.cron) {
            (Some(last), Some(cron)) => cron.after(&last).next().unwrap_or(now),
            _ => now,
        }
    }

    /// Whether a run is due at `now` given the previous run.
    pub fn is_due(&self, last_run: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        match last_run {
            None => true,
            Some(_) => now >= self.next(last_run, now),
        }
    }
}

fn invalid(expression: &str, reason: impl fmt::Display) -> ScheduleError {
    ScheduleError::InvalidExpression {
        expression: expression.to_string(),
        reason: reason.to_string(),
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.expression.as_deref().unwrap_or(""))
    }
}

impl FromStr for Schedule {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl PartialEq for Schedule {
    fn eq(&self, other: &Self) -> bool {
        self.expression == other.expression
    }
}

impl Eq for Schedule {}

impl<'de> Deserialize<'de> for Schedule {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let expression = String::deserialize(deserializer)?;
        Schedule::parse(&expression).map_err(serde::de::Error::custom)
    }
}

impl Serialize for Schedule {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
