//! Exit codes for the CLI

use backstream_core::BackstreamError;
use backstream_tasks::SetupError;

use crate::cli::commands::TasksFailed;

/// Success
pub const SUCCESS: i32 = 0;

/// General error
pub const ERROR: i32 = 1;

/// Configuration error
pub const CONFIG_ERROR: i32 = 2;

/// At least one task failed or timed out
pub const TASK_FAILED: i32 = 3;

/// Map a top-level error to the process exit code
pub fn for_error(error: &anyhow::Error) -> i32 {
    if error.downcast_ref::<TasksFailed>().is_some() {
        return TASK_FAILED;
    }
    if error.downcast_ref::<SetupError>().is_some() {
        return CONFIG_ERROR;
    }
    match error.downcast_ref::<BackstreamError>() {
        Some(BackstreamError::Config(_)) | Some(BackstreamError::Schedule(_)) => CONFIG_ERROR,
        _ => ERROR,
    }
}
