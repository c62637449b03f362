//! Store error types

use thiserror::Error;

/// Store-related errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// Write or abort on a stream that was already closed or aborted
    #[error("Chunk stream is closed")]
    ClosedStream,

    /// A reader of the chunk stream went away
    #[error("Chunk stream consumer went away")]
    ConsumerGone,

    /// The producer aborted the stream
    #[error("Stream aborted: {0}")]
    StreamAborted(String),

    /// Creating the multipart session failed
    #[error("Failed to create multipart upload for {bucket}/{key}: {message}")]
    CreateUpload {
        bucket: String,
        key: String,
        message: String,
    },

    /// A single part failed to upload
    #[error("Failed to upload part {part_number}: {message}")]
    PartFailed { part_number: i32, message: String },

    /// Completing the multipart session failed
    #[error("Failed to complete multipart upload {upload_id}: {message}")]
    CompleteFailed { upload_id: String, message: String },

    /// Aborting the multipart session failed
    #[error("Failed to abort multipart upload {upload_id}: {message}")]
    AbortFailed { upload_id: String, message: String },

    /// The stream ended without any data
    #[error("No data was produced for {key}")]
    EmptyArtifact { key: String },

    /// Listing objects failed
    #[error("Failed to list objects in {bucket}/{prefix}: {message}")]
    ListFailed {
        bucket: String,
        prefix: String,
        message: String,
    },

    /// The background upload task ended abnormally
    #[error("Upload task failed: {0}")]
    Join(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Several failures, in the order they happened
    #[error("{}", join_errors(.0))]
    Multiple(Vec<StoreError>),

    /// Other error
    #[error("{0}")]
    Other(String),
}

fn join_errors(errors: &[StoreError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl StoreError {
    /// Collapse a list of errors: one error stays itself, several become
    /// [`StoreError::Multiple`].
    pub fn aggregate(mut errors: Vec<StoreError>) -> Option<StoreError> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(StoreError::Multiple(errors)),
        }
    }

    /// Flatten into the list of individual errors
    pub fn into_vec(self) -> Vec<StoreError> {
        match self {
            StoreError::Multiple(errors) => errors.into_iter().flat_map(Self::into_vec).collect(),
            other => vec![other],
        }
    }
}

/// Result type for store operations
pub type Result<T> = std::result::Result<T, StoreError>;
