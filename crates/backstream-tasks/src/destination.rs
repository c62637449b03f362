//! Schedule-gated storage targets

use std::fmt;
use std::sync::Arc;

use backstream_core::config::{DestinationConfig, DestinationKind};
use backstream_core::Schedule;
use backstream_stores::{
    ChunkReader, MultipartUploader, S3Storage, StorageTarget, StoreError, UploadCompletion,
};
use chrono::{DateTime, Utc};
use tracing::debug;

/// A schedule plus the uploader that stores artifacts for it
#[derive(Clone)]
pub struct Destination {
    schedule: Schedule,
    uploader: MultipartUploader,
}

impl Destination {
    pub fn new(schedule: Schedule, uploader: MultipartUploader) -> Self {
        Self { schedule, uploader }
    }

    /// Build the backend for a configured destination
    pub async fn from_config(config: &DestinationConfig, part_concurrency: usize) -> Self {
        let uploader = match &config.kind {
            DestinationKind::S3 { s3 } => {
                let storage = Arc::new(S3Storage::new(s3).await);
                let target = StorageTarget::new(&s3.bucket, &s3.prefix, &s3.suffix);
                MultipartUploader::new(storage, target)
            }
        };
        debug!(destination = %uploader.target(), schedule = %config.schedule, "destination configured");
        Self::new(
            config.schedule.clone(),
            uploader.with_part_concurrency(part_concurrency),
        )
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    pub fn uploader(&self) -> &MultipartUploader {
        &self.uploader
    }

    /// Human readable location, e.g. `s3://bucket/prefix*suffix`
    pub fn label(&self) -> String {
        self.uploader.target().to_string()
    }

    /// Timestamp of the latest stored artifact
    pub async fn last_run(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        self.uploader.last_run().await
    }

    /// Next time an artifact is due
    pub fn next_run(&self, last_run: Option<DateTime<Utc>>, now: DateTime<Utc>) -> DateTime<Utc> {
        self.schedule.next(last_run, now)
    }

    /// Whether a new artifact is due at `now`
    pub fn is_due(&self, last_run: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        self.schedule.is_due(last_run, now)
    }

    /// Start storing the artifact stamped `now` from `reader`
    pub async fn start(
        &self,
        reader: ChunkReader,
        now: DateTime<Utc>,
    ) -> Result<UploadCompletion, StoreError> {
        self.uploader.start(reader, now).await
    }
}

impl fmt::Debug for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Destination")
            .field("schedule", &self.schedule.to_string())
            .field("target", self.uploader.target())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backstream_core::config::S3Config;
    use backstream_stores::MemoryStorage;
    use chrono::TimeZone;

    fn at(d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2021, 8, d, h, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_due_after_weekly_boundary() {
        let storage = Arc::new(
            MemoryStorage::new().with_object("bucket", "db/20210817090000.sql", "x"),
        );
        let destination = Destination::new(
            Schedule::parse("@weekly").unwrap(),
            MultipartUploader::new(storage, StorageTarget::new("bucket", "db/", ".sql")),
        );

        let last = destination.last_run().await.unwrap();
        assert_eq!(last, Some(at(17, 9)));
        assert!(!destination.is_due(last, at(21, 23)));
        assert!(destination.is_due(last, at(22, 0)));
        assert_eq!(destination.next_run(last, at(18, 0)), at(22, 0));
        assert_eq!(destination.label(), "s3://bucket/db/*.sql");
    }

    #[tokio::test]
    async fn test_from_config() {
        let config = DestinationConfig::s3(
            Schedule::parse("@daily").unwrap(),
            S3Config {
                bucket: "example-bucket".to_string(),
                prefix: "daily/".to_string(),
                suffix: ".tar.gz".to_string(),
                region: Some("eu-west-1".to_string()),
                ..Default::default()
            },
        );

        let destination = Destination::from_config(&config, 2).await;
        assert_eq!(destination.label(), "s3://example-bucket/daily/*.tar.gz");
        assert_eq!(destination.schedule().to_string(), "@daily");
    }
}
