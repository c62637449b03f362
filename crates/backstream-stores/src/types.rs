//! Common types for object storage uploads

use backstream_core::config::TIMESTAMP_FORMAT;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Where artifacts of one destination live: `bucket/prefix<timestamp>suffix`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageTarget {
    /// Bucket name
    pub bucket: String,
    /// Key prefix
    pub prefix: String,
    /// Key suffix
    pub suffix: String,
}

impl StorageTarget {
    /// Create a target
    pub fn new(
        bucket: impl Into<String>,
        prefix: impl Into<String>,
        suffix: impl Into<String>,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            prefix: prefix.into(),
            suffix: suffix.into(),
        }
    }

    /// Object key for an artifact created at `timestamp`
    pub fn key_for(&self, timestamp: DateTime<Utc>) -> String {
        format!(
            "{}{}{}",
            self.prefix,
            timestamp.format(TIMESTAMP_FORMAT),
            self.suffix
        )
    }

    /// Parse the timestamp out of a key, if the key belongs to this target.
    ///
    /// Key timestamps are always UTC; keys written in another zone read
    /// shifted by its offset.
    pub fn timestamp_of(&self, key: &str) -> Option<DateTime<Utc>> {
        let middle = key
            .strip_prefix(self.prefix.as_str())?
            .strip_suffix(self.suffix.as_str())?;
        let naive = NaiveDateTime::parse_from_str(middle, TIMESTAMP_FORMAT).ok()?;
        Some(Utc.from_utc_datetime(&naive))
    }
}

impl std::fmt::Display for StorageTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "s3://{}/{}*{}", self.bucket, self.prefix, self.suffix)
    }
}

/// An open multipart upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSession {
    /// Bucket name
    pub bucket: String,
    /// Object key
    pub key: String,
    /// Upload id issued by the backend
    pub upload_id: String,
}

/// A part accepted by the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedPart {
    /// 1-based part number
    pub part_number: i32,
    /// Base64 SHA-256 of the part body
    pub checksum_sha256: String,
    /// ETag returned by the backend
    pub etag: String,
    /// Part size in bytes
    pub size: usize,
}

/// Outcome of a completed multipart upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedUpload {
    /// Bucket name
    pub bucket: String,
    /// Object key
    pub key: String,
    /// Number of parts
    pub parts: usize,
    /// Total artifact size in bytes
    pub bytes: u64,
}

/// A stored object as returned by listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    /// Object key
    pub key: String,
    /// Size in bytes, when known
    pub size: Option<u64>,
}

/// One page of a listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    /// Objects on this page
    pub objects: Vec<ObjectInfo>,
    /// Token for the next page, `None` on the last page
    pub next_continuation: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> StorageTarget {
        StorageTarget::new("bucket", "foo/", "-bar.sql")
    }

    #[test]
    fn test_key_for() {
        let ts = Utc.with_ymd_and_hms(2021, 8, 17, 9, 30, 0).unwrap();
        assert_eq!(target().key_for(ts), "foo/20210817093000-bar.sql");
    }

    #[test]
    fn test_timestamp_of() {
        let ts = Utc.with_ymd_and_hms(2021, 8, 17, 9, 30, 0).unwrap();
        assert_eq!(target().timestamp_of("foo/20210817093000-bar.sql"), Some(ts));
        assert_eq!(target().timestamp_of("foo/invaliddate-bar.sql"), None);
        assert_eq!(target().timestamp_of("other/20210817093000-bar.sql"), None);
        assert_eq!(target().timestamp_of("foo/20210817093000-bar.sql.tmp"), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(target().to_string(), "s3://bucket/foo/*-bar.sql");
    }
}
