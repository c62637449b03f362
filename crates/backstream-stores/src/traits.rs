//! Object storage backend trait

use bytes::Bytes;

use crate::error::Result;
use crate::types::*;

/// Trait for object storage backends
///
/// Implementations provide the subset of a multipart-upload API needed to
/// stream artifacts, plus prefix listing to discover previous runs. Errors
/// are reported with the matching [`StoreError`](crate::StoreError) variant
/// (`CreateUpload`, `PartFailed`, `CompleteFailed`, `AbortFailed`,
/// `ListFailed`) so callers can aggregate them as-is.
#[async_trait::async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Get the backend name
    fn name(&self) -> &str;

    /// Open a multipart upload session for `bucket/key`
    async fn create_multipart_upload(&self, bucket: &str, key: &str) -> Result<UploadSession>;

    /// Upload one part of an open session
    ///
    /// `checksum_sha256` is the base64 SHA-256 of `data`.
    async fn upload_part(
        &self,
        session: &UploadSession,
        part_number: i32,
        data: Bytes,
        checksum_sha256: &str,
    ) -> Result<UploadedPart>;

    /// Assemble the object from `parts`, which must be sorted by part number
    async fn complete_multipart_upload(
        &self,
        session: &UploadSession,
        parts: &[UploadedPart],
    ) -> Result<()>;

    /// Discard an open session and any uploaded parts
    async fn abort_multipart_upload(&self, session: &UploadSession) -> Result<()>;

    /// List one page of objects under `prefix`
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        continuation: Option<String>,
    ) -> Result<ListPage>;
}
