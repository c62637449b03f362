//! Amazon S3 backend
//!
//! Wraps `aws-sdk-s3`. Transient failures are retried by the SDK (standard
//! retry mode, 4 attempts); nothing above this layer retries.

use aws_config::retry::RetryConfig;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{ChecksumAlgorithm, CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client;
use backstream_core::config::S3Config;
use bytes::Bytes;
use tracing::{debug, instrument};

use crate::error::{Result, StoreError};
use crate::traits::ObjectStorage;
use crate::types::*;

const MAX_ATTEMPTS: u32 = 4;

/// S3 object storage
pub struct S3Storage {
    client: Client,
}

impl S3Storage {
    /// Build a client from destination settings.
    ///
    /// Static credentials win over a named profile; with neither, the
    /// default AWS credential chain applies.
    pub async fn new(config: &S3Config) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .retry_config(RetryConfig::standard().with_max_attempts(MAX_ATTEMPTS));

        if let Some(region) = &config.region {
            loader = loader.region(Region::new(region.clone()));
        }
        if let Some(profile) = &config.profile {
            loader = loader.profile_name(profile);
        }
        if let Some(credentials) = &config.credentials {
            loader = loader.credentials_provider(Credentials::new(
                credentials.access_key_id.clone(),
                credentials.secret_access_key.clone(),
                credentials.session_token.clone(),
                None,
                "backstream",
            ));
        }

        let sdk_config = loader.load().await;
        debug!(region = ?sdk_config.region(), "created S3 client");
        Self {
            client: Client::new(&sdk_config),
        }
    }

    /// Wrap an existing client
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl ObjectStorage for S3Storage {
    fn name(&self) -> &str {
        "s3"
    }

    #[instrument(skip(self))]
    async fn create_multipart_upload(&self, bucket: &str, key: &str) -> Result<UploadSession> {
        let create_error = |message: String| StoreError::CreateUpload {
            bucket: bucket.to_string(),
            key: key.to_string(),
            message,
        };

        let response = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .checksum_algorithm(ChecksumAlgorithm::Sha256)
            .send()
            .await
            .map_err(|e| create_error(DisplayErrorContext(&e).to_string()))?;

        let upload_id = response
            .upload_id()
            .ok_or_else(|| create_error("response carried no upload id".to_string()))?;

        Ok(UploadSession {
            bucket: bucket.to_string(),
            key: key.to_string(),
            upload_id: upload_id.to_string(),
        })
    }

    async fn upload_part(
        &self,
        session: &UploadSession,
        part_number: i32,
        data: Bytes,
        checksum_sha256: &str,
    ) -> Result<UploadedPart> {
        let size = data.len();
        let response = self
            .client
            .upload_part()
            .bucket(&session.bucket)
            .key(&session.key)
            .upload_id(&session.upload_id)
            .part_number(part_number)
            .checksum_sha256(checksum_sha256)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| StoreError::PartFailed {
                part_number,
                message: DisplayErrorContext(&e).to_string(),
            })?;

        let etag = response.e_tag().ok_or_else(|| StoreError::PartFailed {
            part_number,
            message: "response carried no ETag".to_string(),
        })?;

        Ok(UploadedPart {
            part_number,
            checksum_sha256: checksum_sha256.to_string(),
            etag: etag.to_string(),
            size,
        })
    }

    async fn complete_multipart_upload(
        &self,
        session: &UploadSession,
        parts: &[UploadedPart],
    ) -> Result<()> {
        let completed = CompletedMultipartUpload::builder()
            .set_parts(Some(
                parts
                    .iter()
                    .map(|part| {
                        CompletedPart::builder()
                            .part_number(part.part_number)
                            .e_tag(&part.etag)
                            .checksum_sha256(&part.checksum_sha256)
                            .build()
                    })
                    .collect(),
            ))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(&session.bucket)
            .key(&session.key)
            .upload_id(&session.upload_id)
            .multipart_upload(completed)
            .send()
            .await
            .map_err(|e| StoreError::CompleteFailed {
                upload_id: session.upload_id.clone(),
                message: DisplayErrorContext(&e).to_string(),
            })?;
        Ok(())
    }

    async fn abort_multipart_upload(&self, session: &UploadSession) -> Result<()> {
        self.client
            .abort_multipart_upload()
            .bucket(&session.bucket)
            .key(&session.key)
            .upload_id(&session.upload_id)
            .send()
            .await
            .map_err(|e| StoreError::AbortFailed {
                upload_id: session.upload_id.clone(),
                message: DisplayErrorContext(&e).to_string(),
            })?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        continuation: Option<String>,
    ) -> Result<ListPage> {
        let response = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .set_continuation_token(continuation)
            .send()
            .await
            .map_err(|e| StoreError::ListFailed {
                bucket: bucket.to_string(),
                prefix: prefix.to_string(),
                message: DisplayErrorContext(&e).to_string(),
            })?;

        let objects = response
            .contents()
            .iter()
            .filter_map(|object| {
                Some(ObjectInfo {
                    key: object.key()?.to_string(),
                    size: object.size().and_then(|s| u64::try_from(s).ok()),
                })
            })
            .collect();

        let next_continuation = if response.is_truncated().unwrap_or(false) {
            response.next_continuation_token().map(str::to_string)
        } else {
            None
        };

        Ok(ListPage {
            objects,
            next_continuation,
        })
    }
}
