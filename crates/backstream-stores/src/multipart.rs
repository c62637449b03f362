//! Streaming multipart uploads
//!
//! [`MultipartUploader::start`] opens a session and spawns a consumer that
//! turns every chunk of a [`ChunkReader`] into a part upload. Part uploads
//! run concurrently, bounded by `part_concurrency`. The returned
//! [`UploadCompletion`] collects their outcomes and either completes the
//! session (parts sorted by number) or aborts it.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Result, StoreError};
use crate::stream::{ChunkReader, StreamAbort};
use crate::traits::ObjectStorage;
use crate::types::*;

/// Default number of part uploads running at once per artifact
pub const DEFAULT_PART_CONCURRENCY: usize = 4;

/// Base64-encoded SHA-256 of a part body
pub fn part_checksum(data: &[u8]) -> String {
    BASE64.encode(Sha256::digest(data))
}

/// Uploads streamed artifacts to one storage target
#[derive(Clone)]
pub struct MultipartUploader {
    storage: Arc<dyn ObjectStorage>,
    target: StorageTarget,
    part_concurrency: usize,
}

impl MultipartUploader {
    /// Create an uploader
    pub fn new(storage: Arc<dyn ObjectStorage>, target: StorageTarget) -> Self {
        Self {
            storage,
            target,
            part_concurrency: DEFAULT_PART_CONCURRENCY,
        }
    }

    /// Limit the number of concurrent part uploads
    pub fn with_part_concurrency(mut self, part_concurrency: usize) -> Self {
        self.part_concurrency = part_concurrency.max(1);
        self
    }

    /// The storage target
    pub fn target(&self) -> &StorageTarget {
        &self.target
    }

    /// Open a session for the artifact stamped `timestamp` and start
    /// consuming `reader`.
    ///
    /// Fails without spawning anything when the session cannot be created.
    pub async fn start(
        &self,
        reader: ChunkReader,
        timestamp: DateTime<Utc>,
    ) -> Result<UploadCompletion> {
        let key = self.target.key_for(timestamp);
        let session = self
            .storage
            .create_multipart_upload(&self.target.bucket, &key)
            .await?;
        info!(
            bucket = %session.bucket,
            key = %session.key,
            upload_id = %session.upload_id,
            "multipart upload started"
        );

        let (parts_tx, parts_rx) = mpsc::unbounded_channel();
        let consumer = tokio::spawn(consume(
            Arc::clone(&self.storage),
            session.clone(),
            reader,
            parts_tx,
            Arc::new(Semaphore::new(self.part_concurrency)),
        ));

        Ok(UploadCompletion {
            storage: Arc::clone(&self.storage),
            session,
            parts_rx,
            consumer,
        })
    }

    /// Timestamp of the most recent artifact under the target, if any.
    ///
    /// Keys that do not parse as `prefix<timestamp>suffix` are ignored.
    pub async fn last_run(&self) -> Result<Option<DateTime<Utc>>> {
        let mut latest = None;
        let mut continuation = None;

        loop {
            let page = self
                .storage
                .list_objects(&self.target.bucket, &self.target.prefix, continuation)
                .await?;

            for object in &page.objects {
                match self.target.timestamp_of(&object.key) {
                    Some(ts) => latest = latest.max(Some(ts)),
                    None => debug!(key = %object.key, "ignoring unrelated object"),
                }
            }

            match page.next_continuation {
                Some(token) => continuation = Some(token),
                None => break,
            }
        }

        Ok(latest)
    }
}

struct PartOutcome {
    part_number: i32,
    result: Result<UploadedPart>,
}

async fn consume(
    storage: Arc<dyn ObjectStorage>,
    session: UploadSession,
    mut reader: ChunkReader,
    parts_tx: mpsc::UnboundedSender<PartOutcome>,
    permits: Arc<Semaphore>,
) -> Option<StreamAbort> {
    let mut part_number = 0;

    while let Some(chunk) = reader.next().await {
        let (data, error) = chunk.into_parts();
        if let Some(error) = error {
            debug!(upload_id = %session.upload_id, reason = %error, "stream aborted");
            return Some(error);
        }
        if data.is_empty() {
            continue;
        }

        part_number += 1;
        let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
            return Some(StreamAbort::new("part upload limiter closed"));
        };

        let storage = Arc::clone(&storage);
        let session = session.clone();
        let parts_tx = parts_tx.clone();
        let number = part_number;
        tokio::spawn(async move {
            let _permit = permit;
            let checksum = part_checksum(&data);
            debug!(upload_id = %session.upload_id, part_number = number, size = data.len(), "uploading part");
            let result = storage.upload_part(&session, number, data, &checksum).await;
            let _ = parts_tx.send(PartOutcome {
                part_number: number,
                result,
            });
        });
    }

    None
}

/// Handle on a running upload
pub struct UploadCompletion {
    storage: Arc<dyn ObjectStorage>,
    session: UploadSession,
    parts_rx: mpsc::UnboundedReceiver<PartOutcome>,
    consumer: JoinHandle<Option<StreamAbort>>,
}

impl UploadCompletion {
    /// The open session
    pub fn session(&self) -> &UploadSession {
        &self.session
    }

    /// Wait for every part, then complete or abort the session.
    ///
    /// Any stream abort, failed part, or an artifact without data aborts the
    /// session; an abort failure is reported next to the original error.
    pub async fn wait(mut self) -> Result<CompletedUpload> {
        let mut parts = Vec::new();
        let mut errors = Vec::new();

        while let Some(outcome) = self.parts_rx.recv().await {
            match outcome.result {
                Ok(part) => parts.push(part),
                Err(e) => {
                    warn!(upload_id = %self.session.upload_id, part_number = outcome.part_number, error = %e, "part upload failed");
                    errors.push(e);
                }
            }
        }

        match (&mut self.consumer).await {
            Ok(Some(abort)) => errors.insert(0, StoreError::StreamAborted(abort.reason().to_string())),
            Ok(None) => {}
            Err(e) => errors.insert(0, StoreError::Join(e.to_string())),
        }

        parts.sort_by_key(|part| part.part_number);

        if errors.is_empty() && parts.is_empty() {
            errors.push(StoreError::EmptyArtifact {
                key: self.session.key.clone(),
            });
        }
        if !errors.is_empty() {
            return Err(self.abort(errors).await);
        }

        if let Err(e) = self
            .storage
            .complete_multipart_upload(&self.session, &parts)
            .await
        {
            return Err(self.abort(vec![e]).await);
        }

        let bytes = parts.iter().map(|part| part.size as u64).sum();
        info!(
            bucket = %self.session.bucket,
            key = %self.session.key,
            parts = parts.len(),
            bytes,
            "multipart upload completed"
        );
        Ok(CompletedUpload {
            bucket: self.session.bucket,
            key: self.session.key,
            parts: parts.len(),
            bytes,
        })
    }

    async fn abort(&self, mut errors: Vec<StoreError>) -> StoreError {
        warn!(upload_id = %self.session.upload_id, key = %self.session.key, "aborting multipart upload");
        if let Err(e) = self.storage.abort_multipart_upload(&self.session).await {
            errors.push(e);
        }
        StoreError::aggregate(errors)
            .unwrap_or_else(|| StoreError::Other("multipart upload failed".to_string()))
    }
}
