//! In-memory object storage
//!
//! Behaves like a multipart-capable object store kept in process memory.
//! Faults and per-part latency can be injected to exercise failure paths.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use bytes::{Bytes, BytesMut};

use crate::error::{Result, StoreError};
use crate::multipart::part_checksum;
use crate::traits::ObjectStorage;
use crate::types::*;

#[derive(Default)]
struct PendingUpload {
    bucket: String,
    key: String,
    parts: BTreeMap<i32, Bytes>,
}

#[derive(Default)]
struct State {
    next_upload_id: u64,
    uploads: HashMap<String, PendingUpload>,
    objects: BTreeMap<(String, String), Bytes>,
    completed_orders: Vec<Vec<i32>>,
    aborted: Vec<String>,
}

#[derive(Default)]
struct Faults {
    create: Option<String>,
    parts: HashSet<i32>,
    complete: Option<String>,
    abort: Option<String>,
    list: Option<String>,
    part_delays: HashMap<i32, Duration>,
}

/// Object storage backed by process memory
#[derive(Default)]
pub struct MemoryStorage {
    state: Mutex<State>,
    faults: Faults,
    page_size: Option<usize>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MemoryStorage {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object
    pub fn with_object(self, bucket: &str, key: &str, data: impl Into<Bytes>) -> Self {
        self.lock()
            .objects
            .insert((bucket.to_string(), key.to_string()), data.into());
        self
    }

    /// Return at most `size` objects per listing page
    pub fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = Some(size.max(1));
        self
    }

    /// Fail every session creation
    pub fn fail_create(mut self, message: impl Into<String>) -> Self {
        self.faults.create = Some(message.into());
        self
    }

    /// Fail uploads of the given part number
    pub fn fail_part(mut self, part_number: i32) -> Self {
        self.faults.parts.insert(part_number);
        self
    }

    /// Fail every completion
    pub fn fail_complete(mut self, message: impl Into<String>) -> Self {
        self.faults.complete = Some(message.into());
        self
    }

    /// Fail every abort
    pub fn fail_abort(mut self, message: impl Into<String>) -> Self {
        self.faults.abort = Some(message.into());
        self
    }

    /// Fail every listing
    pub fn fail_list(mut self, message: impl Into<String>) -> Self {
        self.faults.list = Some(message.into());
        self
    }

    /// Delay the upload of the given part number
    pub fn delay_part(mut self, part_number: i32, delay: Duration) -> Self {
        self.faults.part_delays.insert(part_number, delay);
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        // A poisoned lock only means a test thread panicked mid-update.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Content of a completed object
    pub fn object(&self, bucket: &str, key: &str) -> Option<Bytes> {
        self.lock()
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    /// Keys of all stored objects in `bucket`
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.lock()
            .objects
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, k)| k.clone())
            .collect()
    }

    /// Part numbers passed to each completion call, in call order
    pub fn completed_part_orders(&self) -> Vec<Vec<i32>> {
        self.lock().completed_orders.clone()
    }

    /// Upload ids that were aborted
    pub fn aborted_uploads(&self) -> Vec<String> {
        self.lock().aborted.clone()
    }

    /// Number of sessions neither completed nor aborted
    pub fn open_uploads(&self) -> usize {
        self.lock().uploads.len()
    }

    /// Highest number of part uploads observed running at once
    pub fn max_parts_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ObjectStorage for MemoryStorage {
    fn name(&self) -> &str {
        "memory"
    }

    async fn create_multipart_upload(&self, bucket: &str, key: &str) -> Result<UploadSession> {
        if let Some(message) = &self.faults.create {
            return Err(StoreError::CreateUpload {
                bucket: bucket.to_string(),
                key: key.to_string(),
                message: message.clone(),
            });
        }

        let mut state = self.lock();
        state.next_upload_id += 1;
        let upload_id = format!("upload-{}", state.next_upload_id);
        state.uploads.insert(
            upload_id.clone(),
            PendingUpload {
                bucket: bucket.to_string(),
                key: key.to_string(),
                parts: BTreeMap::new(),
            },
        );

        Ok(UploadSession {
            bucket: bucket.to_string(),
            key: key.to_string(),
            upload_id,
        })
    }

    async fn upload_part(
        &self,
        session: &UploadSession,
        part_number: i32,
        data: Bytes,
        checksum_sha256: &str,
    ) -> Result<UploadedPart> {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);

        if let Some(delay) = self.faults.part_delays.get(&part_number) {
            tokio::time::sleep(*delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let fail = |message: &str| StoreError::PartFailed {
            part_number,
            message: message.to_string(),
        };

        if self.faults.parts.contains(&part_number) {
            return Err(fail("injected failure"));
        }
        if part_checksum(&data) != checksum_sha256 {
            return Err(fail("checksum mismatch"));
        }

        let size = data.len();
        let mut state = self.lock();
        let upload = state
            .uploads
            .get_mut(&session.upload_id)
            .ok_or_else(|| fail("no such upload"))?;
        upload.parts.insert(part_number, data);

        Ok(UploadedPart {
            part_number,
            checksum_sha256: checksum_sha256.to_string(),
            etag: format!("\"etag-{}\"", part_number),
            size,
        })
    }

    async fn complete_multipart_upload(
        &self,
        session: &UploadSession,
        parts: &[UploadedPart],
    ) -> Result<()> {
        let fail = |message: String| StoreError::CompleteFailed {
            upload_id: session.upload_id.clone(),
            message,
        };

        let mut state = self.lock();
        state
            .completed_orders
            .push(parts.iter().map(|p| p.part_number).collect());

        if let Some(message) = &self.faults.complete {
            return Err(fail(message.clone()));
        }
        if parts.windows(2).any(|w| w[0].part_number >= w[1].part_number) {
            return Err(fail("parts are not in ascending order".to_string()));
        }

        let upload = state
            .uploads
            .remove(&session.upload_id)
            .ok_or_else(|| fail("no such upload".to_string()))?;

        let mut body = BytesMut::new();
        for part in parts {
            let data = upload
                .parts
                .get(&part.part_number)
                .ok_or_else(|| fail(format!("part {} was never uploaded", part.part_number)))?;
            body.extend_from_slice(data);
        }
        state
            .objects
            .insert((upload.bucket, upload.key), body.freeze());
        Ok(())
    }

    async fn abort_multipart_upload(&self, session: &UploadSession) -> Result<()> {
        if let Some(message) = &self.faults.abort {
            return Err(StoreError::AbortFailed {
                upload_id: session.upload_id.clone(),
                message: message.clone(),
            });
        }

        let mut state = self.lock();
        state.uploads.remove(&session.upload_id);
        state.aborted.push(session.upload_id.clone());
        Ok(())
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        continuation: Option<String>,
    ) -> Result<ListPage> {
        let list_error = |message: String| StoreError::ListFailed {
            bucket: bucket.to_string(),
            prefix: prefix.to_string(),
            message,
        };

        if let Some(message) = &self.faults.list {
            return Err(list_error(message.clone()));
        }

        let start = match continuation {
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| list_error(format!("bad continuation token '{}'", token)))?,
            None => 0,
        };

        let matching: Vec<ObjectInfo> = self
            .lock()
            .objects
            .iter()
            .filter(|((b, k), _)| b == bucket && k.starts_with(prefix))
            .map(|((_, k), data)| ObjectInfo {
                key: k.clone(),
                size: Some(data.len() as u64),
            })
            .collect();

        let page_size = self.page_size.unwrap_or(1000);
        let end = (start + page_size).min(matching.len());
        let objects = matching.get(start..end).map(<[_]>::to_vec).unwrap_or_default();
        let next_continuation = (end < matching.len()).then(|| end.to_string());

        Ok(ListPage {
            objects,
            next_continuation,
        })
    }
}
