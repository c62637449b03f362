//! Streaming object-storage uploads for backstream
//!
//! This crate turns a byte stream of unknown length into a stored object
//! without buffering the whole artifact.
//!
//! ## Building blocks
//!
//! - [`stream`]: fixed-size chunking with bounded queues, fan-out to several
//!   readers, and close/abort termination
//! - [`ObjectStorage`]: the multipart-upload and listing seam, implemented by
//!   [`S3Storage`] and the in-process [`MemoryStorage`]
//! - [`MultipartUploader`]: consumes a chunk stream into a multipart upload
//!   and discovers the last stored artifact by listing keys
//!
//! ## Usage
//!
//! ```ignore
//! use backstream_stores::{stream, MultipartUploader, S3Storage, StorageTarget};
//! use std::sync::Arc;
//!
//! let storage = Arc::new(S3Storage::new(&s3_config).await);
//! let uploader = MultipartUploader::new(storage, StorageTarget::new("bucket", "db/", ".sql.gz"));
//!
//! let (mut writer, reader) = stream::channel(10 << 20, 8);
//! let completion = uploader.start(reader, chrono::Utc::now()).await?;
//! writer.write(&dump).await?;
//! writer.close().await?;
//! completion.wait().await?;
//! ```

pub mod error;
pub mod memory;
pub mod multipart;
pub mod s3;
pub mod stream;
pub mod traits;
pub mod types;

pub use error::StoreError;
pub use memory::MemoryStorage;
pub use multipart::{part_checksum, MultipartUploader, UploadCompletion, DEFAULT_PART_CONCURRENCY};
pub use s3::S3Storage;
pub use stream::{Chunk, ChunkReader, ChunkWriter, StreamAbort};
pub use traits::ObjectStorage;
pub use types::*;
