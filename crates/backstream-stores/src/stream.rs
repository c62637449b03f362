//! Chunked streaming of command output.
//!
//! A [`ChunkWriter`] accumulates arbitrary writes and emits fixed-size
//! [`Chunk`]s into one bounded queue per [`ChunkReader`]. The writer waits
//! while any queue is full, which bounds memory to roughly
//! `chunk_size * capacity` per reader.
//!
//! A stream ends either with [`ChunkWriter::close`], after which readers see
//! the remaining data followed by `None`, or with [`ChunkWriter::abort`],
//! which delivers a final chunk carrying the abort reason.

use bytes::{Bytes, BytesMut};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::trace;

use crate::error::{Result, StoreError};

/// Reason a producer gave up on a stream
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct StreamAbort(String);

impl StreamAbort {
    /// Create an abort reason
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }

    /// The reason text
    pub fn reason(&self) -> &str {
        &self.0
    }
}

/// A slice of stream data, optionally terminating the stream with an error
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    data: Bytes,
    error: Option<StreamAbort>,
}

impl Chunk {
    fn data_only(data: Bytes) -> Self {
        Self { data, error: None }
    }

    fn aborted(data: Bytes, error: StreamAbort) -> Self {
        Self {
            data,
            error: Some(error),
        }
    }

    /// Chunk payload
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Abort reason, set on the final chunk of an aborted stream
    pub fn error(&self) -> Option<&StreamAbort> {
        self.error.as_ref()
    }

    /// Payload length
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the payload is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Split into payload and abort reason
    pub fn into_parts(self) -> (Bytes, Option<StreamAbort>) {
        (self.data, self.error)
    }
}

#[derive(Clone)]
enum Message {
    Chunk(Chunk),
    End,
}

/// Create a stream with a single reader
pub fn channel(chunk_size: usize, capacity: usize) -> (ChunkWriter, ChunkReader) {
    let (writer, mut readers) = fanout(chunk_size, capacity, 1);
    let reader = readers.remove(0);
    (writer, reader)
}

/// Create a stream whose chunks are delivered to `consumers` readers
pub fn fanout(
    chunk_size: usize,
    capacity: usize,
    consumers: usize,
) -> (ChunkWriter, Vec<ChunkReader>) {
    let chunk_size = chunk_size.max(1);
    let capacity = capacity.max(1);

    let (senders, readers) = (0..consumers.max(1))
        .map(|_| {
            let (tx, rx) = mpsc::channel(capacity);
            (
                tx,
                ChunkReader {
                    rx,
                    finished: false,
                },
            )
        })
        .unzip();

    let writer = ChunkWriter {
        chunk_size,
        buffer: BytesMut::with_capacity(chunk_size),
        senders,
        closed: false,
    };
    (writer, readers)
}

/// Producer side of a chunk stream
pub struct ChunkWriter {
    chunk_size: usize,
    buffer: BytesMut,
    senders: Vec<mpsc::Sender<Message>>,
    closed: bool,
}

impl ChunkWriter {
    /// Configured chunk size
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Whether the stream was closed or aborted
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Append bytes, emitting every complete chunk
    pub async fn write(&mut self, mut data: &[u8]) -> Result<()> {
        if self.closed {
            return Err(StoreError::ClosedStream);
        }

        while !data.is_empty() {
            let room = self.chunk_size - self.buffer.len();
            let take = room.min(data.len());
            self.buffer.extend_from_slice(&data[..take]);
            data = &data[take..];

            if self.buffer.len() == self.chunk_size {
                let chunk = Chunk::data_only(self.buffer.split().freeze());
                self.emit(chunk).await?;
            }
        }
        Ok(())
    }

    /// Flush the remainder and end the stream. Closing twice is a no-op.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        if !self.buffer.is_empty() {
            let chunk = Chunk::data_only(self.buffer.split().freeze());
            self.broadcast(Message::Chunk(chunk)).await;
        }
        self.broadcast(Message::End).await;
        self.senders.clear();
        Ok(())
    }

    /// End the stream with an error carried by the final chunk
    pub async fn abort(&mut self, error: StreamAbort) -> Result<()> {
        if self.closed {
            return Err(StoreError::ClosedStream);
        }
        self.closed = true;

        trace!(reason = %error, "aborting chunk stream");
        let chunk = Chunk::aborted(self.buffer.split().freeze(), error);
        self.broadcast(Message::Chunk(chunk)).await;
        self.senders.clear();
        Ok(())
    }

    async fn emit(&self, chunk: Chunk) -> Result<()> {
        for sender in &self.senders {
            sender
                .send(Message::Chunk(chunk.clone()))
                .await
                .map_err(|_| StoreError::ConsumerGone)?;
        }
        Ok(())
    }

    // Readers that already went away are skipped.
    async fn broadcast(&self, message: Message) {
        for sender in &self.senders {
            let _ = sender.send(message.clone()).await;
        }
    }
}

/// Consumer side of a chunk stream
pub struct ChunkReader {
    rx: mpsc::Receiver<Message>,
    finished: bool,
}

impl ChunkReader {
    /// Next chunk in write order, `None` once the stream is closed.
    ///
    /// A writer dropped without closing reads as an abort.
    pub async fn next(&mut self) -> Option<Chunk> {
        if self.finished {
            return None;
        }

        match self.rx.recv().await {
            Some(Message::Chunk(chunk)) => {
                if chunk.error.is_some() {
                    self.finished = true;
                }
                Some(chunk)
            }
            Some(Message::End) => {
                self.finished = true;
                None
            }
            None => {
                self.finished = true;
                Some(Chunk::aborted(
                    Bytes::new(),
                    StreamAbort::new("chunk writer dropped before closing"),
                ))
            }
        }
    }
}
