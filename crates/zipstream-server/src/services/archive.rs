//! Streaming ZIP writer.
//!
//! Entries are stored uncompressed with data descriptors, so nothing ever has
//! to be seeked back to and the archive can go straight into an HTTP body.
//! Each chunk the encoder produces is handed to an [`ArchiveSink`] as soon as
//! it is written; memory stays at one copy buffer no matter the entry size.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use std::io::{self, Write};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;
use zip::write::{SimpleFileOptions, StreamWriter};
use zip::{CompressionMethod, DateTime, ZipWriter};

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("zip encoding failed: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("entry write failed: {0}")]
    Encode(#[source] io::Error),

    #[error("source read failed: {0}")]
    Source(#[source] io::Error),

    #[error("client sink failed: {0}")]
    Sink(#[source] io::Error),

    #[error("archive already closed")]
    Closed,
}

/// Destination for encoded archive bytes.
#[async_trait]
pub trait ArchiveSink: Send {
    async fn send(&mut self, chunk: Bytes) -> io::Result<()>;
}

/// Production sink: a bounded channel read by the response body.
#[async_trait]
impl ArchiveSink for mpsc::Sender<io::Result<Bytes>> {
    async fn send(&mut self, chunk: Bytes) -> io::Result<()> {
        mpsc::Sender::send(self, Ok(chunk))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "client disconnected"))
    }
}

#[async_trait]
impl<T: ArchiveSink + ?Sized> ArchiveSink for &mut T {
    async fn send(&mut self, chunk: Bytes) -> io::Result<()> {
        (**self).send(chunk).await
    }
}

#[async_trait]
impl ArchiveSink for Vec<u8> {
    async fn send(&mut self, chunk: Bytes) -> io::Result<()> {
        self.extend_from_slice(&chunk);
        Ok(())
    }
}

/// Synchronous target of the zip encoder; drained into the sink after every write.
#[derive(Clone, Default)]
struct Staging(Arc<Mutex<Vec<u8>>>);

impl Staging {
    fn drain(&self) -> Bytes {
        let mut buf = self.0.lock();
        let out = Bytes::copy_from_slice(&buf);
        buf.clear();
        out
    }
}

impl Write for Staging {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub struct ArchiveWriter<S: ArchiveSink> {
    zip: Option<ZipWriter<StreamWriter<Staging>>>,
    staging: Staging,
    sink: S,
    buffer_size: usize,
    sink_closed: bool,
    entries: usize,
    bytes_out: u64,
}

impl<S: ArchiveSink> ArchiveWriter<S> {
    /// Start an archive that emits into `sink`, copying through `buffer_size` slices.
    pub fn begin(sink: S, buffer_size: usize) -> Self {
        let staging = Staging::default();
        Self {
            zip: Some(ZipWriter::new_stream(staging.clone())),
            staging,
            sink,
            buffer_size: buffer_size.max(1),
            sink_closed: false,
            entries: 0,
            bytes_out: 0,
        }
    }

    /// Append one stored entry whose content is read from `body`.
    ///
    /// Returns the number of content bytes written. On a source error the
    /// entry is left truncated; it is still closed properly by the next
    /// `add_entry` or by `close`.
    pub async fn add_entry<B>(&mut self, name: &str, body: B) -> Result<u64, ArchiveError>
    where
        B: Stream<Item = io::Result<Bytes>> + Send,
    {
        if self.sink_closed {
            return Err(ArchiveError::Sink(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "client disconnected",
            )));
        }

        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Stored)
            .last_modified_time(modification_time())
            .large_file(true);
        self.encoder()?.start_file(name, options)?;
        self.entries += 1;
        self.flush_staging().await?;

        let mut body = std::pin::pin!(body);
        let mut written: u64 = 0;

        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(ArchiveError::Source)?;
            for piece in chunk.chunks(self.buffer_size) {
                self.encoder()?
                    .write_all(piece)
                    .map_err(ArchiveError::Encode)?;
                written += piece.len() as u64;
                self.flush_staging().await?;
            }
        }

        debug!(entry = name, bytes = written, "Archive entry written");
        Ok(written)
    }

    /// Write the central directory. Valid exactly once.
    pub async fn close(&mut self) -> Result<(), ArchiveError> {
        let zip = self.zip.take().ok_or(ArchiveError::Closed)?;
        zip.finish()?;
        self.flush_staging().await
    }

    pub fn entries(&self) -> usize {
        self.entries
    }

    /// Total archive bytes handed to the sink so far.
    pub fn bytes_out(&self) -> u64 {
        self.bytes_out
    }

    /// Whether the sink has refused a write (client gone).
    pub fn sink_closed(&self) -> bool {
        self.sink_closed
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    fn encoder(&mut self) -> Result<&mut ZipWriter<StreamWriter<Staging>>, ArchiveError> {
        self.zip.as_mut().ok_or(ArchiveError::Closed)
    }

    async fn flush_staging(&mut self) -> Result<(), ArchiveError> {
        let pending = self.staging.drain();
        if pending.is_empty() {
            return Ok(());
        }
        if self.sink_closed {
            return Err(ArchiveError::Sink(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "client disconnected",
            )));
        }

        let len = pending.len() as u64;
        if let Err(e) = self.sink.send(pending).await {
            self.sink_closed = true;
            return Err(ArchiveError::Sink(e));
        }
        self.bytes_out += len;
        Ok(())
    }
}

fn modification_time() -> DateTime {
    DateTime::try_from(chrono::Local::now().naive_local()).unwrap_or_default()
}
