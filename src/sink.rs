//! Output destinations for downloaded bytes.
//!
//! Both sinks accept positional writes from concurrently running workers
//! (each worker owns a disjoint region) as well as a sequential streaming
//! write for the whole-body fallback path.

#![allow(clippy::cast_possible_truncation)]

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use bytes::Bytes;
use futures_util::StreamExt;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};

use crate::error::{FetchError, FetchResult};

/// Destination of downloaded bytes: a file written at absolute offsets, or a
/// growable in-memory buffer.
pub(crate) enum OutputSink {
    File(FileSink),
    Buffer(BufferSink),
}

impl OutputSink {
    /// Creates (or truncates) `path` and returns a file-backed sink.
    ///
    /// The create happens eagerly so an unwritable path fails the download
    /// before any network traffic.
    pub async fn file(path: &Path) -> FetchResult<Self> {
        File::create(path).await?;
        Ok(Self::File(FileSink {
            path: path.to_path_buf(),
        }))
    }

    /// Returns an empty in-memory sink.
    pub fn buffer() -> Self {
        Self::Buffer(BufferSink {
            buf: Mutex::new(Vec::new()),
        })
    }

    /// Writes `data` at the absolute `offset`, extending the sink as needed.
    pub async fn write_at(&self, offset: u64, data: &[u8]) -> FetchResult<()> {
        match self {
            Self::File(file) => file.write_at(offset, data).await,
            Self::Buffer(buffer) => buffer.write_at(offset, data),
        }
    }

    /// Streams an entire response body into the sink sequentially.
    ///
    /// Returns the number of bytes written.
    pub async fn write_stream(&self, response: reqwest::Response) -> FetchResult<u64> {
        match self {
            Self::File(file) => file.write_stream(response).await,
            Self::Buffer(buffer) => buffer.write_stream(response).await,
        }
    }

    /// Current length of the sink in bytes.
    pub async fn len(&self) -> FetchResult<u64> {
        match self {
            Self::File(file) => Ok(tokio::fs::metadata(&file.path).await?.len()),
            Self::Buffer(buffer) => buffer.len(),
        }
    }

    /// Takes the assembled bytes out of a buffer sink; empty for a file sink,
    /// whose contents live on disk.
    pub fn take_body(&self) -> FetchResult<Bytes> {
        match self {
            Self::File(_) => Ok(Bytes::new()),
            Self::Buffer(buffer) => buffer.take(),
        }
    }
}

/// File-backed sink. Positional writes open their own handle so concurrent
/// workers never share a seek position.
pub(crate) struct FileSink {
    path: PathBuf,
}

impl FileSink {
    async fn write_at(&self, offset: u64, data: &[u8]) -> FetchResult<()> {
        let mut file = OpenOptions::new().write(true).open(&self.path).await?;
        file.seek(SeekFrom::Start(offset)).await?;
        file.write_all(data).await?;
        file.flush().await?;
        Ok(())
    }

    async fn write_stream(&self, response: reqwest::Response) -> FetchResult<u64> {
        let mut file = OpenOptions::new().write(true).open(&self.path).await?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }

        file.flush().await?;
        Ok(written)
    }
}

/// Growable in-memory sink. Writes past the current length zero-fill the gap
/// so out-of-order chunk completion cannot corrupt the layout.
pub(crate) struct BufferSink {
    buf: Mutex<Vec<u8>>,
}

impl BufferSink {
    fn lock(&self) -> FetchResult<std::sync::MutexGuard<'_, Vec<u8>>> {
        self.buf
            .lock()
            .map_err(|_| FetchError::Io(std::io::Error::other("mutex poisoned")))
    }

    fn write_at(&self, offset: u64, data: &[u8]) -> FetchResult<()> {
        let mut buf = self.lock()?;
        let end = offset as usize + data.len();
        if buf.len() < end {
            buf.resize(end, 0);
        }
        buf[offset as usize..end].copy_from_slice(data);
        Ok(())
    }

    async fn write_stream(&self, response: reqwest::Response) -> FetchResult<u64> {
        let mut stream = response.bytes_stream();
        let mut written = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            written += chunk.len() as u64;
            self.lock()?.extend_from_slice(&chunk);
        }

        Ok(written)
    }

    fn len(&self) -> FetchResult<u64> {
        Ok(self.lock()?.len() as u64)
    }

    fn take(&self) -> FetchResult<Bytes> {
        let mut buf = self.lock()?;
        Ok(Bytes::from(std::mem::take(&mut *buf)))
    }
}
