use std::future::Future;
use std::path::Path;
use std::pin::Pin;

use endpoint_protocol::FileMeta;
use tokio::io::AsyncReadExt;

use crate::TransferError;

/// Boxed future returned by [`FileDataSource`] methods.
pub type SourceFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, TransferError>> + Send + 'a>>;

/// A source of bytes for an upload.
///
/// Implementors hand out the content in order, one chunk per call. A chunk
/// shorter than requested marks the end of the data; after that,
/// [`has_data_left`](Self::has_data_left) is `false` for good.
pub trait FileDataSource: Send {
    /// Declared total size. Not checked against the bytes produced.
    fn size(&self) -> u64;

    /// Metadata stored alongside the remote file.
    fn meta(&self) -> &FileMeta;

    fn public_meta(&self) -> &[u8] {
        &self.meta().public_meta
    }

    fn private_meta(&self) -> &[u8] {
        &self.meta().private_meta
    }

    fn has_data_left(&self) -> bool;

    /// Returns up to `size` bytes. Fewer bytes means end of data.
    fn next_chunk(&mut self, size: usize) -> SourceFuture<'_, Vec<u8>>;

    /// Releases the underlying resource. Safe to call once the data is drained.
    fn close(&mut self) -> SourceFuture<'_, ()>;
}

// ---------------------------------------------------------------------------
// BufferSource
// ---------------------------------------------------------------------------

/// Serves chunks out of an owned in-memory buffer.
#[derive(Debug)]
pub struct BufferSource {
    data: Vec<u8>,
    offset: usize,
    meta: FileMeta,
    declared_size: u64,
    has_data_left: bool,
}

impl BufferSource {
    pub fn new(data: Vec<u8>, meta: FileMeta) -> Self {
        let declared_size = data.len() as u64;
        Self {
            data,
            offset: 0,
            meta,
            declared_size,
            has_data_left: true,
        }
    }

    /// Overrides the declared size reported by [`FileDataSource::size`].
    pub fn with_declared_size(mut self, size: u64) -> Self {
        self.declared_size = size;
        self
    }

    /// Bytes not handed out yet.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }
}

impl FileDataSource for BufferSource {
    fn size(&self) -> u64 {
        self.declared_size
    }

    fn meta(&self) -> &FileMeta {
        &self.meta
    }

    fn has_data_left(&self) -> bool {
        self.has_data_left
    }

    fn next_chunk(&mut self, size: usize) -> SourceFuture<'_, Vec<u8>> {
        Box::pin(async move {
            if size == 0 {
                return Err(TransferError::InvalidChunkSize(0));
            }
            let end = self.offset.saturating_add(size).min(self.data.len());
            let chunk = self.data[self.offset..end].to_vec();
            self.offset = end;
            if chunk.len() < size {
                self.has_data_left = false;
            }
            Ok(chunk)
        })
    }

    fn close(&mut self) -> SourceFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }
}

// ---------------------------------------------------------------------------
// LocalFileSource
// ---------------------------------------------------------------------------

/// Reads chunks sequentially from an open local file.
#[derive(Debug)]
pub struct LocalFileSource {
    file: Option<tokio::fs::File>,
    meta: FileMeta,
    size: u64,
    has_data_left: bool,
}

impl LocalFileSource {
    /// Opens `path`; the declared size is the file's current length.
    pub async fn open(path: &Path, meta: FileMeta) -> Result<Self, TransferError> {
        let file = tokio::fs::File::open(path).await?;
        let size = file.metadata().await?.len();
        Ok(Self::from_file(file, meta, size))
    }

    /// Wraps an already open file positioned where reading should start.
    pub fn from_file(file: tokio::fs::File, meta: FileMeta, size: u64) -> Self {
        Self {
            file: Some(file),
            meta,
            size,
            has_data_left: true,
        }
    }
}

impl FileDataSource for LocalFileSource {
    fn size(&self) -> u64 {
        self.size
    }

    fn meta(&self) -> &FileMeta {
        &self.meta
    }

    fn has_data_left(&self) -> bool {
        self.has_data_left
    }

    fn next_chunk(&mut self, size: usize) -> SourceFuture<'_, Vec<u8>> {
        Box::pin(async move {
            if size == 0 {
                return Err(TransferError::InvalidChunkSize(0));
            }
            let file = self
                .file
                .as_mut()
                .ok_or_else(|| TransferError::InvalidState("file source is closed".into()))?;

            // Short reads are not EOF; only a zero-byte read is.
            let mut buf = vec![0u8; size];
            let mut filled = 0;
            while filled < size {
                let n = file.read(&mut buf[filled..]).await?;
                if n == 0 {
                    break;
                }
                filled += n;
            }
            buf.truncate(filled);

            if filled < size {
                self.has_data_left = false;
            }
            Ok(buf)
        })
    }

    fn close(&mut self) -> SourceFuture<'_, ()> {
        Box::pin(async move {
            self.file.take();
            Ok(())
        })
    }
}
