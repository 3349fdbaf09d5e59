use std::fmt;
use std::sync::Arc;

use endpoint_bridge::{InboxApi, StoreApi};
use endpoint_protocol::{EntryHandle, FileMeta, RemoteFileHandle};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::source::FileDataSource;
use crate::validation::{validate_chunk_size, validate_remote_id};
use crate::TransferError;

/// Local destination for a download.
pub type LocalSink = Box<dyn AsyncWrite + Send + Unpin>;

/// Direction and local side of a transfer. Fixed for the engine's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    ReadToBuffer,
    ReadToLocalSink,
    CreateFromLocalSource,
    CreateFromBuffer,
    UpdateFromLocalSource,
    UpdateFromBuffer,
}

impl TransferMode {
    /// `true` for the download modes.
    pub fn is_read(self) -> bool {
        matches!(self, Self::ReadToBuffer | Self::ReadToLocalSink)
    }

    /// `true` for the modes that keep the content in memory.
    pub fn is_buffered(self) -> bool {
        matches!(
            self,
            Self::ReadToBuffer | Self::CreateFromBuffer | Self::UpdateFromBuffer
        )
    }
}

enum Remote {
    Store(Arc<dyn StoreApi>),
    /// Inbox attachment; writes need the entry the file belongs to.
    Attachment {
        inbox: Arc<dyn InboxApi>,
        entry: Option<EntryHandle>,
    },
}

enum Local {
    Source(Box<dyn FileDataSource>),
    Sink(LocalSink),
    /// Download target, or upload content with the send offset.
    Buffer { data: Option<Vec<u8>>, offset: usize },
}

// ---------------------------------------------------------------------------
// ChunkTransferEngine
// ---------------------------------------------------------------------------

/// Moves one file between local data and a remote handle, one chunk per call.
///
/// The engine never loops on its own: callers issue
/// [`write_chunk`](Self::write_chunk) / [`read_chunk`](Self::read_chunk) until
/// [`has_data_left`](Self::has_data_left) turns `false`, then
/// [`close`](Self::close) it. `close` consumes the engine, so a handle is
/// released exactly once.
pub struct ChunkTransferEngine {
    remote: Remote,
    handle: RemoteFileHandle,
    mode: TransferMode,
    chunk_size: usize,
    has_data_left: bool,
    local: Local,
    declared_size: Option<u64>,
    transferred: u64,
    hasher: Sha256,
}

impl fmt::Debug for ChunkTransferEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkTransferEngine")
            .field("handle", &self.handle)
            .field("mode", &self.mode)
            .field("chunk_size", &self.chunk_size)
            .field("has_data_left", &self.has_data_left)
            .field("transferred", &self.transferred)
            .finish_non_exhaustive()
    }
}

impl ChunkTransferEngine {
    fn new(
        remote: Remote,
        handle: RemoteFileHandle,
        mode: TransferMode,
        chunk_size: usize,
        local: Local,
        declared_size: Option<u64>,
    ) -> Self {
        debug!(%handle, ?mode, chunk_size, "transfer engine ready");
        Self {
            remote,
            handle,
            mode,
            chunk_size,
            has_data_left: true,
            local,
            declared_size,
            transferred: 0,
            hasher: Sha256::new(),
        }
    }

    /// Opens `file_id` for download into memory.
    pub async fn open_to_buffer(
        store: Arc<dyn StoreApi>,
        file_id: &str,
        chunk_size: usize,
    ) -> Result<Self, TransferError> {
        validate_chunk_size(chunk_size)?;
        validate_remote_id("file", file_id)?;
        let handle = store.open_file(file_id).await?;
        let local = Local::Buffer {
            data: Some(Vec::new()),
            offset: 0,
        };
        Ok(Self::new(
            Remote::Store(store),
            handle,
            TransferMode::ReadToBuffer,
            chunk_size,
            local,
            None,
        ))
    }

    /// Opens `file_id` for download into `sink`.
    pub async fn open_to_sink(
        store: Arc<dyn StoreApi>,
        file_id: &str,
        sink: LocalSink,
        chunk_size: usize,
    ) -> Result<Self, TransferError> {
        validate_chunk_size(chunk_size)?;
        validate_remote_id("file", file_id)?;
        let handle = store.open_file(file_id).await?;
        Ok(Self::new(
            Remote::Store(store),
            handle,
            TransferMode::ReadToLocalSink,
            chunk_size,
            Local::Sink(sink),
            None,
        ))
    }

    /// Creates a new file in `store_id` with the content of `source`.
    pub async fn create_from_source(
        store: Arc<dyn StoreApi>,
        store_id: &str,
        source: Box<dyn FileDataSource>,
        chunk_size: usize,
    ) -> Result<Self, TransferError> {
        validate_chunk_size(chunk_size)?;
        validate_remote_id("store", store_id)?;
        let size = source.size();
        let handle = store.create_file(store_id, source.meta(), size).await?;
        Ok(Self::new(
            Remote::Store(store),
            handle,
            TransferMode::CreateFromLocalSource,
            chunk_size,
            Local::Source(source),
            Some(size),
        ))
    }

    /// Creates a new file in `store_id` with the content of `data`.
    pub async fn create_from_buffer(
        store: Arc<dyn StoreApi>,
        store_id: &str,
        meta: &FileMeta,
        data: Vec<u8>,
        chunk_size: usize,
    ) -> Result<Self, TransferError> {
        validate_chunk_size(chunk_size)?;
        validate_remote_id("store", store_id)?;
        let size = data.len() as u64;
        let handle = store.create_file(store_id, meta, size).await?;
        Ok(Self::new(
            Remote::Store(store),
            handle,
            TransferMode::CreateFromBuffer,
            chunk_size,
            Local::Buffer {
                data: Some(data),
                offset: 0,
            },
            Some(size),
        ))
    }

    /// Replaces the content of `file_id` with the content of `source`.
    pub async fn update_from_source(
        store: Arc<dyn StoreApi>,
        file_id: &str,
        source: Box<dyn FileDataSource>,
        chunk_size: usize,
    ) -> Result<Self, TransferError> {
        validate_chunk_size(chunk_size)?;
        validate_remote_id("file", file_id)?;
        let size = source.size();
        let handle = store.update_file(file_id, source.meta(), size).await?;
        Ok(Self::new(
            Remote::Store(store),
            handle,
            TransferMode::UpdateFromLocalSource,
            chunk_size,
            Local::Source(source),
            Some(size),
        ))
    }

    /// Replaces the content of `file_id` with `data`.
    pub async fn update_from_buffer(
        store: Arc<dyn StoreApi>,
        file_id: &str,
        meta: &FileMeta,
        data: Vec<u8>,
        chunk_size: usize,
    ) -> Result<Self, TransferError> {
        validate_chunk_size(chunk_size)?;
        validate_remote_id("file", file_id)?;
        let size = data.len() as u64;
        let handle = store.update_file(file_id, meta, size).await?;
        Ok(Self::new(
            Remote::Store(store),
            handle,
            TransferMode::UpdateFromBuffer,
            chunk_size,
            Local::Buffer {
                data: Some(data),
                offset: 0,
            },
            Some(size),
        ))
    }

    /// Reserves an inbox attachment for `source`.
    ///
    /// Nothing can be written until [`bind_entry`](Self::bind_entry) supplies
    /// the entry the attachment belongs to.
    pub async fn attachment_from_source(
        inbox: Arc<dyn InboxApi>,
        source: Box<dyn FileDataSource>,
        chunk_size: usize,
    ) -> Result<Self, TransferError> {
        validate_chunk_size(chunk_size)?;
        let size = source.size();
        let handle = inbox.create_file_handle(source.meta(), size).await?;
        Ok(Self::new(
            Remote::Attachment { inbox, entry: None },
            handle,
            TransferMode::CreateFromLocalSource,
            chunk_size,
            Local::Source(source),
            Some(size),
        ))
    }

    /// Binds the entry an attachment belongs to. Ignored for store files.
    pub fn bind_entry(&mut self, entry: EntryHandle) {
        if let Remote::Attachment { entry: slot, .. } = &mut self.remote {
            *slot = Some(entry);
        }
    }

    pub fn handle(&self) -> RemoteFileHandle {
        self.handle
    }

    pub fn mode(&self) -> TransferMode {
        self.mode
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// `false` once a chunk came back shorter than the chunk size.
    pub fn has_data_left(&self) -> bool {
        self.has_data_left
    }

    /// Bytes moved across the boundary so far.
    pub fn bytes_transferred(&self) -> u64 {
        self.transferred
    }

    /// Declared size of an upload, `None` for downloads.
    pub fn declared_size(&self) -> Option<u64> {
        self.declared_size
    }

    /// Declared size of a finished upload that wrote a different number of
    /// bytes. `None` for downloads, unfinished uploads and exact matches.
    pub fn size_mismatch(&self) -> Option<u64> {
        self.declared_size
            .filter(|&declared| !self.has_data_left && declared != self.transferred)
    }

    /// Hex SHA-256 of the bytes moved so far.
    pub fn content_digest(&self) -> String {
        hex::encode(self.hasher.clone().finalize())
    }

    fn ensure_data_left(&self) -> Result<(), TransferError> {
        if self.has_data_left {
            Ok(())
        } else {
            Err(TransferError::InvalidState(format!(
                "{} has no data left",
                self.handle
            )))
        }
    }

    fn unbound_attachment(&self) -> TransferError {
        TransferError::InvalidState(format!("{} is not bound to an entry", self.handle))
    }

    fn record_chunk(&mut self, bytes: &[u8]) {
        self.transferred += bytes.len() as u64;
        self.hasher.update(bytes);
        if bytes.len() < self.chunk_size {
            self.has_data_left = false;
            debug!(
                handle = %self.handle,
                total = self.transferred,
                "end of data reached"
            );
        }
    }

    /// Uploads the next chunk. Upload modes only.
    ///
    /// `on_chunk_written` runs once, after the remote write succeeded, with
    /// the number of bytes written. A zero-length final chunk is not sent
    /// but still reported.
    pub async fn write_chunk(
        &mut self,
        on_chunk_written: impl FnOnce(usize) + Send,
    ) -> Result<usize, TransferError> {
        if self.mode.is_read() {
            return Err(TransferError::FileWrite {
                reason: format!("{} is open in {:?} mode", self.handle, self.mode),
                source: None,
            });
        }
        self.ensure_data_left()?;
        if let Remote::Attachment { entry: None, .. } = self.remote {
            return Err(self.unbound_attachment());
        }

        let chunk = match &mut self.local {
            Local::Source(source) => source.next_chunk(self.chunk_size).await?,
            Local::Buffer {
                data: Some(data),
                offset,
            } => {
                let end = offset.saturating_add(self.chunk_size).min(data.len());
                data[*offset..end].to_vec()
            }
            Local::Buffer { data: None, .. } => {
                return Err(TransferError::DataIntegrity(format!(
                    "upload buffer of {} is missing",
                    self.handle
                )));
            }
            Local::Sink(_) => {
                return Err(TransferError::InvalidState(format!(
                    "{} has a sink in an upload mode",
                    self.handle
                )));
            }
        };

        if !chunk.is_empty() {
            let result = match &self.remote {
                Remote::Store(store) => store.write_to_file(self.handle, &chunk).await,
                Remote::Attachment { inbox, entry } => match entry {
                    Some(entry) => inbox.write_to_file(*entry, self.handle, &chunk).await,
                    None => return Err(self.unbound_attachment()),
                },
            };
            result.map_err(|e| TransferError::FileWrite {
                reason: format!("remote write to {} failed", self.handle),
                source: Some(e),
            })?;
        }

        if let Local::Buffer { offset, .. } = &mut self.local {
            *offset += chunk.len();
        }
        self.record_chunk(&chunk);
        on_chunk_written(chunk.len());
        Ok(chunk.len())
    }

    /// Downloads the next chunk. Download modes only.
    ///
    /// `on_chunk_read` runs once, after the bytes reached the local side.
    pub async fn read_chunk(
        &mut self,
        on_chunk_read: impl FnOnce(usize) + Send,
    ) -> Result<usize, TransferError> {
        let Remote::Store(store) = &self.remote else {
            return Err(TransferError::FileRead {
                reason: format!("{} is an inbox attachment", self.handle),
                source: None,
            });
        };
        if !self.mode.is_read() {
            return Err(TransferError::FileRead {
                reason: format!("{} is open in {:?} mode", self.handle, self.mode),
                source: None,
            });
        }
        self.ensure_data_left()?;

        let chunk = store
            .read_from_file(self.handle, self.chunk_size as u64)
            .await
            .map_err(|e| TransferError::FileRead {
                reason: format!("remote read from {} failed", self.handle),
                source: Some(e),
            })?;
        if chunk.len() > self.chunk_size {
            return Err(TransferError::DataIntegrity(format!(
                "{} returned {} bytes for a {}-byte read",
                self.handle,
                chunk.len(),
                self.chunk_size
            )));
        }

        match &mut self.local {
            Local::Sink(sink) => sink.write_all(&chunk).await?,
            Local::Buffer {
                data: Some(data), ..
            } => data.extend_from_slice(&chunk),
            Local::Buffer { data: None, .. } => {
                return Err(TransferError::DataIntegrity(format!(
                    "download buffer of {} was already taken",
                    self.handle
                )));
            }
            Local::Source(_) => {
                return Err(TransferError::InvalidState(format!(
                    "{} has a source in a download mode",
                    self.handle
                )));
            }
        }

        self.record_chunk(&chunk);
        on_chunk_read(chunk.len());
        Ok(chunk.len())
    }

    /// Reads or writes the next chunk, whichever the mode calls for.
    pub async fn transfer_chunk(
        &mut self,
        on_chunk: impl FnOnce(usize) + Send,
    ) -> Result<usize, TransferError> {
        if self.mode.is_read() {
            self.read_chunk(on_chunk).await
        } else {
            self.write_chunk(on_chunk).await
        }
    }

    /// Moves the remote read cursor. Download modes only, before exhaustion.
    pub async fn seek(&mut self, position: u64) -> Result<(), TransferError> {
        let (Remote::Store(store), true) = (&self.remote, self.mode.is_read()) else {
            return Err(TransferError::InvalidState(format!(
                "cannot seek {} in {:?} mode",
                self.handle, self.mode
            )));
        };
        self.ensure_data_left()?;
        store
            .seek_in_file(self.handle, position)
            .await
            .map_err(|e| TransferError::FileRead {
                reason: format!("seek in {} to {position} failed", self.handle),
                source: Some(e),
            })
    }

    /// Content of a buffer-mode transfer.
    ///
    /// Downloads return what has arrived so far; uploads return what has not
    /// been sent yet.
    pub fn buffer(&self) -> Result<&[u8], TransferError> {
        match &self.local {
            Local::Buffer {
                data: Some(data),
                offset,
            } if self.mode.is_buffered() => {
                if self.mode.is_read() {
                    Ok(data.as_slice())
                } else {
                    Ok(&data[*offset..])
                }
            }
            _ => Err(missing_buffer(self.handle, self.mode)),
        }
    }

    /// Like [`buffer`](Self::buffer) but hands over ownership. A second call
    /// fails with [`TransferError::DataIntegrity`].
    pub fn take_buffer(&mut self) -> Result<Vec<u8>, TransferError> {
        let (handle, mode) = (self.handle, self.mode);
        match &mut self.local {
            Local::Buffer { data, offset } if mode.is_buffered() => {
                let mut taken = data.take().ok_or_else(|| missing_buffer(handle, mode))?;
                if !mode.is_read() {
                    taken.drain(..*offset);
                    *offset = 0;
                }
                Ok(taken)
            }
            _ => Err(missing_buffer(handle, mode)),
        }
    }

    /// Closes the local side, then the remote handle.
    ///
    /// Returns the permanent remote file id. Inbox attachments have no id
    /// until their entry is sent; for them the handle's text form is returned.
    pub async fn close(self) -> Result<String, TransferError> {
        let mismatch = self.size_mismatch();
        let Self {
            remote,
            handle,
            mode,
            local,
            declared_size,
            transferred,
            has_data_left,
            ..
        } = self;

        match local {
            Local::Source(mut source) => source.close().await?,
            Local::Sink(mut sink) => {
                sink.flush().await?;
                sink.shutdown().await?;
            }
            Local::Buffer { .. } => {}
        }

        if let Some(declared) = mismatch {
            warn!(
                %handle,
                transferred,
                declared,
                "upload size differs from declared size"
            );
        } else if let (Some(declared), true) = (declared_size, has_data_left) {
            warn!(%handle, transferred, declared, "closing an incomplete upload");
        }

        let file_id = match remote {
            Remote::Store(store) => store.close_file(handle).await?,
            Remote::Attachment { .. } => handle.to_string(),
        };

        info!(%handle, file_id = %file_id, ?mode, bytes = transferred, "transfer closed");
        Ok(file_id)
    }
}

fn missing_buffer(handle: RemoteFileHandle, mode: TransferMode) -> TransferError {
    TransferError::DataIntegrity(format!("no buffer available for {handle} in {mode:?} mode"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::BufferSource;
    use endpoint_bridge::{BridgeError, MemoryBridge};

    fn bridge() -> Arc<MemoryBridge> {
        Arc::new(MemoryBridge::new())
    }

    #[tokio::test]
    async fn small_buffer_upload_scenario() {
        let bridge = bridge();
        let source = BufferSource::new(b"ABCDEFGHI".to_vec(), FileMeta::default());
        let mut engine = ChunkTransferEngine::create_from_source(
            bridge.clone(),
            "store-1",
            Box::new(source),
            4,
        )
        .await
        .unwrap();

        let mut sizes = Vec::new();
        let mut flags = Vec::new();
        while engine.has_data_left() {
            engine.write_chunk(|n| sizes.push(n)).await.unwrap();
            flags.push(engine.has_data_left());
        }
        assert_eq!(sizes, vec![4, 4, 1]);
        assert_eq!(flags, vec![true, true, false]);

        let file_id = engine.close().await.unwrap();
        assert!(!file_id.is_empty());
        assert_eq!(bridge.file_data(&file_id).unwrap(), b"ABCDEFGHI");
        assert_eq!(bridge.write_calls(), 3);
    }

    #[tokio::test]
    async fn exact_multiple_ends_on_empty_chunk() {
        let bridge = bridge();
        let data = vec![7u8; 12];
        let mut engine = ChunkTransferEngine::create_from_buffer(
            bridge.clone(),
            "s",
            &FileMeta::default(),
            data.clone(),
            4,
        )
        .await
        .unwrap();

        let mut calls = 0;
        while engine.has_data_left() {
            engine.write_chunk(|_| calls += 1).await.unwrap();
        }
        assert_eq!(calls, 4);
        // The terminating empty chunk is not sent.
        assert_eq!(bridge.write_calls(), 3);

        let file_id = engine.close().await.unwrap();
        assert_eq!(bridge.file_data(&file_id).unwrap(), data);
    }

    #[tokio::test]
    async fn oversized_declared_size_still_uploads() {
        let bridge = bridge();
        let source =
            BufferSource::new(b"abc".to_vec(), FileMeta::default()).with_declared_size(u64::MAX);
        let mut engine =
            ChunkTransferEngine::create_from_source(bridge.clone(), "s", Box::new(source), 4)
                .await
                .unwrap();
        assert_eq!(engine.declared_size(), Some(u64::MAX));
        assert_eq!(engine.size_mismatch(), None);

        engine.write_chunk(|_| {}).await.unwrap();
        assert!(!engine.has_data_left());
        assert_eq!(engine.size_mismatch(), Some(u64::MAX));

        let file_id = engine.close().await.unwrap();
        assert_eq!(bridge.file_data(&file_id).unwrap(), b"abc");
        assert_eq!(bridge.open_handle_count(), 0);
    }

    #[tokio::test]
    async fn matching_declared_size_is_no_mismatch() {
        let bridge = bridge();
        let mut engine = ChunkTransferEngine::create_from_buffer(
            bridge,
            "s",
            &FileMeta::default(),
            b"abc".to_vec(),
            4,
        )
        .await
        .unwrap();
        engine.write_chunk(|_| {}).await.unwrap();
        assert_eq!(engine.size_mismatch(), None);
    }

    #[tokio::test]
    async fn exhausted_engine_refuses_more_chunks() {
        let bridge = bridge();
        let mut engine = ChunkTransferEngine::create_from_buffer(
            bridge,
            "s",
            &FileMeta::default(),
            b"ab".to_vec(),
            4,
        )
        .await
        .unwrap();
        engine.write_chunk(|_| {}).await.unwrap();
        assert!(!engine.has_data_left());

        let err = engine.write_chunk(|_| {}).await.unwrap_err();
        assert!(matches!(err, TransferError::InvalidState(_)));
        assert!(!engine.has_data_left());
    }

    #[tokio::test]
    async fn download_to_buffer_reassembles_content() {
        let bridge = bridge();
        let file_id = bridge.insert_file("s", FileMeta::default(), b"0123456789".to_vec());
        let mut engine = ChunkTransferEngine::open_to_buffer(bridge.clone(), &file_id, 3)
            .await
            .unwrap();

        let mut total = 0;
        while engine.has_data_left() {
            engine.read_chunk(|n| total += n).await.unwrap();
        }
        assert_eq!(total, 10);
        assert_eq!(engine.buffer().unwrap(), b"0123456789");
        assert_eq!(
            engine.content_digest(),
            hex::encode(Sha256::digest(b"0123456789"))
        );

        let data = engine.take_buffer().unwrap();
        assert_eq!(data, b"0123456789");
        assert!(matches!(
            engine.take_buffer(),
            Err(TransferError::DataIntegrity(_))
        ));
        assert_eq!(engine.close().await.unwrap(), file_id);
        assert_eq!(bridge.open_handle_count(), 0);
    }

    #[tokio::test]
    async fn download_to_sink_writes_local_file() {
        let bridge = bridge();
        let file_id = bridge.insert_file("s", FileMeta::default(), b"sink me".to_vec());
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        let sink = tokio::fs::File::create(&path).await.unwrap();

        let mut engine =
            ChunkTransferEngine::open_to_sink(bridge.clone(), &file_id, Box::new(sink), 4)
                .await
                .unwrap();
        while engine.has_data_left() {
            engine.read_chunk(|_| {}).await.unwrap();
        }
        assert!(matches!(
            engine.buffer(),
            Err(TransferError::DataIntegrity(_))
        ));
        engine.close().await.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"sink me");
    }

    #[tokio::test]
    async fn read_in_write_mode_is_file_read_error() {
        let bridge = bridge();
        let mut engine = ChunkTransferEngine::create_from_buffer(
            bridge,
            "s",
            &FileMeta::default(),
            b"x".to_vec(),
            4,
        )
        .await
        .unwrap();
        let err = engine.read_chunk(|_| {}).await.unwrap_err();
        assert!(matches!(err, TransferError::FileRead { source: None, .. }));
    }

    #[tokio::test]
    async fn write_in_read_mode_is_file_write_error() {
        let bridge = bridge();
        let file_id = bridge.insert_file("s", FileMeta::default(), b"x".to_vec());
        let mut engine = ChunkTransferEngine::open_to_buffer(bridge, &file_id, 4)
            .await
            .unwrap();
        let err = engine.write_chunk(|_| {}).await.unwrap_err();
        assert!(matches!(err, TransferError::FileWrite { source: None, .. }));
    }

    #[tokio::test]
    async fn remote_write_failure_skips_callback() {
        let bridge = bridge();
        bridge.fail_writes_after(Some(1));
        let mut engine = ChunkTransferEngine::create_from_buffer(
            bridge.clone(),
            "s",
            &FileMeta::default(),
            vec![1u8; 10],
            4,
        )
        .await
        .unwrap();

        let mut called = 0;
        engine.write_chunk(|_| called += 1).await.unwrap();
        let err = engine.write_chunk(|_| called += 1).await.unwrap_err();
        assert_eq!(called, 1);
        assert!(matches!(
            err,
            TransferError::FileWrite {
                source: Some(BridgeError::Rejected { .. }),
                ..
            }
        ));
        // The failed chunk stays in the buffer.
        assert_eq!(engine.buffer().unwrap().len(), 6);
        assert_eq!(engine.bytes_transferred(), 4);
    }

    #[tokio::test]
    async fn attachment_requires_bound_entry() {
        let bridge = bridge();
        let source = BufferSource::new(b"attach".to_vec(), FileMeta::default());
        let mut engine =
            ChunkTransferEngine::attachment_from_source(bridge.clone(), Box::new(source), 4)
                .await
                .unwrap();

        let err = engine.write_chunk(|_| {}).await.unwrap_err();
        assert!(matches!(err, TransferError::InvalidState(_)));
        assert!(engine.has_data_left());

        let entry = endpoint_bridge::InboxApi::prepare_entry(
            bridge.as_ref(),
            "inbox",
            b"",
            &[engine.handle()],
        )
        .await
        .unwrap();
        engine.bind_entry(entry);
        while engine.has_data_left() {
            engine.write_chunk(|_| {}).await.unwrap();
        }
        let id = engine.close().await.unwrap();
        assert!(id.starts_with("file-handle:"));
    }

    #[tokio::test]
    async fn seek_supports_ranged_download() {
        let bridge = bridge();
        let file_id = bridge.insert_file("s", FileMeta::default(), b"0123456789".to_vec());
        let mut engine = ChunkTransferEngine::open_to_buffer(bridge, &file_id, 4)
            .await
            .unwrap();
        engine.seek(5).await.unwrap();
        while engine.has_data_left() {
            engine.read_chunk(|_| {}).await.unwrap();
        }
        assert_eq!(engine.buffer().unwrap(), b"56789");
        assert!(matches!(
            engine.seek(0).await,
            Err(TransferError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn seek_in_upload_mode_is_invalid() {
        let bridge = bridge();
        let mut engine = ChunkTransferEngine::create_from_buffer(
            bridge,
            "s",
            &FileMeta::default(),
            b"x".to_vec(),
            4,
        )
        .await
        .unwrap();
        assert!(matches!(
            engine.seek(0).await,
            Err(TransferError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn zero_chunk_size_rejected_before_opening() {
        let bridge = bridge();
        let err = ChunkTransferEngine::create_from_buffer(
            bridge.clone(),
            "s",
            &FileMeta::default(),
            b"x".to_vec(),
            0,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, TransferError::InvalidChunkSize(0)));
        assert_eq!(bridge.open_handle_count(), 0);
    }

    #[tokio::test]
    async fn update_from_buffer_replaces_file() {
        let bridge = bridge();
        let file_id = bridge.insert_file("s", FileMeta::default(), b"old".to_vec());
        let meta = FileMeta::new(b"v2".to_vec(), Vec::new());
        let mut engine = ChunkTransferEngine::update_from_buffer(
            bridge.clone(),
            &file_id,
            &meta,
            b"new content".to_vec(),
            4,
        )
        .await
        .unwrap();
        assert_eq!(engine.mode(), TransferMode::UpdateFromBuffer);
        while engine.has_data_left() {
            engine.write_chunk(|_| {}).await.unwrap();
        }
        assert_eq!(engine.close().await.unwrap(), file_id);
        assert_eq!(bridge.file_data(&file_id).unwrap(), b"new content");
        assert_eq!(bridge.file_meta(&file_id).unwrap(), meta);
    }

    #[tokio::test]
    async fn take_buffer_on_upload_returns_unsent_bytes() {
        let bridge = bridge();
        let mut engine = ChunkTransferEngine::create_from_buffer(
            bridge,
            "s",
            &FileMeta::default(),
            b"ABCDEFGHI".to_vec(),
            4,
        )
        .await
        .unwrap();
        engine.write_chunk(|_| {}).await.unwrap();
        assert_eq!(engine.take_buffer().unwrap(), b"EFGHI");
        let err = engine.write_chunk(|_| {}).await.unwrap_err();
        assert!(matches!(err, TransferError::DataIntegrity(_)));
    }
}
