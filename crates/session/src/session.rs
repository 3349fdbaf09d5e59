//! Session facade.

use std::path::Path;
use std::sync::Arc;

use endpoint_bridge::{EventApi, InboxApi, StoreApi};
use endpoint_entry::{EntryError, EntryOptions, EntryUploadHandler};
use endpoint_events::{EventError, EventRegistry, run_event_pump};
use endpoint_protocol::FileMeta;
use endpoint_transfer::{
    ChunkCallback, ChunkTransferEngine, DriveOutcome, FileDataSource, LocalFileSource,
    TransferError, drive, validate_chunk_size,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{ConfigError, TransferConfig};

/// Per-call knobs for a facade transfer.
#[derive(Clone, Default)]
pub struct TransferOptions {
    /// Overrides the configured default chunk size.
    pub chunk_size: Option<usize>,
    /// Checked between chunks.
    pub cancel: CancellationToken,
    /// Called with the byte count of every completed chunk.
    pub on_chunk: Option<ChunkCallback>,
}

impl TransferOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = Some(chunk_size);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn on_chunk(mut self, callback: ChunkCallback) -> Self {
        self.on_chunk = Some(callback);
        self
    }

    fn notify(&self, bytes: usize) {
        if let Some(callback) = &self.on_chunk {
            callback(bytes);
        }
    }
}

/// Entry point for transfers against one bridge.
pub struct EndpointSession {
    store: Arc<dyn StoreApi>,
    inbox: Arc<dyn InboxApi>,
    event_api: Arc<dyn EventApi>,
    events: Arc<EventRegistry>,
    config: TransferConfig,
}

impl EndpointSession {
    /// Builds a session over a bridge that implements every API.
    pub fn new<B>(bridge: Arc<B>, config: TransferConfig) -> Result<Self, ConfigError>
    where
        B: StoreApi + InboxApi + EventApi + 'static,
    {
        Self::from_parts(bridge.clone(), bridge.clone(), bridge, config)
    }

    pub fn from_parts(
        store: Arc<dyn StoreApi>,
        inbox: Arc<dyn InboxApi>,
        event_api: Arc<dyn EventApi>,
        config: TransferConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let events = Arc::new(EventRegistry::new(Arc::clone(&event_api)));
        Ok(Self {
            store,
            inbox,
            event_api,
            events,
            config,
        })
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    /// Callback registry for this session's bridge.
    pub fn events(&self) -> &Arc<EventRegistry> {
        &self.events
    }

    /// Starts dispatching bridge events into [`events`](Self::events).
    pub fn spawn_event_pump(
        &self,
        cancel: CancellationToken,
    ) -> JoinHandle<Result<(), EventError>> {
        tokio::spawn(run_event_pump(
            Arc::clone(&self.event_api),
            Arc::clone(&self.events),
            cancel,
        ))
    }

    fn chunk_size(&self, requested: Option<usize>) -> Result<usize, TransferError> {
        let chunk_size = requested.unwrap_or(self.config.default_chunk_size);
        if chunk_size > self.config.max_chunk_size {
            return Err(TransferError::InvalidChunkSize(chunk_size));
        }
        validate_chunk_size(chunk_size)?;
        Ok(chunk_size)
    }

    /// Uploads the local file at `path` as a new file in `store_id`.
    /// Returns the new file id.
    pub async fn start_uploading_new_file(
        &self,
        store_id: &str,
        path: impl AsRef<Path>,
        meta: FileMeta,
        options: TransferOptions,
    ) -> Result<String, TransferError> {
        let source = LocalFileSource::open(path.as_ref(), meta).await?;
        self.start_uploading_new_file_from_source(store_id, Box::new(source), options)
            .await
    }

    /// Uploads `data` as a new file in `store_id`.
    pub async fn start_uploading_new_file_from_buffer(
        &self,
        store_id: &str,
        data: Vec<u8>,
        meta: &FileMeta,
        options: TransferOptions,
    ) -> Result<String, TransferError> {
        let chunk_size = self.chunk_size(options.chunk_size)?;
        let engine = ChunkTransferEngine::create_from_buffer(
            Arc::clone(&self.store),
            store_id,
            meta,
            data,
            chunk_size,
        )
        .await?;
        let (file_id, ()) = run_and_close(engine, &options, |_| Ok(())).await?;
        Ok(file_id)
    }

    /// Uploads the content of any [`FileDataSource`] as a new file.
    pub async fn start_uploading_new_file_from_source(
        &self,
        store_id: &str,
        source: Box<dyn FileDataSource>,
        options: TransferOptions,
    ) -> Result<String, TransferError> {
        let chunk_size = self.chunk_size(options.chunk_size)?;
        let engine = ChunkTransferEngine::create_from_source(
            Arc::clone(&self.store),
            store_id,
            source,
            chunk_size,
        )
        .await?;
        let (file_id, ()) = run_and_close(engine, &options, |_| Ok(())).await?;
        Ok(file_id)
    }

    /// Replaces the content and metadata of `file_id` with the local file at
    /// `path`.
    pub async fn start_updating_file(
        &self,
        file_id: &str,
        path: impl AsRef<Path>,
        meta: FileMeta,
        options: TransferOptions,
    ) -> Result<String, TransferError> {
        let chunk_size = self.chunk_size(options.chunk_size)?;
        let source = LocalFileSource::open(path.as_ref(), meta).await?;
        let engine = ChunkTransferEngine::update_from_source(
            Arc::clone(&self.store),
            file_id,
            Box::new(source),
            chunk_size,
        )
        .await?;
        let (file_id, ()) = run_and_close(engine, &options, |_| Ok(())).await?;
        Ok(file_id)
    }

    /// Replaces the content and metadata of `file_id` with `data`.
    pub async fn start_updating_file_from_buffer(
        &self,
        file_id: &str,
        data: Vec<u8>,
        meta: &FileMeta,
        options: TransferOptions,
    ) -> Result<String, TransferError> {
        let chunk_size = self.chunk_size(options.chunk_size)?;
        let engine = ChunkTransferEngine::update_from_buffer(
            Arc::clone(&self.store),
            file_id,
            meta,
            data,
            chunk_size,
        )
        .await?;
        let (file_id, ()) = run_and_close(engine, &options, |_| Ok(())).await?;
        Ok(file_id)
    }

    /// Downloads `file_id` into a local file at `path`, replacing it.
    pub async fn start_downloading_to_file(
        &self,
        file_id: &str,
        path: impl AsRef<Path>,
        options: TransferOptions,
    ) -> Result<String, TransferError> {
        let chunk_size = self.chunk_size(options.chunk_size)?;
        let sink = tokio::fs::File::create(path.as_ref()).await?;
        let engine = ChunkTransferEngine::open_to_sink(
            Arc::clone(&self.store),
            file_id,
            Box::new(sink),
            chunk_size,
        )
        .await?;
        let (file_id, ()) = run_and_close(engine, &options, |_| Ok(())).await?;
        Ok(file_id)
    }

    /// Downloads `file_id` into memory.
    pub async fn start_downloading_to_buffer(
        &self,
        file_id: &str,
        options: TransferOptions,
    ) -> Result<Vec<u8>, TransferError> {
        let chunk_size = self.chunk_size(options.chunk_size)?;
        let engine =
            ChunkTransferEngine::open_to_buffer(Arc::clone(&self.store), file_id, chunk_size)
                .await?;
        let (_, data) = run_and_close(engine, &options, ChunkTransferEngine::take_buffer).await?;
        Ok(data)
    }

    /// Prepares an inbox entry with one attachment per source.
    pub async fn prepare_entry_handler(
        &self,
        inbox_id: &str,
        payload: &[u8],
        sources: Vec<Box<dyn FileDataSource>>,
    ) -> Result<EntryUploadHandler, EntryError> {
        let options = EntryOptions {
            chunk_size: self.config.default_chunk_size,
            event_buffer: self.config.event_buffer,
        };
        EntryUploadHandler::prepare(Arc::clone(&self.inbox), inbox_id, payload, sources, options)
            .await
    }
}

/// Drives `engine` to the end and closes it.
///
/// `extract` runs on a fully transferred engine, before it is closed. The
/// engine is closed on every path, so the remote handle is always released.
async fn run_and_close<T>(
    mut engine: ChunkTransferEngine,
    options: &TransferOptions,
    extract: impl FnOnce(&mut ChunkTransferEngine) -> Result<T, TransferError>,
) -> Result<(String, T), TransferError> {
    let handle = engine.handle();
    let outcome = match drive(&mut engine, &options.cancel, |n| options.notify(n)).await {
        Ok(outcome) => outcome,
        Err(e) => {
            if let Err(close_err) = engine.close().await {
                warn!(%handle, error = %close_err, "close after failed transfer also failed");
            }
            return Err(e);
        }
    };

    if outcome == DriveOutcome::Cancelled {
        engine.close().await?;
        warn!(%handle, "transfer cancelled");
        return Err(TransferError::Cancelled);
    }

    let extracted = match extract(&mut engine) {
        Ok(value) => value,
        Err(e) => {
            engine.close().await?;
            return Err(e);
        }
    };
    let file_id = engine.close().await?;
    info!(%handle, file_id = %file_id, "transfer complete");
    Ok((file_id, extracted))
}
