//! Entry upload handler.
//!
//! Attachments upload on a [`JoinSet`], one task per file. The first task to
//! fail latches its error and cancels the rest; later failures are dropped.

use std::sync::{Arc, Mutex};

use endpoint_bridge::InboxApi;
use endpoint_protocol::EntryHandle;
use endpoint_transfer::{
    ChunkTransferEngine, DriveOutcome, FileDataSource, ProgressTracker, TransferError,
    TransferProgress, drive, validate_remote_id,
};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::EntryError;
use crate::types::{EntryEvent, EntryOptions, TransferState};

struct Latch {
    state: TransferState,
    error: Option<EntryError>,
    /// `start_sending` or `send_entry` is in flight.
    busy: bool,
}

/// State shared between the handler and its attachment tasks.
struct Shared {
    latch: Mutex<Latch>,
    events_tx: mpsc::Sender<EntryEvent>,
    cancel: CancellationToken,
}

impl Shared {
    fn emit(&self, event: EntryEvent) {
        // Transfers never wait on a slow consumer.
        let _ = self.events_tx.try_send(event);
    }

    fn set_state(&self, latch: &mut Latch, to: TransferState) {
        let from = latch.state;
        if from == to {
            return;
        }
        latch.state = to;
        debug!(%from, %to, "entry state changed");
        self.emit(EntryEvent::StateChanged { from, to });
    }

    /// Moves to `Error` and latches `err`, unless the entry already settled.
    /// Returns `true` if this call won.
    fn fail(&self, err: EntryError) -> bool {
        let mut latch = self.latch.lock().unwrap();
        if latch.state.is_terminal() {
            warn!(state = %latch.state, error = %err, "dropping failure");
            return false;
        }
        error!(error = %err, "entry failed");
        latch.error = Some(err);
        self.set_state(&mut latch, TransferState::Error);
        drop(latch);
        self.cancel.cancel();
        true
    }
}

/// One inbox entry and its attachments.
pub struct EntryUploadHandler {
    inbox: Arc<dyn InboxApi>,
    entry: EntryHandle,
    attachments: usize,
    engines: Mutex<Vec<ChunkTransferEngine>>,
    progress: Arc<ProgressTracker>,
    shared: Arc<Shared>,
    events_rx: Option<mpsc::Receiver<EntryEvent>>,
}

impl EntryUploadHandler {
    /// Reserves an attachment handle per source and prepares the entry.
    ///
    /// Nothing is uploaded yet; the handler starts in
    /// [`TransferState::Prepared`].
    pub async fn prepare(
        inbox: Arc<dyn InboxApi>,
        inbox_id: &str,
        payload: &[u8],
        sources: Vec<Box<dyn FileDataSource>>,
        options: EntryOptions,
    ) -> Result<Self, EntryError> {
        validate_remote_id("inbox", inbox_id)?;

        let mut engines = Vec::with_capacity(sources.len());
        for source in sources {
            let engine = ChunkTransferEngine::attachment_from_source(
                Arc::clone(&inbox),
                source,
                options.chunk_size,
            )
            .await?;
            engines.push(engine);
        }

        let handles: Vec<_> = engines.iter().map(ChunkTransferEngine::handle).collect();
        let entry = inbox.prepare_entry(inbox_id, payload, &handles).await?;
        for engine in &mut engines {
            engine.bind_entry(entry);
        }

        let progress = Arc::new(ProgressTracker::new(
            engines.iter().map(|e| e.declared_size().unwrap_or(0)),
        ));
        let (events_tx, events_rx) = mpsc::channel(options.event_buffer.max(1));
        info!(%entry, inbox = inbox_id, attachments = engines.len(), "entry prepared");

        Ok(Self {
            inbox,
            entry,
            attachments: engines.len(),
            engines: Mutex::new(engines),
            progress,
            shared: Arc::new(Shared {
                latch: Mutex::new(Latch {
                    state: TransferState::Prepared,
                    error: None,
                    busy: false,
                }),
                events_tx,
                cancel: CancellationToken::new(),
            }),
            events_rx: Some(events_rx),
        })
    }

    /// Takes the event receiver. Can only be called once.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<EntryEvent>> {
        self.events_rx.take()
    }

    pub fn entry_handle(&self) -> EntryHandle {
        self.entry
    }

    pub fn attachment_count(&self) -> usize {
        self.attachments
    }

    pub fn state(&self) -> TransferState {
        self.shared.latch.lock().unwrap().state
    }

    /// The latched failure, if the entry is in [`TransferState::Error`].
    pub fn last_error(&self) -> Option<EntryError> {
        self.shared.latch.lock().unwrap().error.clone()
    }

    /// Bytes uploaded across all attachments.
    pub fn progress(&self) -> TransferProgress {
        self.progress.overall()
    }

    /// Uploads every attachment concurrently and waits for all of them.
    ///
    /// Returns the resulting state: `FilesSent` when every attachment
    /// completed, `Error` or `Aborted` otherwise. Only legal from `Prepared`.
    pub async fn start_sending(&self) -> Result<TransferState, EntryError> {
        {
            let mut latch = self.shared.latch.lock().unwrap();
            if latch.state != TransferState::Prepared || latch.busy {
                return Err(EntryError::InvalidState {
                    state: latch.state,
                    operation: "start sending",
                });
            }
            latch.busy = true;
        }

        let engines = std::mem::take(&mut *self.engines.lock().unwrap());
        info!(entry = %self.entry, attachments = engines.len(), "sending attachments");

        let mut tasks = JoinSet::new();
        for (index, engine) in engines.into_iter().enumerate() {
            tasks.spawn(upload_attachment(
                index,
                engine,
                Arc::clone(&self.shared),
                Arc::clone(&self.progress),
            ));
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                let err = TransferError::InvalidState(format!("attachment task failed: {e}"));
                self.shared.fail(err.into());
            }
        }

        let mut latch = self.shared.latch.lock().unwrap();
        latch.busy = false;
        if latch.state == TransferState::Prepared {
            self.shared.set_state(&mut latch, TransferState::FilesSent);
        }
        Ok(latch.state)
    }

    /// Submits the entry. Only legal from `FilesSent`; from `Error` the
    /// latched failure is returned again.
    pub async fn send_entry(&self) -> Result<(), EntryError> {
        {
            let mut latch = self.shared.latch.lock().unwrap();
            match latch.state {
                TransferState::FilesSent if !latch.busy => latch.busy = true,
                TransferState::Error => {
                    return Err(latch.error.clone().unwrap_or(EntryError::InvalidState {
                        state: TransferState::Error,
                        operation: "send the entry",
                    }));
                }
                state => {
                    return Err(EntryError::InvalidState {
                        state,
                        operation: "send the entry",
                    });
                }
            }
        }

        let result = self.inbox.send_entry(self.entry).await;
        self.shared.latch.lock().unwrap().busy = false;

        match result {
            Ok(()) => {
                let mut latch = self.shared.latch.lock().unwrap();
                self.shared.set_state(&mut latch, TransferState::Sent);
                info!(entry = %self.entry, "entry sent");
                Ok(())
            }
            Err(e) => {
                let err = EntryError::from(e);
                self.shared.fail(err.clone());
                Err(err)
            }
        }
    }

    /// Stops in-flight attachments at their next chunk boundary.
    ///
    /// Legal from `Prepared` and `FilesSent`, but not while the entry itself
    /// is being submitted.
    pub fn cancel(&self) -> Result<(), EntryError> {
        let mut latch = self.shared.latch.lock().unwrap();
        match latch.state {
            TransferState::Prepared => {}
            TransferState::FilesSent if !latch.busy => {}
            state => {
                return Err(EntryError::InvalidState {
                    state,
                    operation: "cancel",
                });
            }
        }
        self.shared.set_state(&mut latch, TransferState::Aborted);
        drop(latch);
        self.shared.cancel.cancel();
        info!(entry = %self.entry, "entry cancelled");
        Ok(())
    }
}

async fn upload_attachment(
    index: usize,
    mut engine: ChunkTransferEngine,
    shared: Arc<Shared>,
    progress: Arc<ProgressTracker>,
) {
    let handle = engine.handle();
    let outcome = drive(&mut engine, &shared.cancel, |bytes| {
        if let Some(p) = progress.record(index, bytes) {
            shared.emit(EntryEvent::FileProgress { index, progress: p });
        }
    })
    .await;
    let bytes = engine.bytes_transferred();
    let closed = engine.close().await;

    match (outcome, closed) {
        (Ok(DriveOutcome::Completed), Ok(_)) => {
            debug!(index, %handle, bytes, "attachment uploaded");
            shared.emit(EntryEvent::FileCompleted { index, bytes });
        }
        (Ok(DriveOutcome::Cancelled), _) => {
            debug!(index, %handle, bytes, "attachment stopped");
        }
        (Err(e), _) | (Ok(DriveOutcome::Completed), Err(e)) => {
            shared.fail(e.into());
        }
    }
}
