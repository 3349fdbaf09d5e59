//! In-memory implementation of the bridge traits.
//!
//! Behaves like a single-user Endpoint instance with no encryption and no
//! network: files and entries live in a map, handles are counters. Used by
//! the test suites and the CLI, and handy for exercising failure paths
//! through the fault switches.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use endpoint_protocol::{EntryHandle, Event, EventChannel, EventType, FileMeta, RemoteFileHandle};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::{BridgeError, BridgeFuture, EventApi, InboxApi, StoreApi};

/// Error code used for injected write failures.
pub const FAULT_WRITE_CODE: i32 = -100;

/// Largest up-front reservation for a declared file size.
const MAX_RESERVE: usize = 1024 * 1024;

/// Error code used for injected send failures.
pub const FAULT_SEND_CODE: i32 = -101;

/// Bytes to reserve for a file of `declared` size. The size is only a hint.
fn reserve_len(declared: u64) -> usize {
    usize::try_from(declared).unwrap_or(usize::MAX).min(MAX_RESERVE)
}

fn content_buffer(declared: u64) -> Vec<u8> {
    Vec::with_capacity(reserve_len(declared))
}

#[derive(Debug, Clone)]
struct StoredFile {
    store_id: String,
    meta: FileMeta,
    data: Vec<u8>,
}

#[derive(Debug)]
enum OpenHandle {
    Read {
        file_id: String,
        position: usize,
    },
    Create {
        store_id: String,
        meta: FileMeta,
        data: Vec<u8>,
    },
    Update {
        file_id: String,
        meta: FileMeta,
        data: Vec<u8>,
    },
    Attachment {
        meta: FileMeta,
        data: Vec<u8>,
        entry: Option<u64>,
    },
}

#[derive(Debug)]
struct PreparedEntry {
    inbox_id: String,
    payload: Vec<u8>,
    files: Vec<u64>,
}

/// An entry that was submitted through [`InboxApi::send_entry`].
#[derive(Debug, Clone, PartialEq)]
pub struct SentEntry {
    pub entry_id: String,
    pub inbox_id: String,
    pub payload: Vec<u8>,
    pub files: Vec<(FileMeta, Vec<u8>)>,
}

#[derive(Default)]
struct BridgeInner {
    next_handle: u64,
    files: HashMap<String, StoredFile>,
    handles: HashMap<u64, OpenHandle>,
    entries: HashMap<u64, PreparedEntry>,
    sent: Vec<SentEntry>,
    subscriptions: HashSet<EventChannel>,
    write_calls: usize,
    fail_writes_after: Option<usize>,
    fail_send: bool,
}

impl BridgeInner {
    fn next_handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    /// Counts a write and applies the fault switch.
    fn admit_write(&mut self) -> Result<(), BridgeError> {
        if let Some(limit) = self.fail_writes_after
            && self.write_calls >= limit
        {
            return Err(BridgeError::rejected(FAULT_WRITE_CODE, "injected write failure"));
        }
        self.write_calls += 1;
        Ok(())
    }
}

/// In-memory Endpoint stand-in.
pub struct MemoryBridge {
    inner: Mutex<BridgeInner>,
    events_tx: mpsc::UnboundedSender<Event>,
    events_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Event>>,
}

impl Default for MemoryBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBridge {
    pub fn new() -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            inner: Mutex::new(BridgeInner::default()),
            events_tx,
            events_rx: tokio::sync::Mutex::new(events_rx),
        }
    }

    /// Stores a file directly and returns its id. Useful to seed downloads.
    pub fn insert_file(&self, store_id: &str, meta: FileMeta, data: Vec<u8>) -> String {
        let file_id = uuid::Uuid::new_v4().to_string();
        let mut inner = self.inner.lock().unwrap();
        inner.files.insert(
            file_id.clone(),
            StoredFile {
                store_id: store_id.to_string(),
                meta,
                data,
            },
        );
        file_id
    }

    /// Returns the stored content of a file.
    pub fn file_data(&self, file_id: &str) -> Option<Vec<u8>> {
        let inner = self.inner.lock().unwrap();
        inner.files.get(file_id).map(|f| f.data.clone())
    }

    /// Returns the stored metadata of a file.
    pub fn file_meta(&self, file_id: &str) -> Option<FileMeta> {
        let inner = self.inner.lock().unwrap();
        inner.files.get(file_id).map(|f| f.meta.clone())
    }

    /// Returns the id of the store a file belongs to.
    pub fn file_store(&self, file_id: &str) -> Option<String> {
        let inner = self.inner.lock().unwrap();
        inner.files.get(file_id).map(|f| f.store_id.clone())
    }

    /// Entries submitted so far, in order.
    pub fn sent_entries(&self) -> Vec<SentEntry> {
        self.inner.lock().unwrap().sent.clone()
    }

    /// Number of handles not yet closed (or consumed by a sent entry).
    pub fn open_handle_count(&self) -> usize {
        self.inner.lock().unwrap().handles.len()
    }

    /// Number of successful write calls, store and inbox combined.
    pub fn write_calls(&self) -> usize {
        self.inner.lock().unwrap().write_calls
    }

    /// Makes every write after the first `successful` ones fail.
    pub fn fail_writes_after(&self, successful: Option<usize>) {
        self.inner.lock().unwrap().fail_writes_after = successful;
    }

    /// Makes `send_entry` fail while set.
    pub fn fail_send_entry(&self, fail: bool) {
        self.inner.lock().unwrap().fail_send = fail;
    }

    pub fn is_subscribed(&self, channel: &EventChannel) -> bool {
        self.inner.lock().unwrap().subscriptions.contains(channel)
    }

    /// Queues `event` if its channel is subscribed. Returns whether it was queued.
    pub fn publish(&self, event: Event) -> bool {
        let subscribed = self
            .inner
            .lock()
            .unwrap()
            .subscriptions
            .contains(&event.channel);
        if subscribed {
            trace!(channel = %event.channel, kind = ?event.kind, "queueing event");
            // The receiver lives as long as `self`, so this cannot fail.
            let _ = self.events_tx.send(event);
        }
        subscribed
    }

    fn handle_error(handle: u64) -> BridgeError {
        BridgeError::InvalidHandle(RemoteFileHandle(handle).to_string())
    }

    fn close_sync(&self, handle: RemoteFileHandle) -> Result<String, BridgeError> {
        let (file_id, event) = {
            let mut inner = self.inner.lock().unwrap();
            let open = inner
                .handles
                .remove(&handle.0)
                .ok_or_else(|| Self::handle_error(handle.0))?;

            match open {
                OpenHandle::Read { file_id, .. } => (file_id, None),
                OpenHandle::Create {
                    store_id,
                    meta,
                    data,
                } => {
                    let file_id = uuid::Uuid::new_v4().to_string();
                    let channel = EventChannel::StoreFiles(store_id.clone());
                    inner.files.insert(
                        file_id.clone(),
                        StoredFile {
                            store_id,
                            meta,
                            data,
                        },
                    );
                    let event = Event::new(channel, EventType::StoreFileCreated, file_id.clone());
                    (file_id, Some(event))
                }
                OpenHandle::Update {
                    file_id,
                    meta,
                    data,
                } => {
                    let stored = inner
                        .files
                        .get_mut(&file_id)
                        .ok_or_else(|| BridgeError::NotFound(file_id.clone()))?;
                    stored.meta = meta;
                    stored.data = data;
                    let channel = EventChannel::StoreFiles(stored.store_id.clone());
                    let event = Event::new(channel, EventType::StoreFileUpdated, file_id.clone());
                    (file_id, Some(event))
                }
                attachment @ OpenHandle::Attachment { .. } => {
                    // Attachments are committed by `send_entry`, not closed.
                    inner.handles.insert(handle.0, attachment);
                    return Err(Self::handle_error(handle.0));
                }
            }
        };

        if let Some(event) = event {
            self.publish(event);
        }
        debug!(%handle, file_id = %file_id, "closed remote file");
        Ok(file_id)
    }

    fn send_entry_sync(&self, entry: EntryHandle) -> Result<(), BridgeError> {
        let event = {
            let mut inner = self.inner.lock().unwrap();
            if inner.fail_send {
                return Err(BridgeError::rejected(FAULT_SEND_CODE, "injected send failure"));
            }
            let prepared = inner
                .entries
                .remove(&entry.0)
                .ok_or_else(|| BridgeError::InvalidHandle(entry.to_string()))?;

            let mut files = Vec::with_capacity(prepared.files.len());
            for handle in &prepared.files {
                match inner.handles.remove(handle) {
                    Some(OpenHandle::Attachment { meta, data, .. }) => files.push((meta, data)),
                    _ => return Err(Self::handle_error(*handle)),
                }
            }

            let entry_id = uuid::Uuid::new_v4().to_string();
            let channel = EventChannel::InboxEntries(prepared.inbox_id.clone());
            inner.sent.push(SentEntry {
                entry_id: entry_id.clone(),
                inbox_id: prepared.inbox_id,
                payload: prepared.payload,
                files,
            });
            Event::new(channel, EventType::InboxEntryCreated, entry_id)
        };

        self.publish(event);
        Ok(())
    }
}

impl StoreApi for MemoryBridge {
    fn open_file<'a>(&'a self, file_id: &'a str) -> BridgeFuture<'a, RemoteFileHandle> {
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap();
            if !inner.files.contains_key(file_id) {
                return Err(BridgeError::NotFound(file_id.to_string()));
            }
            let handle = inner.next_handle();
            inner.handles.insert(
                handle,
                OpenHandle::Read {
                    file_id: file_id.to_string(),
                    position: 0,
                },
            );
            Ok(RemoteFileHandle(handle))
        })
    }

    fn create_file<'a>(
        &'a self,
        store_id: &'a str,
        meta: &'a FileMeta,
        size: u64,
    ) -> BridgeFuture<'a, RemoteFileHandle> {
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap();
            let handle = inner.next_handle();
            inner.handles.insert(
                handle,
                OpenHandle::Create {
                    store_id: store_id.to_string(),
                    meta: meta.clone(),
                    data: content_buffer(size),
                },
            );
            Ok(RemoteFileHandle(handle))
        })
    }

    fn update_file<'a>(
        &'a self,
        file_id: &'a str,
        meta: &'a FileMeta,
        size: u64,
    ) -> BridgeFuture<'a, RemoteFileHandle> {
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap();
            if !inner.files.contains_key(file_id) {
                return Err(BridgeError::NotFound(file_id.to_string()));
            }
            let handle = inner.next_handle();
            inner.handles.insert(
                handle,
                OpenHandle::Update {
                    file_id: file_id.to_string(),
                    meta: meta.clone(),
                    data: content_buffer(size),
                },
            );
            Ok(RemoteFileHandle(handle))
        })
    }

    fn read_from_file(&self, handle: RemoteFileHandle, length: u64) -> BridgeFuture<'_, Vec<u8>> {
        Box::pin(async move {
            let mut guard = self.inner.lock().unwrap();
            let inner = &mut *guard;
            let Some(OpenHandle::Read { file_id, position }) = inner.handles.get_mut(&handle.0)
            else {
                return Err(Self::handle_error(handle.0));
            };
            let file = inner
                .files
                .get(file_id.as_str())
                .ok_or_else(|| BridgeError::NotFound(file_id.clone()))?;

            let start = (*position).min(file.data.len());
            let end = start.saturating_add(length as usize).min(file.data.len());
            *position = end;
            Ok(file.data[start..end].to_vec())
        })
    }

    fn write_to_file<'a>(
        &'a self,
        handle: RemoteFileHandle,
        data: &'a [u8],
    ) -> BridgeFuture<'a, ()> {
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap();
            if !matches!(
                inner.handles.get(&handle.0),
                Some(OpenHandle::Create { .. } | OpenHandle::Update { .. })
            ) {
                return Err(Self::handle_error(handle.0));
            }
            inner.admit_write()?;
            if let Some(OpenHandle::Create { data: buf, .. } | OpenHandle::Update { data: buf, .. }) =
                inner.handles.get_mut(&handle.0)
            {
                buf.extend_from_slice(data);
            }
            Ok(())
        })
    }

    fn seek_in_file(&self, handle: RemoteFileHandle, position: u64) -> BridgeFuture<'_, ()> {
        Box::pin(async move {
            let mut guard = self.inner.lock().unwrap();
            let inner = &mut *guard;
            let Some(OpenHandle::Read {
                file_id,
                position: cursor,
            }) = inner.handles.get_mut(&handle.0)
            else {
                return Err(Self::handle_error(handle.0));
            };
            let len = inner
                .files
                .get(file_id.as_str())
                .map(|f| f.data.len())
                .ok_or_else(|| BridgeError::NotFound(file_id.clone()))?;
            if position as usize > len {
                return Err(BridgeError::rejected(
                    22,
                    format!("seek position {position} beyond end of file ({len} bytes)"),
                ));
            }
            *cursor = position as usize;
            Ok(())
        })
    }

    fn close_file(&self, handle: RemoteFileHandle) -> BridgeFuture<'_, String> {
        Box::pin(async move { self.close_sync(handle) })
    }
}

impl InboxApi for MemoryBridge {
    fn create_file_handle<'a>(
        &'a self,
        meta: &'a FileMeta,
        size: u64,
    ) -> BridgeFuture<'a, RemoteFileHandle> {
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap();
            let handle = inner.next_handle();
            inner.handles.insert(
                handle,
                OpenHandle::Attachment {
                    meta: meta.clone(),
                    data: content_buffer(size),
                    entry: None,
                },
            );
            Ok(RemoteFileHandle(handle))
        })
    }

    fn prepare_entry<'a>(
        &'a self,
        inbox_id: &'a str,
        payload: &'a [u8],
        file_handles: &'a [RemoteFileHandle],
    ) -> BridgeFuture<'a, EntryHandle> {
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap();
            for handle in file_handles {
                match inner.handles.get(&handle.0) {
                    Some(OpenHandle::Attachment { entry: None, .. }) => {}
                    _ => return Err(Self::handle_error(handle.0)),
                }
            }

            let entry = inner.next_handle();
            for handle in file_handles {
                if let Some(OpenHandle::Attachment { entry: slot, .. }) =
                    inner.handles.get_mut(&handle.0)
                {
                    *slot = Some(entry);
                }
            }
            inner.entries.insert(
                entry,
                PreparedEntry {
                    inbox_id: inbox_id.to_string(),
                    payload: payload.to_vec(),
                    files: file_handles.iter().map(|h| h.0).collect(),
                },
            );
            Ok(EntryHandle(entry))
        })
    }

    fn write_to_file<'a>(
        &'a self,
        entry: EntryHandle,
        handle: RemoteFileHandle,
        data: &'a [u8],
    ) -> BridgeFuture<'a, ()> {
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap();
            match inner.handles.get(&handle.0) {
                Some(OpenHandle::Attachment { entry: Some(e), .. }) if *e == entry.0 => {}
                _ => return Err(Self::handle_error(handle.0)),
            }
            inner.admit_write()?;
            if let Some(OpenHandle::Attachment { data: buf, .. }) = inner.handles.get_mut(&handle.0)
            {
                buf.extend_from_slice(data);
            }
            Ok(())
        })
    }

    fn send_entry(&self, entry: EntryHandle) -> BridgeFuture<'_, ()> {
        Box::pin(async move { self.send_entry_sync(entry) })
    }
}

impl EventApi for MemoryBridge {
    fn subscribe<'a>(&'a self, channel: &'a EventChannel) -> BridgeFuture<'a, ()> {
        Box::pin(async move {
            let inserted = self
                .inner
                .lock()
                .unwrap()
                .subscriptions
                .insert(channel.clone());
            if !inserted {
                return Err(BridgeError::rejected(
                    17,
                    format!("already subscribed to {channel}"),
                ));
            }
            Ok(())
        })
    }

    fn unsubscribe<'a>(&'a self, channel: &'a EventChannel) -> BridgeFuture<'a, ()> {
        Box::pin(async move {
            let removed = self.inner.lock().unwrap().subscriptions.remove(channel);
            if !removed {
                return Err(BridgeError::NotFound(channel.to_string()));
            }
            Ok(())
        })
    }

    fn wait_event(&self) -> BridgeFuture<'_, Event> {
        Box::pin(async move {
            let mut rx = self.events_rx.lock().await;
            rx.recv()
                .await
                .ok_or_else(|| BridgeError::rejected(-1, "event queue closed"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> FileMeta {
        FileMeta::new(b"name.txt".to_vec(), b"secret".to_vec())
    }

    #[tokio::test]
    async fn create_write_close_stores_file() {
        let bridge = MemoryBridge::new();
        let handle = bridge.create_file("store-1", &meta(), 5).await.unwrap();
        StoreApi::write_to_file(&bridge, handle, b"hel").await.unwrap();
        StoreApi::write_to_file(&bridge, handle, b"lo").await.unwrap();
        let file_id = bridge.close_file(handle).await.unwrap();

        assert!(!file_id.is_empty());
        assert_eq!(bridge.file_data(&file_id).unwrap(), b"hello");
        assert_eq!(bridge.file_meta(&file_id).unwrap(), meta());
        assert_eq!(bridge.file_store(&file_id).as_deref(), Some("store-1"));
        assert_eq!(bridge.open_handle_count(), 0);
    }

    #[tokio::test]
    async fn declared_size_is_only_a_hint() {
        let bridge = MemoryBridge::new();
        let handle = bridge.create_file("s", &meta(), u64::MAX).await.unwrap();
        StoreApi::write_to_file(&bridge, handle, b"abc").await.unwrap();
        let file_id = bridge.close_file(handle).await.unwrap();
        assert_eq!(bridge.file_data(&file_id).unwrap(), b"abc");

        let update = bridge.update_file(&file_id, &meta(), u64::MAX).await.unwrap();
        bridge.close_file(update).await.unwrap();
        bridge.create_file_handle(&meta(), u64::MAX).await.unwrap();
        assert_eq!(bridge.open_handle_count(), 1);
    }

    #[test]
    fn reservation_is_capped() {
        assert_eq!(reserve_len(0), 0);
        assert_eq!(reserve_len(16), 16);
        assert_eq!(reserve_len(u64::MAX), MAX_RESERVE);
    }

    #[tokio::test]
    async fn read_advances_cursor_and_underfills_at_end() {
        let bridge = MemoryBridge::new();
        let file_id = bridge.insert_file("s", FileMeta::default(), b"abcdef".to_vec());
        let handle = bridge.open_file(&file_id).await.unwrap();

        assert_eq!(bridge.read_from_file(handle, 4).await.unwrap(), b"abcd");
        assert_eq!(bridge.read_from_file(handle, 4).await.unwrap(), b"ef");
        assert!(bridge.read_from_file(handle, 4).await.unwrap().is_empty());
        assert_eq!(bridge.close_file(handle).await.unwrap(), file_id);
    }

    #[tokio::test]
    async fn seek_moves_cursor_within_bounds() {
        let bridge = MemoryBridge::new();
        let file_id = bridge.insert_file("s", FileMeta::default(), b"0123456789".to_vec());
        let handle = bridge.open_file(&file_id).await.unwrap();

        bridge.seek_in_file(handle, 6).await.unwrap();
        assert_eq!(bridge.read_from_file(handle, 10).await.unwrap(), b"6789");
        assert!(bridge.seek_in_file(handle, 11).await.is_err());
    }

    #[tokio::test]
    async fn update_replaces_content() {
        let bridge = MemoryBridge::new();
        let file_id = bridge.insert_file("s", FileMeta::default(), b"old".to_vec());
        let handle = bridge.update_file(&file_id, &meta(), 3).await.unwrap();
        StoreApi::write_to_file(&bridge, handle, b"new").await.unwrap();
        assert_eq!(bridge.close_file(handle).await.unwrap(), file_id);
        assert_eq!(bridge.file_data(&file_id).unwrap(), b"new");
    }

    #[tokio::test]
    async fn unknown_file_is_not_found() {
        let bridge = MemoryBridge::new();
        let err = bridge.open_file("missing").await.unwrap_err();
        assert_eq!(err, BridgeError::NotFound("missing".into()));
    }

    #[tokio::test]
    async fn write_on_read_handle_is_rejected() {
        let bridge = MemoryBridge::new();
        let file_id = bridge.insert_file("s", FileMeta::default(), b"x".to_vec());
        let handle = bridge.open_file(&file_id).await.unwrap();
        let err = StoreApi::write_to_file(&bridge, handle, b"y").await.unwrap_err();
        assert!(matches!(err, BridgeError::InvalidHandle(_)));
    }

    #[tokio::test]
    async fn injected_write_failure() {
        let bridge = MemoryBridge::new();
        bridge.fail_writes_after(Some(1));
        let handle = bridge.create_file("s", &meta(), 2).await.unwrap();
        StoreApi::write_to_file(&bridge, handle, b"a").await.unwrap();
        let err = StoreApi::write_to_file(&bridge, handle, b"b").await.unwrap_err();
        assert!(matches!(err, BridgeError::Rejected { code: FAULT_WRITE_CODE, .. }));
        assert_eq!(bridge.write_calls(), 1);
    }

    #[tokio::test]
    async fn inbox_entry_flow() {
        let bridge = MemoryBridge::new();
        let f1 = bridge.create_file_handle(&meta(), 2).await.unwrap();
        let f2 = bridge.create_file_handle(&FileMeta::default(), 1).await.unwrap();
        let entry = bridge
            .prepare_entry("inbox-1", b"payload", &[f1, f2])
            .await
            .unwrap();

        InboxApi::write_to_file(&bridge, entry, f1, b"ab").await.unwrap();
        InboxApi::write_to_file(&bridge, entry, f2, b"c").await.unwrap();
        bridge.send_entry(entry).await.unwrap();

        let sent = bridge.sent_entries();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].inbox_id, "inbox-1");
        assert_eq!(sent[0].payload, b"payload");
        assert_eq!(sent[0].files[0].1, b"ab");
        assert_eq!(sent[0].files[1].1, b"c");
        assert_eq!(bridge.open_handle_count(), 0);
    }

    #[tokio::test]
    async fn attachment_write_requires_matching_entry() {
        let bridge = MemoryBridge::new();
        let f1 = bridge.create_file_handle(&meta(), 1).await.unwrap();
        let err = InboxApi::write_to_file(&bridge, EntryHandle(999), f1, b"x")
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::InvalidHandle(_)));
    }

    #[tokio::test]
    async fn attachment_cannot_be_closed_as_store_file() {
        let bridge = MemoryBridge::new();
        let f1 = bridge.create_file_handle(&meta(), 1).await.unwrap();
        assert!(bridge.close_file(f1).await.is_err());
        assert_eq!(bridge.open_handle_count(), 1);
    }

    #[tokio::test]
    async fn events_only_for_subscribed_channels() {
        let bridge = MemoryBridge::new();
        let channel = EventChannel::StoreFiles("s1".into());
        bridge.subscribe(&channel).await.unwrap();
        assert!(bridge.is_subscribed(&channel));
        assert!(bridge.subscribe(&channel).await.is_err());

        let handle = bridge.create_file("s1", &meta(), 0).await.unwrap();
        let file_id = bridge.close_file(handle).await.unwrap();

        let other = bridge.create_file("s2", &meta(), 0).await.unwrap();
        bridge.close_file(other).await.unwrap();

        let event = bridge.wait_event().await.unwrap();
        assert_eq!(event.kind, EventType::StoreFileCreated);
        assert_eq!(event.subject_id, file_id);
        assert_eq!(event.channel, channel);

        bridge.unsubscribe(&channel).await.unwrap();
        assert!(bridge.unsubscribe(&channel).await.is_err());
        assert!(!bridge.publish(Event::new(channel, EventType::StoreFileDeleted, "x")));
    }
}
