//! Call interface to the native Endpoint library.
//!
//! The library itself (crypto, wire protocol, container model) is external.
//! This crate pins down the small set of calls the transfer layer makes,
//! as traits, so the rest of the workspace never touches the native types
//! and can be tested against [`MemoryBridge`].

mod error;
pub mod memory;

use std::future::Future;
use std::pin::Pin;

use endpoint_protocol::{EntryHandle, Event, EventChannel, FileMeta, RemoteFileHandle};

pub use error::BridgeError;
pub use memory::{MemoryBridge, SentEntry};

/// Boxed future returned by every bridge call.
pub type BridgeFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, BridgeError>> + Send + 'a>>;

/// File operations on store containers.
pub trait StoreApi: Send + Sync {
    /// Opens an existing file for reading.
    fn open_file<'a>(&'a self, file_id: &'a str) -> BridgeFuture<'a, RemoteFileHandle>;

    /// Starts a new file of `size` declared bytes in `store_id`.
    fn create_file<'a>(
        &'a self,
        store_id: &'a str,
        meta: &'a FileMeta,
        size: u64,
    ) -> BridgeFuture<'a, RemoteFileHandle>;

    /// Starts replacing the content and metadata of an existing file.
    fn update_file<'a>(
        &'a self,
        file_id: &'a str,
        meta: &'a FileMeta,
        size: u64,
    ) -> BridgeFuture<'a, RemoteFileHandle>;

    /// Reads up to `length` bytes at the handle's cursor.
    fn read_from_file(&self, handle: RemoteFileHandle, length: u64) -> BridgeFuture<'_, Vec<u8>>;

    /// Appends `data` to a handle opened by `create_file` or `update_file`.
    fn write_to_file<'a>(
        &'a self,
        handle: RemoteFileHandle,
        data: &'a [u8],
    ) -> BridgeFuture<'a, ()>;

    /// Moves the read cursor of `handle` to `position`.
    fn seek_in_file(&self, handle: RemoteFileHandle, position: u64) -> BridgeFuture<'_, ()>;

    /// Releases `handle` and returns the permanent id of the file.
    fn close_file(&self, handle: RemoteFileHandle) -> BridgeFuture<'_, String>;
}

/// Entry submission on inbox containers.
pub trait InboxApi: Send + Sync {
    /// Reserves a handle for a file that will be attached to an entry.
    fn create_file_handle<'a>(
        &'a self,
        meta: &'a FileMeta,
        size: u64,
    ) -> BridgeFuture<'a, RemoteFileHandle>;

    /// Prepares an entry carrying `payload` and the given attachments.
    fn prepare_entry<'a>(
        &'a self,
        inbox_id: &'a str,
        payload: &'a [u8],
        file_handles: &'a [RemoteFileHandle],
    ) -> BridgeFuture<'a, EntryHandle>;

    /// Appends `data` to an attachment of a prepared entry.
    fn write_to_file<'a>(
        &'a self,
        entry: EntryHandle,
        handle: RemoteFileHandle,
        data: &'a [u8],
    ) -> BridgeFuture<'a, ()>;

    /// Submits a prepared entry.
    fn send_entry(&self, entry: EntryHandle) -> BridgeFuture<'_, ()>;
}

/// Event subscription protocol.
pub trait EventApi: Send + Sync {
    fn subscribe<'a>(&'a self, channel: &'a EventChannel) -> BridgeFuture<'a, ()>;

    fn unsubscribe<'a>(&'a self, channel: &'a EventChannel) -> BridgeFuture<'a, ()>;

    /// Waits for the next event on any subscribed channel.
    fn wait_event(&self) -> BridgeFuture<'_, Event>;
}
