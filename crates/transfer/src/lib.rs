//! Chunked file transfer between local data and remote Endpoint files.
//!
//! A [`ChunkTransferEngine`] moves one file, one chunk per call, in a mode
//! fixed at construction. [`drive`] is the caller-side loop that runs an
//! engine to exhaustion and checks a cancellation token between chunks.

mod drive;
mod engine;
mod progress;
mod source;
mod validation;

use endpoint_bridge::BridgeError;

pub use drive::{ChunkCallback, DriveOutcome, drive};
pub use engine::{ChunkTransferEngine, LocalSink, TransferMode};
pub use progress::{ProgressTracker, TransferProgress};
pub use source::{BufferSource, FileDataSource, LocalFileSource, SourceFuture};
pub use validation::{MAX_CHUNK_SIZE, validate_chunk_size, validate_remote_id};

/// Default chunk size: 128 KiB, the size the Endpoint library recommends.
pub const DEFAULT_CHUNK_SIZE: usize = 128 * 1024;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("file read failed: {reason}")]
    FileRead {
        reason: String,
        #[source]
        source: Option<BridgeError>,
    },

    #[error("file write failed: {reason}")]
    FileWrite {
        reason: String,
        #[source]
        source: Option<BridgeError>,
    },

    #[error("data integrity error: {0}")]
    DataIntegrity(String),

    #[error("invalid chunk size: {0}")]
    InvalidChunkSize(usize),

    #[error("invalid id: {0}")]
    InvalidId(String),

    #[error("bridge error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("cancelled")]
    Cancelled,
}
