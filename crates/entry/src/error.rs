//! Entry error types.

use std::sync::Arc;

use endpoint_bridge::BridgeError;
use endpoint_transfer::TransferError;

use crate::types::TransferState;

/// Errors produced by an [`EntryUploadHandler`](crate::EntryUploadHandler).
///
/// Cloneable so the first failure can be latched and handed out again.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EntryError {
    #[error("cannot {operation} while the entry is {state}")]
    InvalidState {
        state: TransferState,
        operation: &'static str,
    },

    #[error("attachment transfer failed: {0}")]
    FileTransfer(Arc<TransferError>),

    #[error("entry submission failed: {0}")]
    Bridge(Arc<BridgeError>),
}

impl From<TransferError> for EntryError {
    fn from(e: TransferError) -> Self {
        Self::FileTransfer(Arc::new(e))
    }
}

impl From<BridgeError> for EntryError {
    fn from(e: BridgeError) -> Self {
        Self::Bridge(Arc::new(e))
    }
}
