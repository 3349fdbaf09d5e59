//! Data types for entry submission.

use std::fmt;

use endpoint_transfer::{DEFAULT_CHUNK_SIZE, TransferProgress};

/// Lifecycle of an entry. `Sent`, `Aborted` and `Error` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferState {
    Prepared,
    FilesSent,
    Sent,
    Aborted,
    Error,
}

impl TransferState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Sent | Self::Aborted | Self::Error)
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Prepared => "prepared",
            Self::FilesSent => "filesSent",
            Self::Sent => "sent",
            Self::Aborted => "aborted",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// Tunables for one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryOptions {
    /// Chunk size used for every attachment.
    pub chunk_size: usize,
    /// Capacity of the event channel. Events are dropped while it is full.
    pub event_buffer: usize,
}

impl Default for EntryOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            event_buffer: 256,
        }
    }
}

/// Events emitted while an entry is being sent.
#[derive(Debug, Clone, PartialEq)]
pub enum EntryEvent {
    /// A chunk of attachment `index` reached the remote side.
    FileProgress {
        index: usize,
        progress: TransferProgress,
    },
    /// Attachment `index` is fully uploaded.
    FileCompleted { index: usize, bytes: u64 },
    StateChanged {
        from: TransferState,
        to: TransferState,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_names() {
        assert_eq!(TransferState::FilesSent.to_string(), "filesSent");
        assert_eq!(TransferState::Prepared.to_string(), "prepared");
    }

    #[test]
    fn terminal_states() {
        assert!(!TransferState::Prepared.is_terminal());
        assert!(!TransferState::FilesSent.is_terminal());
        assert!(TransferState::Sent.is_terminal());
        assert!(TransferState::Aborted.is_terminal());
        assert!(TransferState::Error.is_terminal());
    }

    #[test]
    fn default_options() {
        let opts = EntryOptions::default();
        assert_eq!(opts.chunk_size, DEFAULT_CHUNK_SIZE);
        assert!(opts.event_buffer > 0);
    }
}
