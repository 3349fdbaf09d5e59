use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque handle to a file opened, created or updated on the remote side.
///
/// Issued by the Endpoint library and only meaningful to it. A handle is
/// owned by exactly one transfer and released once through `close`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteFileHandle(pub u64);

impl fmt::Display for RemoteFileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "file-handle:{}", self.0)
    }
}

/// Handle to a prepared inbox entry that has not been sent yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryHandle(pub u64);

impl fmt::Display for EntryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entry-handle:{}", self.0)
    }
}

/// Caller-supplied metadata attached to a remote file.
///
/// Both blobs are opaque: the public part is readable by anyone with access
/// to the container, the private part is encrypted by the Endpoint library.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMeta {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub public_meta: Vec<u8>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub private_meta: Vec<u8>,
}

impl FileMeta {
    pub fn new(public_meta: impl Into<Vec<u8>>, private_meta: impl Into<Vec<u8>>) -> Self {
        Self {
            public_meta: public_meta.into(),
            private_meta: private_meta.into(),
        }
    }
}
