//! Value types shared by every crate in the workspace.
//!
//! Nothing here talks to the Endpoint library. These are the idiomatic
//! counterparts of the native handle, metadata, event and policy types.

pub mod events;
pub mod policy;
pub mod types;

// Re-export primary types for convenience.
pub use events::{ChannelParseError, Event, EventChannel, EventType};
pub use policy::{ContainerPolicy, ItemPolicy, PolicyBool, PolicyError, PolicyRole, PolicyValue};
pub use types::{EntryHandle, FileMeta, RemoteFileHandle};
