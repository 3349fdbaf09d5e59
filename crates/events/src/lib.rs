//! Event callbacks keyed by channel and event type.
//!
//! An [`EventRegistry`] is an explicit object shared by whoever needs to
//! register or dispatch. It keeps the bridge subscription in step with its
//! callbacks: the first callback on a channel subscribes, removing the last
//! one unsubscribes. [`run_event_pump`] feeds bridge events into a registry.

mod registry;

use endpoint_bridge::BridgeError;
use endpoint_protocol::{EventChannel, EventType};

pub use registry::{EventCallback, EventRegistry, SubscriptionId, run_event_pump};

/// Errors produced by the event registry.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("bridge error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("{kind:?} events are never published on {channel}")]
    ChannelMismatch {
        channel: EventChannel,
        kind: EventType,
    },
}
