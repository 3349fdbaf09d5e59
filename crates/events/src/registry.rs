use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use endpoint_bridge::EventApi;
use endpoint_protocol::{Event, EventChannel, EventType};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::EventError;

/// Callback invoked with each matching event.
pub type EventCallback = Arc<dyn Fn(&Event) + Send + Sync>;

/// Identifies one registered callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "subscription:{}", self.0)
    }
}

struct Registration {
    id: SubscriptionId,
    kind: EventType,
    callback: EventCallback,
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    channels: HashMap<EventChannel, Vec<Registration>>,
}

/// Callback table for one bridge.
pub struct EventRegistry {
    api: Arc<dyn EventApi>,
    // Held across subscribe/unsubscribe so the bridge never sees a channel
    // subscribed twice.
    inner: Mutex<Inner>,
}

impl EventRegistry {
    pub fn new(api: Arc<dyn EventApi>) -> Self {
        Self {
            api,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Registers `callback` for `kind` events on `channel`.
    ///
    /// The first registration on a channel subscribes to it. If that fails,
    /// nothing is registered.
    pub async fn register(
        &self,
        channel: EventChannel,
        kind: EventType,
        callback: EventCallback,
    ) -> Result<SubscriptionId, EventError> {
        if !kind.belongs_to(&channel) {
            return Err(EventError::ChannelMismatch { channel, kind });
        }

        let mut inner = self.inner.lock().await;
        if !inner.channels.contains_key(&channel) {
            self.api.subscribe(&channel).await?;
            info!(%channel, "subscribed");
        }

        inner.next_id += 1;
        let id = SubscriptionId(inner.next_id);
        debug!(%channel, ?kind, %id, "callback registered");
        inner
            .channels
            .entry(channel)
            .or_default()
            .push(Registration { id, kind, callback });
        Ok(id)
    }

    /// Removes one callback. Returns `false` for an unknown id.
    ///
    /// Removing the last callback of a channel unsubscribes from it.
    pub async fn unregister(&self, id: SubscriptionId) -> Result<bool, EventError> {
        let mut inner = self.inner.lock().await;
        let Some(channel) = inner
            .channels
            .iter()
            .find(|(_, regs)| regs.iter().any(|r| r.id == id))
            .map(|(channel, _)| channel.clone())
        else {
            return Ok(false);
        };

        let last = inner.channels.get(&channel).is_some_and(|regs| regs.len() == 1);
        if last {
            // The callback stays registered if the bridge refuses.
            self.api.unsubscribe(&channel).await?;
            inner.channels.remove(&channel);
            info!(%channel, "unsubscribed");
        } else if let Some(regs) = inner.channels.get_mut(&channel) {
            regs.retain(|r| r.id != id);
        }
        debug!(%channel, %id, "callback removed");
        Ok(true)
    }

    /// Drops every callback on `channel` and unsubscribes from it.
    ///
    /// Returns how many callbacks were removed; zero means the channel was
    /// not subscribed and the bridge is left alone.
    pub async fn clear(&self, channel: &EventChannel) -> Result<usize, EventError> {
        let mut inner = self.inner.lock().await;
        if !inner.channels.contains_key(channel) {
            return Ok(0);
        }
        self.api.unsubscribe(channel).await?;
        let removed = inner.channels.remove(channel).map_or(0, |regs| regs.len());
        info!(%channel, callbacks = removed, "channel cleared");
        Ok(removed)
    }

    /// Invokes every callback registered for the event's channel and type.
    /// Returns how many ran.
    pub async fn dispatch(&self, event: &Event) -> usize {
        let callbacks: Vec<EventCallback> = {
            let inner = self.inner.lock().await;
            match inner.channels.get(&event.channel) {
                Some(regs) => regs
                    .iter()
                    .filter(|r| r.kind == event.kind)
                    .map(|r| Arc::clone(&r.callback))
                    .collect(),
                None => Vec::new(),
            }
        };
        for callback in &callbacks {
            callback(event);
        }
        if callbacks.is_empty() {
            debug!(channel = %event.channel, kind = ?event.kind, "event had no listeners");
        }
        callbacks.len()
    }

    /// Channels that currently hold at least one callback.
    pub async fn channels(&self) -> Vec<EventChannel> {
        self.inner.lock().await.channels.keys().cloned().collect()
    }

    /// Number of callbacks on `channel`.
    pub async fn callback_count(&self, channel: &EventChannel) -> usize {
        self.inner
            .lock()
            .await
            .channels
            .get(channel)
            .map_or(0, Vec::len)
    }
}

/// Waits for bridge events and dispatches them until `cancel` fires.
///
/// Returns the bridge error that stopped the pump, if any.
pub async fn run_event_pump(
    api: Arc<dyn EventApi>,
    registry: Arc<EventRegistry>,
    cancel: CancellationToken,
) -> Result<(), EventError> {
    info!("event pump started");
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("event pump stopped");
                return Ok(());
            }
            event = api.wait_event() => {
                let event = event.inspect_err(|e| warn!(error = %e, "event pump failed"))?;
                registry.dispatch(&event).await;
            }
        }
    }
}
