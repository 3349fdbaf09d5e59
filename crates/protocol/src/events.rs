//! Event types delivered by the Endpoint library's subscription protocol.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Kind of change an event reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventType {
    StoreFileCreated,
    StoreFileUpdated,
    StoreFileDeleted,
    InboxEntryCreated,
    InboxEntryDeleted,
}

impl EventType {
    /// Returns `true` if events of this type are published on `channel`.
    pub fn belongs_to(self, channel: &EventChannel) -> bool {
        match channel {
            EventChannel::StoreFiles(_) => matches!(
                self,
                Self::StoreFileCreated | Self::StoreFileUpdated | Self::StoreFileDeleted
            ),
            EventChannel::InboxEntries(_) => {
                matches!(self, Self::InboxEntryCreated | Self::InboxEntryDeleted)
            }
        }
    }
}

/// Subscription channel, rendered as `store/<id>/files` or `inbox/<id>/entries`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum EventChannel {
    StoreFiles(String),
    InboxEntries(String),
}

impl EventChannel {
    /// Id of the container the channel belongs to.
    pub fn container_id(&self) -> &str {
        match self {
            Self::StoreFiles(id) | Self::InboxEntries(id) => id,
        }
    }
}

impl fmt::Display for EventChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StoreFiles(id) => write!(f, "store/{id}/files"),
            Self::InboxEntries(id) => write!(f, "inbox/{id}/entries"),
        }
    }
}

/// Error returned when a channel string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid event channel: {0}")]
pub struct ChannelParseError(pub String);

impl FromStr for EventChannel {
    type Err = ChannelParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('/').collect();
        match parts.as_slice() {
            ["store", id, "files"] if !id.is_empty() => Ok(Self::StoreFiles((*id).to_string())),
            ["inbox", id, "entries"] if !id.is_empty() => {
                Ok(Self::InboxEntries((*id).to_string()))
            }
            _ => Err(ChannelParseError(s.to_string())),
        }
    }
}

impl TryFrom<String> for EventChannel {
    type Error = ChannelParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<EventChannel> for String {
    fn from(channel: EventChannel) -> Self {
        channel.to_string()
    }
}

/// A single event received from the Endpoint library.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub channel: EventChannel,
    #[serde(rename = "type")]
    pub kind: EventType,
    /// Id of the file or entry the event is about.
    pub subject_id: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub payload: serde_json::Value,
}

impl Event {
    pub fn new(channel: EventChannel, kind: EventType, subject_id: impl Into<String>) -> Self {
        Self {
            channel,
            kind,
            subject_id: subject_id.into(),
            payload: serde_json::Value::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_display_and_parse() {
        let store = EventChannel::StoreFiles("s1".into());
        assert_eq!(store.to_string(), "store/s1/files");
        assert_eq!("store/s1/files".parse::<EventChannel>().unwrap(), store);

        let inbox = EventChannel::InboxEntries("i1".into());
        assert_eq!(inbox.to_string(), "inbox/i1/entries");
        assert_eq!(inbox.container_id(), "i1");
    }

    #[test]
    fn channel_parse_rejects_garbage() {
        assert!("store//files".parse::<EventChannel>().is_err());
        assert!("thread/t1/messages".parse::<EventChannel>().is_err());
        assert!("".parse::<EventChannel>().is_err());
    }

    #[test]
    fn event_type_channel_membership() {
        let store = EventChannel::StoreFiles("s".into());
        let inbox = EventChannel::InboxEntries("i".into());
        assert!(EventType::StoreFileCreated.belongs_to(&store));
        assert!(!EventType::StoreFileCreated.belongs_to(&inbox));
        assert!(EventType::InboxEntryCreated.belongs_to(&inbox));
    }

    #[test]
    fn event_json_shape() {
        let event = Event::new(
            EventChannel::InboxEntries("i1".into()),
            EventType::InboxEntryCreated,
            "entry-1",
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["channel"], "inbox/i1/entries");
        assert_eq!(json["type"], "inboxEntryCreated");
        assert_eq!(json["subjectId"], "entry-1");
        assert!(json.get("payload").is_none());

        let back: Event = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }
}
