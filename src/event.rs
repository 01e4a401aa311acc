//! Typed session events parsed from pushed frames.
//!
//! DESIGN
//! ======
//! These types mirror the backend's broadcast payloads. Parsing is the only
//! place payloads are validated: anything that reaches the reconciler has a
//! non-empty id and a known event name.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::frame::{ErrorCode, Frame};

pub const EVENT_MESSAGE_SENT: &str = "message.sent";
pub const EVENT_PARTICIPANT_JOINED: &str = "participant.joined";
pub const EVENT_PARTICIPANT_LEFT: &str = "participant.left";
pub const EVENT_PARTICIPANT_UPDATED: &str = "participant.updated";

// =============================================================================
// ENTITIES
// =============================================================================

/// Kind tag carried by a chat message.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    Emoji,
    System,
}

/// A chat message as broadcast by the backend.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Server-assigned message id. Also the de-dup key.
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    #[serde(deserialize_with = "deserialize_id")]
    pub user_id: String,
    #[serde(default)]
    pub user_name: String,
    pub content: String,
    #[serde(default, rename = "type")]
    pub kind: MessageKind,
    /// Milliseconds since Unix epoch.
    #[serde(default)]
    pub timestamp: i64,
}

/// Meeting role of a participant.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Host,
    Cohost,
    #[default]
    Attendee,
}

/// A session participant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    #[serde(deserialize_with = "deserialize_id")]
    pub user_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub muted: bool,
    #[serde(default)]
    pub video: bool,
}

/// Server-rendered initial state for one session.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub participants: Vec<Participant>,
}

// =============================================================================
// EVENTS
// =============================================================================

/// One inbound event, validated and ready for the reconciler.
#[derive(Clone, Debug, PartialEq)]
pub enum LiveEvent {
    MessageSent(ChatMessage),
    ParticipantJoined(Participant),
    ParticipantLeft { id: String },
    ParticipantUpdated(Participant),
}

#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("unknown event: {0}")]
    UnknownEvent(String),
    #[error("malformed {event} payload: {source}")]
    Malformed {
        event: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("{0} payload has an empty id")]
    EmptyId(String),
}

impl ErrorCode for PayloadError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::UnknownEvent(_) => "E_UNKNOWN_EVENT",
            Self::Malformed { .. } => "E_MALFORMED_PAYLOAD",
            Self::EmptyId(_) => "E_EMPTY_ID",
        }
    }
}

#[derive(Deserialize)]
struct LeftPayload {
    #[serde(deserialize_with = "deserialize_id")]
    id: String,
}

impl LiveEvent {
    /// Parse and validate a pushed frame.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadError`] for unknown event names, payloads that do not
    /// match the event's schema, and entities with an empty id.
    pub fn from_frame(frame: &Frame) -> Result<Self, PayloadError> {
        let event = frame.event.as_str();
        let data = Value::Object(frame.data.iter().map(|(k, v)| (k.clone(), v.clone())).collect::<Map<_, _>>());
        let parsed = match event {
            EVENT_MESSAGE_SENT => Self::MessageSent(decode(event, data)?),
            EVENT_PARTICIPANT_JOINED => Self::ParticipantJoined(decode(event, data)?),
            EVENT_PARTICIPANT_UPDATED => Self::ParticipantUpdated(decode(event, data)?),
            EVENT_PARTICIPANT_LEFT => {
                let left: LeftPayload = decode(event, data)?;
                Self::ParticipantLeft { id: left.id }
            }
            other => return Err(PayloadError::UnknownEvent(other.to_owned())),
        };
        if parsed.entity_id().trim().is_empty() {
            return Err(PayloadError::EmptyId(event.to_owned()));
        }
        Ok(parsed)
    }

    /// Id of the entity this event concerns.
    #[must_use]
    pub fn entity_id(&self) -> &str {
        match self {
            Self::MessageSent(msg) => &msg.id,
            Self::ParticipantJoined(p) | Self::ParticipantUpdated(p) => &p.id,
            Self::ParticipantLeft { id } => id,
        }
    }
}

fn decode<T: for<'de> Deserialize<'de>>(event: &str, data: Value) -> Result<T, PayloadError> {
    serde_json::from_value(data).map_err(|source| PayloadError::Malformed { event: event.to_owned(), source })
}

/// Accept ids sent either as strings or as integers.
fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    match value {
        Value::String(s) => Ok(s),
        Value::Number(n) if n.is_i64() || n.is_u64() => Ok(n.to_string()),
        _ => Err(D::Error::custom("expected string or integer id")),
    }
}

#[cfg(test)]
#[path = "event_test.rs"]
mod tests;
