//! Frame: the envelope for every pushed session event.
//!
//! ARCHITECTURE
//! ============
//! The push collaborator delivers frames on named channels. Each frame names
//! the channel it arrived on and the event it carries; listeners are bound per
//! `(channel, event)` pair and never inspect frames bound elsewhere.
//!
//! DESIGN
//! ======
//! - Flat data: payload is always a `HashMap<String, Value>`, parsed lazily by
//!   `crate::event` so transport code stays schema-agnostic.
//! - `id` identifies the frame, not the entity it carries. Entity identity
//!   (message id, participant id) lives in `data`.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// TYPES
// =============================================================================

/// Flat key-value payload. Alias to reduce noise in signatures.
pub type Data = HashMap<String, serde_json::Value>;

/// One pushed event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    /// Milliseconds since Unix epoch. Set automatically at construction.
    #[serde(default)]
    pub ts: i64,
    /// Channel the frame was published on, e.g. `session.42.chat`.
    pub channel: String,
    /// Dotted event name, e.g. `message.sent`.
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default)]
    pub data: Data,
}

// =============================================================================
// ERROR CODES
// =============================================================================

/// Grepable error code and retryable flag for structured errors.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;

    fn retryable(&self) -> bool {
        false
    }
}

/// A typed error flattened for display: code, message, and retryable flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorNotice {
    pub code: &'static str,
    pub message: String,
    pub retryable: bool,
}

impl ErrorNotice {
    #[must_use]
    pub fn from_error(err: &(impl ErrorCode + ?Sized)) -> Self {
        Self { code: err.error_code(), message: err.to_string(), retryable: err.retryable() }
    }
}

// =============================================================================
// CONSTRUCTORS
// =============================================================================

/// Current time as milliseconds since Unix epoch.
pub(crate) fn now_ms() -> i64 {
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(dur.as_millis()).unwrap_or(0)
}

impl Frame {
    /// Create an event frame bound for `channel`.
    pub fn event(channel: impl Into<String>, event: impl Into<String>, data: Data) -> Self {
        Self { id: Uuid::new_v4(), ts: now_ms(), channel: channel.into(), event: event.into(), from: None, data }
    }

    #[must_use]
    pub fn with_from(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }

    #[must_use]
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// Extract the event family (everything before the first '.').
    #[must_use]
    pub fn prefix(&self) -> &str {
        let Some((prefix, _)) = self.event.split_once('.') else {
            return &self.event;
        };
        prefix
    }
}

#[cfg(test)]
#[path = "frame_test.rs"]
mod tests;
