//! Push-channel registry.
//!
//! DESIGN
//! ======
//! `PushService` is the seam to the external realtime collaborator: channels
//! are joined by name, and listeners are bound per `(channel, event)`.
//! `LocalPush` is the in-process implementation. The websocket bridge feeds
//! it, and tests publish into it directly.
//!
//! Joins are refcounted so two owners of the same channel do not tear each
//! other's listeners down. Delivery is synchronous and in registration order;
//! handlers run outside the registry lock so they may re-enter it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, trace};

use crate::frame::{ErrorCode, Frame};

/// Callback invoked for each frame delivered to a bound `(channel, event)`.
pub type Handler = Arc<dyn Fn(&Frame) + Send + Sync>;

/// Opaque listener handle returned by [`PushService::listen`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Debug, thiserror::Error)]
pub enum PushError {
    #[error("channel refused: {0}")]
    Refused(String),
    #[error("channel not joined: {0}")]
    NotJoined(String),
}

impl ErrorCode for PushError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Refused(_) => "E_CHANNEL_REFUSED",
            Self::NotJoined(_) => "E_CHANNEL_NOT_JOINED",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Refused(_))
    }
}

/// Contract of the realtime messaging collaborator.
pub trait PushService: Send + Sync {
    /// Join a channel. Joining an already-joined channel bumps its refcount.
    fn join(&self, channel: &str) -> Result<(), PushError>;

    /// Drop one reference to a channel. The last leave removes the channel and
    /// any listeners still bound to it.
    fn leave(&self, channel: &str);

    /// Bind `handler` to `event` on a joined channel.
    fn listen(&self, channel: &str, event: &str, handler: Handler) -> Result<ListenerId, PushError>;

    /// Unbind a listener. Returns `false` if it was not bound.
    fn stop_listening(&self, channel: &str, event: &str, id: ListenerId) -> bool;
}

// =============================================================================
// LOCAL PUSH
// =============================================================================

#[derive(Default)]
struct ChannelEntry {
    refs: usize,
    listeners: HashMap<String, Vec<(ListenerId, Handler)>>,
}

#[derive(Default)]
struct LocalPushInner {
    channels: HashMap<String, ChannelEntry>,
    refused: Vec<String>,
    next_id: u64,
}

/// In-memory channel registry.
#[derive(Clone, Default)]
pub struct LocalPush {
    inner: Arc<Mutex<LocalPushInner>>,
}

impl LocalPush {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LocalPushInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Deliver a frame to every listener bound to its channel and event.
    /// Returns how many listeners were invoked.
    pub fn publish(&self, frame: &Frame) -> usize {
        let handlers: Vec<Handler> = {
            let inner = self.lock();
            inner
                .channels
                .get(&frame.channel)
                .and_then(|entry| entry.listeners.get(&frame.event))
                .map(|bound| bound.iter().map(|(_, h)| Arc::clone(h)).collect())
                .unwrap_or_default()
        };
        trace!(channel = %frame.channel, event = %frame.event, listeners = handlers.len(), "push: publish");
        for handler in &handlers {
            handler(frame);
        }
        handlers.len()
    }

    /// Make every future join of `channel` fail.
    pub fn refuse(&self, channel: impl Into<String>) {
        self.lock().refused.push(channel.into());
    }

    #[must_use]
    pub fn is_joined(&self, channel: &str) -> bool {
        self.lock().channels.contains_key(channel)
    }

    /// Sorted names of all joined channels.
    #[must_use]
    pub fn joined_channels(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().channels.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of listeners bound on `channel` across all events.
    #[must_use]
    pub fn listener_count(&self, channel: &str) -> usize {
        self.lock()
            .channels
            .get(channel)
            .map_or(0, |entry| entry.listeners.values().map(Vec::len).sum())
    }

    /// Number of listeners bound anywhere in the registry.
    #[must_use]
    pub fn total_listeners(&self) -> usize {
        self.lock()
            .channels
            .values()
            .flat_map(|entry| entry.listeners.values())
            .map(Vec::len)
            .sum()
    }
}

impl PushService for LocalPush {
    fn join(&self, channel: &str) -> Result<(), PushError> {
        let mut inner = self.lock();
        if inner.refused.iter().any(|c| c == channel) {
            return Err(PushError::Refused(channel.to_owned()));
        }
        let entry = inner.channels.entry(channel.to_owned()).or_default();
        entry.refs += 1;
        debug!(%channel, refs = entry.refs, "push: join");
        Ok(())
    }

    fn leave(&self, channel: &str) {
        let mut inner = self.lock();
        let Some(entry) = inner.channels.get_mut(channel) else {
            return;
        };
        entry.refs = entry.refs.saturating_sub(1);
        debug!(%channel, refs = entry.refs, "push: leave");
        if entry.refs == 0 {
            inner.channels.remove(channel);
        }
    }

    fn listen(&self, channel: &str, event: &str, handler: Handler) -> Result<ListenerId, PushError> {
        let mut inner = self.lock();
        inner.next_id += 1;
        let id = ListenerId(inner.next_id);
        let Some(entry) = inner.channels.get_mut(channel) else {
            return Err(PushError::NotJoined(channel.to_owned()));
        };
        entry.listeners.entry(event.to_owned()).or_default().push((id, handler));
        Ok(id)
    }

    fn stop_listening(&self, channel: &str, event: &str, id: ListenerId) -> bool {
        let mut inner = self.lock();
        let Some(bound) = inner
            .channels
            .get_mut(channel)
            .and_then(|entry| entry.listeners.get_mut(event))
        else {
            return false;
        };
        let before = bound.len();
        bound.retain(|(lid, _)| *lid != id);
        before != bound.len()
    }
}

#[cfg(test)]
#[path = "push_test.rs"]
mod tests;
