//! Channel subscription lifecycle for one live session.
//!
//! LIFECYCLE
//! =========
//! 1. `activate(scope)` releases whatever was held before, then joins the
//!    session's chat, participants, and per-user channels and binds their
//!    events.
//! 2. Listeners forward frames into the session's inbound queue and do
//!    nothing else.
//! 3. `deactivate()` (or drop) unbinds every listener, then leaves every
//!    channel.
//!
//! ERROR HANDLING
//! ==============
//! A scope without a session id or user id is not an error: nothing is
//! subscribed. A join/listen failure halfway through activation rolls back
//! everything acquired so far before the error is returned, so a failed
//! activation never leaves listeners behind.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, trace};

use crate::event::{EVENT_MESSAGE_SENT, EVENT_PARTICIPANT_JOINED, EVENT_PARTICIPANT_LEFT, EVENT_PARTICIPANT_UPDATED};
use crate::frame::{ErrorCode, Frame};
use crate::push::{Handler, ListenerId, PushError, PushService};

const CHAT_EVENTS: &[&str] = &[EVENT_MESSAGE_SENT];
const PARTICIPANT_EVENTS: &[&str] = &[EVENT_PARTICIPANT_JOINED, EVENT_PARTICIPANT_LEFT, EVENT_PARTICIPANT_UPDATED];
const USER_EVENTS: &[&str] = &[EVENT_MESSAGE_SENT];

#[must_use]
pub fn chat_channel(session_id: &str) -> String {
    format!("session.{session_id}.chat")
}

#[must_use]
pub fn participants_channel(session_id: &str) -> String {
    format!("session.{session_id}.participants")
}

#[must_use]
pub fn user_channel(session_id: &str, user_id: &str) -> String {
    format!("session.{session_id}.user.{user_id}")
}

/// Who is watching which session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionScope {
    pub session_id: String,
    pub user_id: Option<String>,
}

impl SessionScope {
    #[must_use]
    pub fn new(session_id: impl Into<String>, user_id: Option<String>) -> Self {
        Self { session_id: session_id.into(), user_id }
    }

    /// Both ids present and non-blank.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.session_id.trim().is_empty() && self.user_id.as_deref().is_some_and(|u| !u.trim().is_empty())
    }

    /// Channels and events to bind for this scope, empty when incomplete.
    #[must_use]
    pub fn plan(&self) -> Vec<(String, &'static [&'static str])> {
        let Some(user_id) = self.user_id.as_deref().filter(|_| self.is_complete()) else {
            return Vec::new();
        };
        vec![
            (chat_channel(&self.session_id), CHAT_EVENTS),
            (participants_channel(&self.session_id), PARTICIPANT_EVENTS),
            (user_channel(&self.session_id, user_id), USER_EVENTS),
        ]
    }
}

#[derive(Debug, thiserror::Error)]
#[error("subscribe to {channel} failed: {source}")]
pub struct SubscribeError {
    pub channel: String,
    #[source]
    pub source: PushError,
}

impl ErrorCode for SubscribeError {
    fn error_code(&self) -> &'static str {
        "E_SUBSCRIBE"
    }

    fn retryable(&self) -> bool {
        self.source.retryable()
    }
}

/// Result of [`Subscriptions::activate`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Activation {
    /// Channels were joined and listeners bound.
    Subscribed { channels: usize, listeners: usize },
    /// The requested scope was already active.
    Unchanged,
    /// Scope incomplete; nothing is subscribed.
    Inactive,
}

struct Binding {
    channel: String,
    event: &'static str,
    id: ListenerId,
}

struct ActiveScope {
    scope: SessionScope,
    channels: Vec<String>,
    bindings: Vec<Binding>,
}

impl ActiveScope {
    fn empty(scope: SessionScope) -> Self {
        Self { scope, channels: Vec::new(), bindings: Vec::new() }
    }
}

/// Owns every channel and listener a live session holds.
pub struct Subscriptions {
    push: Arc<dyn PushService>,
    sink: mpsc::UnboundedSender<Frame>,
    active: Option<ActiveScope>,
}

impl Subscriptions {
    #[must_use]
    pub fn new(push: Arc<dyn PushService>, sink: mpsc::UnboundedSender<Frame>) -> Self {
        Self { push, sink, active: None }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    #[must_use]
    pub fn active_scope(&self) -> Option<&SessionScope> {
        self.active.as_ref().map(|a| &a.scope)
    }

    /// Channels currently held, in join order.
    #[must_use]
    pub fn channels(&self) -> &[String] {
        self.active.as_ref().map_or(&[], |a| a.channels.as_slice())
    }

    /// Switch to `scope`, releasing any previous scope first.
    ///
    /// # Errors
    ///
    /// Returns [`SubscribeError`] if a channel cannot be joined or bound. All
    /// channels acquired during this call are released before returning.
    pub fn activate(&mut self, scope: SessionScope) -> Result<Activation, SubscribeError> {
        if self.active.as_ref().is_some_and(|a| a.scope == scope) {
            return Ok(Activation::Unchanged);
        }
        self.deactivate();

        if !scope.is_complete() {
            debug!(session_id = %scope.session_id, has_user = scope.user_id.is_some(), "subscription: scope incomplete, not subscribing");
            return Ok(Activation::Inactive);
        }

        let mut acquired = ActiveScope::empty(scope);
        if let Err(err) = self.acquire(&mut acquired) {
            self.release(acquired);
            return Err(err);
        }

        let activation = Activation::Subscribed { channels: acquired.channels.len(), listeners: acquired.bindings.len() };
        info!(session_id = %acquired.scope.session_id, ?activation, "subscription: active");
        self.active = Some(acquired);
        Ok(activation)
    }

    fn acquire(&self, acquired: &mut ActiveScope) -> Result<(), SubscribeError> {
        for (channel, events) in acquired.scope.plan() {
            self.push
                .join(&channel)
                .map_err(|source| SubscribeError { channel: channel.clone(), source })?;
            acquired.channels.push(channel.clone());

            for &event in events {
                let id = self
                    .push
                    .listen(&channel, event, self.forwarder())
                    .map_err(|source| SubscribeError { channel: channel.clone(), source })?;
                acquired.bindings.push(Binding { channel: channel.clone(), event, id });
            }
        }
        Ok(())
    }

    fn forwarder(&self) -> Handler {
        let sink = self.sink.clone();
        Arc::new(move |frame: &Frame| {
            if sink.send(frame.clone()).is_err() {
                trace!(channel = %frame.channel, "subscription: inbound queue closed, frame dropped");
            }
        })
    }

    /// Release everything held. Returns the number of listeners unbound.
    pub fn deactivate(&mut self) -> usize {
        let Some(active) = self.active.take() else {
            return 0;
        };
        let session_id = active.scope.session_id.clone();
        let released = self.release(active);
        info!(%session_id, released, "subscription: released");
        released
    }

    fn release(&self, active: ActiveScope) -> usize {
        let mut released = 0;
        for binding in &active.bindings {
            if self.push.stop_listening(&binding.channel, binding.event, binding.id) {
                released += 1;
            }
        }
        for channel in &active.channels {
            self.push.leave(channel);
        }
        released
    }
}

impl Drop for Subscriptions {
    fn drop(&mut self) {
        self.deactivate();
    }
}

#[cfg(test)]
#[path = "subscription_test.rs"]
mod tests;
