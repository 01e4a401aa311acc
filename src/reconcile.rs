//! Reconciler: merges inbound session events into local collections.
//!
//! SYSTEM CONTEXT
//! ==============
//! A session listens on a broadcast chat channel and on a per-user private
//! channel. The backend may deliver the same logical message on both, in any
//! relative order. This module is the single enforcement point for
//! uniqueness: every message and participant is keyed by its server id.
//!
//! INVARIANTS
//! ==========
//! - `MessageLog` keeps arrival order and holds each message id at most once.
//! - `ParticipantRoster` holds each participant id at most once, in join order.

use std::collections::HashSet;

use tracing::debug;

use crate::event::{ChatMessage, LiveEvent, Participant, SessionSnapshot};

/// What a single `apply` did to local state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Applied {
    /// A new message was appended to the log.
    Appended,
    /// A new participant was added to the roster.
    Joined,
    /// A participant was removed from the roster.
    Left,
    /// A present participant's flags were replaced.
    Updated,
    /// The entity was already present; nothing changed.
    Duplicate,
    /// The event referenced an absent entity; nothing changed.
    Ignored,
}

impl Applied {
    /// Whether local state changed and views need to re-render.
    #[must_use]
    pub fn changed(self) -> bool {
        matches!(self, Self::Appended | Self::Joined | Self::Left | Self::Updated)
    }
}

// =============================================================================
// MESSAGE LOG
// =============================================================================

/// Append-only, arrival-ordered chat history.
#[derive(Clone, Debug, Default)]
pub struct MessageLog {
    messages: Vec<ChatMessage>,
    seen: HashSet<String>,
}

impl MessageLog {
    /// Append unless the id has already been applied.
    pub fn push(&mut self, message: ChatMessage) -> bool {
        if !self.seen.insert(message.id.clone()) {
            return false;
        }
        self.messages.push(message);
        true
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.seen.contains(id)
    }

    #[must_use]
    pub fn as_slice(&self) -> &[ChatMessage] {
        &self.messages
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    #[must_use]
    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }
}

// =============================================================================
// PARTICIPANT ROSTER
// =============================================================================

/// Deduplicated participant list.
#[derive(Clone, Debug, Default)]
pub struct ParticipantRoster {
    participants: Vec<Participant>,
}

impl ParticipantRoster {
    fn position(&self, id: &str) -> Option<usize> {
        self.participants.iter().position(|p| p.id == id)
    }

    /// Add unless the id is already present.
    pub fn join(&mut self, participant: Participant) -> bool {
        if self.position(&participant.id).is_some() {
            return false;
        }
        self.participants.push(participant);
        true
    }

    /// Remove by id. Returns the removed entry.
    pub fn leave(&mut self, id: &str) -> Option<Participant> {
        let idx = self.position(id)?;
        Some(self.participants.remove(idx))
    }

    /// Replace a present entry in place, keeping its roster position.
    pub fn update(&mut self, participant: Participant) -> bool {
        let Some(idx) = self.position(&participant.id) else {
            return false;
        };
        self.participants[idx] = participant;
        true
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.id == id)
    }

    #[must_use]
    pub fn as_slice(&self) -> &[Participant] {
        &self.participants
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.participants.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }
}

// =============================================================================
// RECONCILER
// =============================================================================

/// Local projection of one session's chat and presence.
#[derive(Clone, Debug, Default)]
pub struct Reconciler {
    messages: MessageLog,
    participants: ParticipantRoster,
}

impl Reconciler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace all local state with a server snapshot. Duplicate ids inside
    /// the snapshot collapse to their first occurrence.
    pub fn seed(&mut self, snapshot: SessionSnapshot) {
        *self = Self::default();
        for message in snapshot.messages {
            self.messages.push(message);
        }
        for participant in snapshot.participants {
            self.participants.join(participant);
        }
        debug!(
            messages = self.messages.len(),
            participants = self.participants.len(),
            "reconcile: seeded"
        );
    }

    /// Merge one event into local state.
    pub fn apply(&mut self, event: LiveEvent) -> Applied {
        let applied = match event {
            LiveEvent::MessageSent(message) => {
                if self.messages.push(message) {
                    Applied::Appended
                } else {
                    Applied::Duplicate
                }
            }
            LiveEvent::ParticipantJoined(participant) => {
                if self.participants.join(participant) {
                    Applied::Joined
                } else {
                    Applied::Duplicate
                }
            }
            LiveEvent::ParticipantLeft { id } => {
                if self.participants.leave(&id).is_some() {
                    Applied::Left
                } else {
                    Applied::Ignored
                }
            }
            LiveEvent::ParticipantUpdated(participant) => {
                if self.participants.update(participant) {
                    Applied::Updated
                } else {
                    Applied::Ignored
                }
            }
        };
        debug!(?applied, "reconcile: applied");
        applied
    }

    #[must_use]
    pub fn messages(&self) -> &MessageLog {
        &self.messages
    }

    #[must_use]
    pub fn participants(&self) -> &ParticipantRoster {
        &self.participants
    }
}

#[cfg(test)]
#[path = "reconcile_test.rs"]
mod tests;
