//! Outbound intent dispatcher.
//!
//! DESIGN
//! ======
//! Local input becomes an [`Intent`], the intent becomes a backend
//! [`Action`]. A successful send clears the draft and asks the view to anchor
//! to the live edge after a short delay, giving the server echo time to land
//! through the push channels.
//!
//! ERROR HANDLING
//! ==============
//! Failed sends are never dropped: the draft is kept, the failure is recorded
//! for the view (with its retryable flag), and `retry` resubmits the exact
//! intent that failed.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use unicode_segmentation::UnicodeSegmentation;

use crate::backend::{Action, Backend, BackendError};
use crate::frame::{ErrorCode, ErrorNotice};

// =============================================================================
// INTENT
// =============================================================================

/// A validated user action.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Intent {
    Message(String),
    Emoji(String),
    Invite(String),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum IntentError {
    #[error("message is empty")]
    Empty,
    #[error("message exceeds {max} characters")]
    TooLong { max: usize },
    #[error("not a single emoji: {0}")]
    InvalidEmoji(String),
    #[error("invite needs exactly one user id")]
    InvalidInvitee,
}

impl ErrorCode for IntentError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Empty => "E_EMPTY_MESSAGE",
            Self::TooLong { .. } => "E_MESSAGE_TOO_LONG",
            Self::InvalidEmoji(_) => "E_INVALID_EMOJI",
            Self::InvalidInvitee => "E_INVALID_INVITEE",
        }
    }
}

impl Intent {
    /// Parse raw input.
    ///
    /// - `/emoji <token>` or a bare single emoji sends an emoji
    /// - `/invite <user>` invites a user
    /// - anything else is a chat message
    ///
    /// # Errors
    ///
    /// Returns [`IntentError`] for blank input, over-long messages, and
    /// malformed commands.
    pub fn parse(input: &str, max_chars: usize) -> Result<Self, IntentError> {
        let text = input.trim();
        if text.is_empty() {
            return Err(IntentError::Empty);
        }

        if let Some(rest) = command(text, "/emoji") {
            let token = rest.trim();
            if !is_emoji_token(token) {
                return Err(IntentError::InvalidEmoji(token.to_owned()));
            }
            return Ok(Self::Emoji(token.to_owned()));
        }

        if let Some(rest) = command(text, "/invite") {
            let mut parts = rest.split_whitespace();
            return match (parts.next(), parts.next()) {
                (Some(user), None) => Ok(Self::Invite(user.to_owned())),
                _ => Err(IntentError::InvalidInvitee),
            };
        }

        if is_emoji_token(text) {
            return Ok(Self::Emoji(text.to_owned()));
        }

        if text.chars().count() > max_chars {
            return Err(IntentError::TooLong { max: max_chars });
        }
        Ok(Self::Message(text.to_owned()))
    }

    #[must_use]
    pub fn action(&self) -> Action {
        match self {
            Self::Message(content) => Action::Message { content: content.clone() },
            Self::Emoji(emoji) => Action::Emoji { emoji: emoji.clone() },
            Self::Invite(user_id) => Action::Invite { user_id: user_id.clone() },
        }
    }
}

/// Argument text of `/name args`, if `text` is that command.
fn command<'a>(text: &'a str, name: &str) -> Option<&'a str> {
    let rest = text.strip_prefix(name)?;
    (rest.is_empty() || rest.starts_with(char::is_whitespace)).then_some(rest)
}

/// Exactly one emoji grapheme, possibly with modifiers and joiners.
#[must_use]
pub fn is_emoji_token(token: &str) -> bool {
    let mut graphemes = token.graphemes(true);
    match (graphemes.next(), graphemes.next()) {
        (Some(grapheme), None) => is_emoji_grapheme(grapheme),
        _ => false,
    }
}

fn is_emoji_grapheme(grapheme: &str) -> bool {
    let Some(first) = grapheme.chars().next() else {
        return false;
    };
    if is_pictograph(first) {
        return true;
    }
    // Text-default symbols (arrows, keycaps) are emoji only with a presentation selector.
    !first.is_alphabetic()
        && !first.is_whitespace()
        && grapheme.chars().any(|c| c == EMOJI_PRESENTATION || c == COMBINING_KEYCAP)
}

const EMOJI_PRESENTATION: char = '\u{FE0F}';
const COMBINING_KEYCAP: char = '\u{20E3}';

fn is_pictograph(c: char) -> bool {
    matches!(
        u32::from(c),
        0x1F000..=0x1FAFF | 0x2600..=0x27BF | 0x2B05..=0x2B07 | 0x2B1B | 0x2B1C | 0x2B50 | 0x2B55
    )
}

// =============================================================================
// DISPATCHER
// =============================================================================

/// A send the backend accepted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sent {
    pub intent: Intent,
    /// Anchor the view to the live edge after this delay.
    pub anchor_after: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Intent(#[from] IntentError),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("no session is open")]
    NoSession,
    #[error("nothing to retry")]
    NothingToRetry,
}

impl ErrorCode for DispatchError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Intent(e) => e.error_code(),
            Self::Backend(e) => e.error_code(),
            Self::NoSession => "E_NO_SESSION",
            Self::NothingToRetry => "E_NOTHING_TO_RETRY",
        }
    }

    fn retryable(&self) -> bool {
        match self {
            Self::Backend(e) => e.retryable(),
            _ => false,
        }
    }
}

/// Owns the input draft and turns it into backend calls.
pub struct Dispatcher {
    backend: Arc<dyn Backend>,
    draft: String,
    failed: Option<(Intent, bool)>,
    last_error: Option<ErrorNotice>,
    max_chars: usize,
    anchor_delay: Duration,
}

impl Dispatcher {
    #[must_use]
    pub fn new(backend: Arc<dyn Backend>, max_chars: usize, anchor_delay: Duration) -> Self {
        Self { backend, draft: String::new(), failed: None, last_error: None, max_chars, anchor_delay }
    }

    pub fn set_draft(&mut self, text: impl Into<String>) {
        self.draft = text.into();
    }

    #[must_use]
    pub fn draft(&self) -> &str {
        &self.draft
    }

    #[must_use]
    pub fn last_error(&self) -> Option<&ErrorNotice> {
        self.last_error.as_ref()
    }

    /// Submit the current draft.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Intent`] for invalid input (draft untouched) and
    /// [`DispatchError::Backend`] when the backend rejects or is unreachable
    /// (draft kept, failure recorded).
    pub async fn submit_draft(&mut self, session_id: &str) -> Result<Sent, DispatchError> {
        let intent = Intent::parse(&self.draft, self.max_chars)?;
        self.send(session_id, intent, true).await
    }

    /// Send an emoji picked outside the text input. The draft is untouched.
    ///
    /// # Errors
    ///
    /// Same as [`Self::submit_draft`].
    pub async fn send_emoji(&mut self, session_id: &str, emoji: &str) -> Result<Sent, DispatchError> {
        let token = emoji.trim();
        if !is_emoji_token(token) {
            return Err(IntentError::InvalidEmoji(token.to_owned()).into());
        }
        self.send(session_id, Intent::Emoji(token.to_owned()), false).await
    }

    /// Resubmit the intent whose send last failed.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::NothingToRetry`] if the last send succeeded,
    /// otherwise the same errors as [`Self::submit_draft`].
    pub async fn retry(&mut self, session_id: &str) -> Result<Sent, DispatchError> {
        let Some((intent, from_draft)) = self.failed.clone() else {
            return Err(DispatchError::NothingToRetry);
        };
        // An edited draft is new input and survives the retry.
        let clear_draft = from_draft && self.draft_holds(&intent);
        self.send(session_id, intent, clear_draft).await
    }

    /// Fire a session lifecycle call (join/leave). Failures are returned but
    /// do not touch the draft or the recorded send failure.
    ///
    /// # Errors
    ///
    /// Returns the backend error unchanged.
    pub async fn notify(&self, session_id: &str, action: Action) -> Result<(), BackendError> {
        self.backend.submit(session_id, &action).await
    }

    fn draft_holds(&self, intent: &Intent) -> bool {
        Intent::parse(&self.draft, self.max_chars).as_ref() == Ok(intent)
    }

    async fn send(&mut self, session_id: &str, intent: Intent, from_draft: bool) -> Result<Sent, DispatchError> {
        if session_id.trim().is_empty() {
            return Err(DispatchError::NoSession);
        }
        match self.backend.submit(session_id, &intent.action()).await {
            Ok(()) => {
                info!(%session_id, ?intent, "dispatch: sent");
                if from_draft {
                    self.draft.clear();
                }
                self.failed = None;
                self.last_error = None;
                Ok(Sent { intent, anchor_after: self.anchor_delay })
            }
            Err(err) => {
                warn!(%session_id, error = %err, retryable = err.retryable(), "dispatch: send failed");
                self.last_error = Some(ErrorNotice::from_error(&err));
                self.failed = Some((intent, from_draft));
                Err(err.into())
            }
        }
    }
}

#[cfg(test)]
#[path = "dispatch_test.rs"]
mod tests;
