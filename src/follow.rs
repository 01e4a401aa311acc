//! Live-edge follower for scrolling lists.
//!
//! DESIGN
//! ======
//! One follower serves every live list (chat, participant feeds) with a single
//! tolerance policy. The list is "anchored" when the viewport sits within
//! `tolerance_px` of the live edge; anchored lists auto-advance on append,
//! unanchored ones accumulate an unseen count for a jump affordance.
//!
//! A programmatic scroll is tracked by an explicit token: while one is in
//! flight, scroll observations are ignored so the follower's own movement is
//! never mistaken for the user scrolling away. The token is cleared by the
//! matching completion callback, not by a timer.

use std::time::Duration;

use tokio::time::Instant;
use tracing::trace;

pub const DEFAULT_EDGE_TOLERANCE_PX: f64 = 100.0;
pub const DEFAULT_SCROLL_DEBOUNCE_MS: u64 = 50;

/// Raw scroll-container measurements, in CSS pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScrollMetrics {
    pub scroll_top: f64,
    pub scroll_height: f64,
    pub client_height: f64,
}

impl ScrollMetrics {
    #[must_use]
    pub fn new(scroll_top: f64, scroll_height: f64, client_height: f64) -> Self {
        Self { scroll_top, scroll_height, client_height }
    }
}

/// Which end of the list receives new entries.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Edge {
    /// Newest at the bottom (chat).
    #[default]
    End,
    /// Newest at the top (feeds).
    Start,
}

impl Edge {
    /// Pixels between the viewport and the live edge.
    #[must_use]
    pub fn distance(self, m: ScrollMetrics) -> f64 {
        match self {
            Self::End => m.scroll_height - m.scroll_top - m.client_height,
            Self::Start => m.scroll_top,
        }
    }
}

/// Identifies one programmatic scroll.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ScrollToken(u64);

/// What the view should do after entries were appended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FollowAction {
    /// Scroll to the live edge and report back with the token.
    ScrollToEdge(ScrollToken),
    /// Keep position; show the jump affordance with this many unseen entries.
    ShowJump { unseen: usize },
    /// Nothing to do.
    Stay,
}

#[derive(Clone, Debug)]
pub struct EdgeFollower {
    edge: Edge,
    tolerance_px: f64,
    debounce: Duration,
    anchored: bool,
    unseen: usize,
    in_flight: Option<ScrollToken>,
    next_token: u64,
    pending: Option<(ScrollMetrics, Instant)>,
}

impl Default for EdgeFollower {
    fn default() -> Self {
        Self::new(Edge::End, DEFAULT_EDGE_TOLERANCE_PX, Duration::from_millis(DEFAULT_SCROLL_DEBOUNCE_MS))
    }
}

impl EdgeFollower {
    /// A fresh follower starts anchored: a newly opened list shows its live edge.
    #[must_use]
    pub fn new(edge: Edge, tolerance_px: f64, debounce: Duration) -> Self {
        Self {
            edge,
            tolerance_px,
            debounce,
            anchored: true,
            unseen: 0,
            in_flight: None,
            next_token: 0,
            pending: None,
        }
    }

    /// Strict comparison: a viewport exactly `tolerance_px` away is not anchored.
    #[must_use]
    pub fn is_at_edge(&self, metrics: ScrollMetrics) -> bool {
        self.edge.distance(metrics) < self.tolerance_px
    }

    #[must_use]
    pub fn anchored(&self) -> bool {
        self.anchored
    }

    #[must_use]
    pub fn unseen(&self) -> usize {
        self.unseen
    }

    #[must_use]
    pub fn scroll_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Apply a user scroll immediately. Returns the anchored flag afterwards.
    pub fn observe(&mut self, metrics: ScrollMetrics) -> bool {
        if self.in_flight.is_some() {
            trace!(?metrics, "follow: scroll ignored during programmatic scroll");
            return self.anchored;
        }
        self.anchored = self.is_at_edge(metrics);
        if self.anchored {
            self.unseen = 0;
        }
        self.anchored
    }

    /// Record a scroll for debounced evaluation by [`Self::settle_at`].
    /// Ignored while a programmatic scroll is in flight.
    pub fn note_scroll_at(&mut self, metrics: ScrollMetrics, now: Instant) {
        if self.in_flight.is_some() {
            trace!(?metrics, "follow: scroll note ignored during programmatic scroll");
            return;
        }
        self.pending = Some((metrics, now + self.debounce));
    }

    /// Evaluate the latest noted scroll once its debounce window has passed.
    pub fn settle_at(&mut self, now: Instant) -> Option<bool> {
        let (metrics, due) = self.pending?;
        if now < due {
            return None;
        }
        self.pending = None;
        Some(self.observe(metrics))
    }

    /// When the pending debounced scroll becomes due.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.map(|(_, due)| due)
    }

    /// React to `count` entries appended at the live edge.
    pub fn on_appended(&mut self, count: usize) -> FollowAction {
        if count == 0 {
            return FollowAction::Stay;
        }
        if self.anchored {
            return FollowAction::ScrollToEdge(self.begin_scroll());
        }
        self.unseen = self.unseen.saturating_add(count);
        FollowAction::ShowJump { unseen: self.unseen }
    }

    /// Force a scroll to the live edge (jump button, own message sent).
    pub fn request_anchor(&mut self) -> ScrollToken {
        self.begin_scroll()
    }

    fn begin_scroll(&mut self) -> ScrollToken {
        self.next_token += 1;
        let token = ScrollToken(self.next_token);
        self.in_flight = Some(token);
        self.anchored = true;
        self.unseen = 0;
        self.pending = None;
        token
    }

    /// Finish a programmatic scroll. Stale tokens (superseded by a newer
    /// scroll) are ignored and return `false`.
    pub fn complete_scroll(&mut self, token: ScrollToken, metrics: ScrollMetrics) -> bool {
        if self.in_flight != Some(token) {
            return false;
        }
        self.in_flight = None;
        self.pending = None;
        self.observe(metrics);
        true
    }

    /// Label for the jump affordance, `None` when it should be hidden.
    #[must_use]
    pub fn jump_label(&self) -> Option<String> {
        match (self.anchored, self.unseen) {
            (true, _) | (false, 0) => None,
            (false, 1) => Some("1 new message".to_owned()),
            (false, n) => Some(format!("{n} new messages")),
        }
    }
}

#[cfg(test)]
#[path = "follow_test.rs"]
mod tests;
