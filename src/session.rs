//! Live session: one chat and presence view over one meeting session.
//!
//! ARCHITECTURE
//! ============
//! `LiveSession` owns everything a live view needs: its subscriptions, the
//! reconciled collections, the edge follower, arrival markers, and the
//! outbound dispatcher. Push listeners only enqueue frames; all state changes
//! happen inside `LiveSession` methods on a single task, so no locking is
//! needed around local state.
//!
//! The view talks to it through [`Command`]s in and [`Effect`]s out. `run`
//! is the cooperative event loop: inbound frames, view commands, and the next
//! timer deadline (marker expiry, debounced scroll, delayed anchor) are
//! multiplexed with `tokio::select!`.
//!
//! LIFECYCLE
//! =========
//! 1. `open(session_id, snapshot)` → subscribe, seed, notify backend join
//! 2. frames / commands / timers → effects
//! 3. `close()` or loop exit → release subscriptions, notify backend leave

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::backend::{Action, Backend};
use crate::config::LiveConfig;
use crate::dispatch::{DispatchError, Dispatcher};
use crate::event::{LiveEvent, SessionSnapshot};
use crate::follow::{Edge, EdgeFollower, FollowAction, ScrollMetrics, ScrollToken};
use crate::frame::{ErrorNotice, Frame};
use crate::markers::ArrivalMarkers;
use crate::push::PushService;
use crate::reconcile::{Applied, Reconciler};
use crate::subscription::{Activation, SessionScope, SubscribeError, Subscriptions};

// =============================================================================
// COMMANDS / EFFECTS
// =============================================================================

/// Input from the view.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    Open { session_id: String, snapshot: SessionSnapshot },
    Close,
    Scroll(ScrollMetrics),
    ScrollCompleted { token: ScrollToken, metrics: ScrollMetrics },
    JumpToEdge,
    SetDraft(String),
    Submit,
    SendEmoji(String),
    Retry,
}

/// Output to the view.
#[derive(Clone, Debug, PartialEq)]
pub enum Effect {
    /// Collections changed; re-render with these sizes.
    Rendered { messages: usize, participants: usize },
    /// Scroll to the live edge, then answer with `ScrollCompleted`.
    ScrollToEdge(ScrollToken),
    /// Jump affordance label changed (`None` hides it).
    JumpLabel(Option<String>),
    /// Arrival markers that just expired.
    MarkersExpired(Vec<String>),
    /// The draft was cleared after a successful send.
    DraftCleared,
    /// Something the user should see failed.
    Error(ErrorNotice),
}

// =============================================================================
// LIVE SESSION
// =============================================================================

pub struct LiveSession {
    user_id: Option<String>,
    config: LiveConfig,
    session_id: Option<String>,
    subscriptions: Subscriptions,
    inbound: mpsc::UnboundedReceiver<Frame>,
    reconciler: Reconciler,
    follower: EdgeFollower,
    markers: ArrivalMarkers,
    dispatcher: Dispatcher,
    pending_anchor: Option<Instant>,
    jump_label: Option<String>,
    rejected_frames: u64,
}

impl LiveSession {
    /// `user_id` is the viewing user; without one the session never
    /// subscribes.
    #[must_use]
    pub fn new(
        push: Arc<dyn PushService>,
        backend: Arc<dyn Backend>,
        user_id: Option<String>,
        config: LiveConfig,
    ) -> Self {
        let (tx, inbound) = mpsc::unbounded_channel();
        Self {
            user_id,
            config,
            session_id: None,
            subscriptions: Subscriptions::new(push, tx),
            inbound,
            reconciler: Reconciler::new(),
            follower: Self::fresh_follower(&config),
            markers: ArrivalMarkers::new(config.marker_ttl),
            dispatcher: Dispatcher::new(backend, config.max_message_chars, config.echo_anchor_delay),
            pending_anchor: None,
            jump_label: None,
            rejected_frames: 0,
        }
    }

    fn fresh_follower(config: &LiveConfig) -> EdgeFollower {
        EdgeFollower::new(Edge::End, config.edge_tolerance_px, config.scroll_debounce)
    }

    // -------------------------------------------------------------------------
    // accessors
    // -------------------------------------------------------------------------

    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    #[must_use]
    pub fn state(&self) -> &Reconciler {
        &self.reconciler
    }

    #[must_use]
    pub fn follower(&self) -> &EdgeFollower {
        &self.follower
    }

    #[must_use]
    pub fn markers(&self) -> &ArrivalMarkers {
        &self.markers
    }

    #[must_use]
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    #[must_use]
    pub fn subscriptions(&self) -> &Subscriptions {
        &self.subscriptions
    }

    /// Frames dropped because their payload failed validation.
    #[must_use]
    pub fn rejected_frames(&self) -> u64 {
        self.rejected_frames
    }

    // -------------------------------------------------------------------------
    // lifecycle
    // -------------------------------------------------------------------------

    /// Switch to `session_id`, seeding local state from `snapshot`.
    ///
    /// # Errors
    ///
    /// Returns [`SubscribeError`] if channels cannot be joined. Local state is
    /// still seeded so the snapshot stays visible.
    pub async fn open(&mut self, session_id: &str, snapshot: SessionSnapshot) -> Result<Activation, SubscribeError> {
        if self.session_id.as_deref().is_some_and(|current| current != session_id) {
            self.close().await;
        }

        self.reset_view();
        self.reconciler.seed(snapshot);
        self.session_id = Some(session_id.to_owned()).filter(|s| !s.trim().is_empty());

        let activation = self
            .subscriptions
            .activate(SessionScope::new(session_id, self.user_id.clone()))?;
        if let Activation::Subscribed { .. } = activation {
            info!(%session_id, "session: opened");
            if let Err(e) = self.dispatcher.notify(session_id, Action::Join).await {
                warn!(%session_id, error = %e, "session: backend join failed");
            }
        }
        Ok(activation)
    }

    /// Open `session_id`, then start the push feed built by `feed`.
    ///
    /// The feed is created only after listeners are bound, so frames it
    /// delivers straight away are not lost.
    ///
    /// # Errors
    ///
    /// Same as [`Self::open`]; the feed is not started on error.
    pub async fn open_and_feed<F, Fut>(
        &mut self,
        session_id: &str,
        snapshot: SessionSnapshot,
        feed: F,
    ) -> Result<(Activation, JoinHandle<Fut::Output>), SubscribeError>
    where
        F: FnOnce() -> Fut,
        Fut: Future + Send + 'static,
        Fut::Output: Send + 'static,
    {
        let activation = self.open(session_id, snapshot).await?;
        Ok((activation, tokio::spawn(feed())))
    }

    /// Release subscriptions and tell the backend we left. Safe to call twice.
    pub async fn close(&mut self) {
        let was_active = self.subscriptions.is_active();
        self.subscriptions.deactivate();
        self.drain_inbound();
        let Some(session_id) = self.session_id.take() else {
            return;
        };
        if was_active {
            if let Err(e) = self.dispatcher.notify(&session_id, Action::Leave).await {
                warn!(%session_id, error = %e, "session: backend leave failed");
            }
        }
        info!(%session_id, "session: closed");
    }

    fn reset_view(&mut self) {
        self.drain_inbound();
        self.follower = Self::fresh_follower(&self.config);
        self.markers.clear();
        self.pending_anchor = None;
        self.jump_label = None;
    }

    fn drain_inbound(&mut self) {
        while self.inbound.try_recv().is_ok() {}
    }

    // -------------------------------------------------------------------------
    // inbound
    // -------------------------------------------------------------------------

    /// Apply every frame queued by the push listeners.
    pub fn pump(&mut self) -> Vec<Effect> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.inbound.try_recv() {
            frames.push(frame);
        }
        self.apply_frames(frames)
    }

    fn apply_frames(&mut self, frames: Vec<Frame>) -> Vec<Effect> {
        let now = Instant::now();
        let mut appended = 0;
        let mut changed = false;

        for frame in frames {
            if !self.subscriptions.channels().contains(&frame.channel) {
                debug!(channel = %frame.channel, "session: frame for inactive channel dropped");
                continue;
            }
            let event = match LiveEvent::from_frame(&frame) {
                Ok(event) => event,
                Err(e) => {
                    self.rejected_frames += 1;
                    warn!(channel = %frame.channel, event = %frame.event, error = %e, "session: rejected frame");
                    continue;
                }
            };

            let entity_id = event.entity_id().to_owned();
            let applied = self.reconciler.apply(event);
            match applied {
                Applied::Appended => {
                    appended += 1;
                    self.markers.mark_at(entity_id, now);
                }
                Applied::Joined => self.markers.mark_at(entity_id, now),
                _ => {}
            }
            changed |= applied.changed();
        }

        let mut effects = Vec::new();
        if changed {
            effects.push(self.rendered());
        }
        match self.follower.on_appended(appended) {
            FollowAction::ScrollToEdge(token) => effects.push(Effect::ScrollToEdge(token)),
            FollowAction::ShowJump { .. } | FollowAction::Stay => {}
        }
        self.push_label_change(&mut effects);
        effects
    }

    fn rendered(&self) -> Effect {
        Effect::Rendered {
            messages: self.reconciler.messages().len(),
            participants: self.reconciler.participants().len(),
        }
    }

    fn push_label_change(&mut self, effects: &mut Vec<Effect>) {
        let label = self.follower.jump_label();
        if label != self.jump_label {
            self.jump_label.clone_from(&label);
            effects.push(Effect::JumpLabel(label));
        }
    }

    // -------------------------------------------------------------------------
    // viewport
    // -------------------------------------------------------------------------

    /// Record a user scroll; evaluated by `tick` once the debounce settles.
    pub fn scroll(&mut self, metrics: ScrollMetrics) {
        self.follower.note_scroll_at(metrics, Instant::now());
    }

    pub fn scroll_completed(&mut self, token: ScrollToken, metrics: ScrollMetrics) -> Vec<Effect> {
        let mut effects = Vec::new();
        self.follower.complete_scroll(token, metrics);
        self.push_label_change(&mut effects);
        effects
    }

    pub fn jump_to_edge(&mut self) -> Vec<Effect> {
        let mut effects = vec![Effect::ScrollToEdge(self.follower.request_anchor())];
        self.push_label_change(&mut effects);
        effects
    }

    /// Earliest moment `tick` has work to do.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        [self.markers.next_expiry(), self.follower.next_deadline(), self.pending_anchor]
            .into_iter()
            .flatten()
            .min()
    }

    /// Run due timers: marker expiry, debounced scroll, delayed anchor.
    pub fn tick(&mut self) -> Vec<Effect> {
        let now = Instant::now();
        let mut effects = Vec::new();

        let expired = self.markers.prune_at(now);
        if !expired.is_empty() {
            effects.push(Effect::MarkersExpired(expired));
        }

        self.follower.settle_at(now);

        if self.pending_anchor.is_some_and(|due| due <= now) {
            self.pending_anchor = None;
            effects.push(Effect::ScrollToEdge(self.follower.request_anchor()));
        }

        self.push_label_change(&mut effects);
        effects
    }

    // -------------------------------------------------------------------------
    // outbound
    // -------------------------------------------------------------------------

    pub fn set_draft(&mut self, text: impl Into<String>) {
        self.dispatcher.set_draft(text);
    }

    /// Submit the draft. On success the view anchors after the echo delay.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError`] for invalid input, no open session, or a
    /// backend failure (draft kept).
    pub async fn submit(&mut self) -> Result<(), DispatchError> {
        let session_id = self.session_id.clone().unwrap_or_default();
        let sent = self.dispatcher.submit_draft(&session_id).await?;
        self.pending_anchor = Some(Instant::now() + sent.anchor_after);
        Ok(())
    }

    /// # Errors
    ///
    /// Same as [`Self::submit`].
    pub async fn send_emoji(&mut self, emoji: &str) -> Result<(), DispatchError> {
        let session_id = self.session_id.clone().unwrap_or_default();
        let sent = self.dispatcher.send_emoji(&session_id, emoji).await?;
        self.pending_anchor = Some(Instant::now() + sent.anchor_after);
        Ok(())
    }

    /// # Errors
    ///
    /// Same as [`Self::submit`], or [`DispatchError::NothingToRetry`].
    pub async fn retry(&mut self) -> Result<(), DispatchError> {
        let session_id = self.session_id.clone().unwrap_or_default();
        let sent = self.dispatcher.retry(&session_id).await?;
        self.pending_anchor = Some(Instant::now() + sent.anchor_after);
        Ok(())
    }

    // -------------------------------------------------------------------------
    // event loop
    // -------------------------------------------------------------------------

    /// Apply one view command and return the resulting effects.
    pub async fn command(&mut self, command: Command) -> Vec<Effect> {
        match command {
            Command::Open { session_id, snapshot } => match self.open(&session_id, snapshot).await {
                Ok(_) => vec![self.rendered()],
                Err(e) => vec![self.rendered(), Effect::Error(ErrorNotice::from_error(&e))],
            },
            Command::Close => {
                self.close().await;
                Vec::new()
            }
            Command::Scroll(metrics) => {
                self.scroll(metrics);
                Vec::new()
            }
            Command::ScrollCompleted { token, metrics } => self.scroll_completed(token, metrics),
            Command::JumpToEdge => self.jump_to_edge(),
            Command::SetDraft(text) => {
                self.set_draft(text);
                Vec::new()
            }
            Command::Submit => {
                let had_draft = !self.dispatcher.draft().is_empty();
                match self.submit().await {
                    Ok(()) if had_draft => vec![Effect::DraftCleared],
                    Ok(()) => Vec::new(),
                    Err(e) => vec![Effect::Error(ErrorNotice::from_error(&e))],
                }
            }
            Command::SendEmoji(emoji) => Self::outcome(self.send_emoji(&emoji).await),
            Command::Retry => {
                let was_draft = !self.dispatcher.draft().is_empty();
                match self.retry().await {
                    Ok(()) if was_draft && self.dispatcher.draft().is_empty() => vec![Effect::DraftCleared],
                    other => Self::outcome(other),
                }
            }
        }
    }

    fn outcome(result: Result<(), DispatchError>) -> Vec<Effect> {
        match result {
            Ok(()) => Vec::new(),
            Err(e) => vec![Effect::Error(ErrorNotice::from_error(&e))],
        }
    }

    /// Wait for inbound frames or the next due timer and apply them.
    ///
    /// Cancel safe: nothing is applied until the wait completes.
    pub async fn next_effects(&mut self) -> Vec<Effect> {
        let deadline = self.next_deadline();
        let wake = tokio::select! {
            Some(frame) = self.inbound.recv() => Wake::Frame(frame),
            () = sleep_until(deadline) => Wake::Timer,
        };
        match wake {
            Wake::Frame(first) => {
                let mut frames = vec![first];
                while let Ok(frame) = self.inbound.try_recv() {
                    frames.push(frame);
                }
                self.apply_frames(frames)
            }
            Wake::Timer => self.tick(),
        }
    }

    /// Drive the session until `Command::Close`, the command channel closes,
    /// or the effect receiver goes away. Subscriptions are released on every
    /// exit path.
    pub async fn run(mut self, mut commands: mpsc::Receiver<Command>, effects: mpsc::Sender<Effect>) {
        loop {
            let step = tokio::select! {
                cmd = commands.recv() => Step::Command(cmd),
                out = self.next_effects() => Step::Effects(out),
            };

            let out = match step {
                Step::Command(None | Some(Command::Close)) => break,
                Step::Command(Some(cmd)) => self.command(cmd).await,
                Step::Effects(out) => out,
            };

            if !forward(&effects, out).await {
                debug!("session: effect receiver closed");
                break;
            }
        }
        self.close().await;
    }
}

enum Wake {
    Frame(Frame),
    Timer,
}

enum Step {
    Command(Option<Command>),
    Effects(Vec<Effect>),
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(due) => tokio::time::sleep_until(due).await,
        None => std::future::pending().await,
    }
}

async fn forward(effects: &mpsc::Sender<Effect>, out: Vec<Effect>) -> bool {
    for effect in out {
        if effects.send(effect).await.is_err() {
            return false;
        }
    }
    true
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
