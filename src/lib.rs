//! livesync: live chat and presence reconciliation for meeting sessions.
//!
//! A [`LiveSession`] seeds its state from a server snapshot, subscribes to the
//! session's push channels, and merges pushed events into a de-duplicated
//! message log and participant roster. Around that it keeps the view state
//! that depends on the merges: whether the list follows its live edge, how
//! many entries arrived unseen, and which entries just arrived.
//!
//! Outbound actions go through a [`Dispatcher`] to a [`Backend`]; the server
//! echoes them back through the push channels.

pub mod backend;
pub mod bridge;
pub mod config;
pub mod dispatch;
pub mod event;
pub mod follow;
pub mod frame;
pub mod markers;
pub mod push;
pub mod reconcile;
pub mod session;
pub mod subscription;

#[cfg(test)]
mod testing;

pub use backend::{Action, Backend, BackendError, HttpBackend};
pub use config::{BackendConfig, ConfigError, LiveConfig};
pub use dispatch::{DispatchError, Dispatcher, Intent, IntentError};
pub use event::{ChatMessage, LiveEvent, Participant, SessionSnapshot};
pub use follow::{Edge, EdgeFollower, FollowAction, ScrollMetrics, ScrollToken};
pub use frame::{ErrorCode, ErrorNotice, Frame};
pub use markers::ArrivalMarkers;
pub use push::{LocalPush, PushError, PushService};
pub use reconcile::{Applied, Reconciler};
pub use session::{Command, Effect, LiveSession};
pub use subscription::{Activation, SessionScope, SubscribeError, Subscriptions};
