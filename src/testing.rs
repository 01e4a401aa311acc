//! Shared test fixtures.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::backend::{Action, Backend, BackendError};
use crate::event::{ChatMessage, MessageKind, Participant, Role};
use crate::frame::{Data, Frame};

/// Backend fake that records every call and replays scripted failures.
#[derive(Default)]
pub struct MockBackend {
    pub calls: Mutex<Vec<(String, Action)>>,
    failures: Mutex<VecDeque<BackendError>>,
}

impl MockBackend {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make the next call fail with `err`.
    pub fn fail_next(&self, err: BackendError) {
        self.failures.lock().unwrap().push_back(err);
    }

    #[must_use]
    pub fn actions(&self) -> Vec<Action> {
        self.calls.lock().unwrap().iter().map(|(_, a)| a.clone()).collect()
    }
}

#[async_trait::async_trait]
impl Backend for MockBackend {
    async fn submit(&self, session_id: &str, action: &Action) -> Result<(), BackendError> {
        self.calls
            .lock()
            .unwrap()
            .push((session_id.to_owned(), action.clone()));
        match self.failures.lock().unwrap().pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[must_use]
pub fn message(id: &str, content: &str) -> ChatMessage {
    ChatMessage {
        id: id.to_owned(),
        user_id: "u1".to_owned(),
        user_name: "Ann".to_owned(),
        content: content.to_owned(),
        kind: MessageKind::Text,
        timestamp: 0,
    }
}

#[must_use]
pub fn participant(id: &str) -> Participant {
    Participant {
        id: id.to_owned(),
        user_id: format!("user-{id}"),
        name: id.to_uppercase(),
        role: Role::Attendee,
        muted: false,
        video: false,
    }
}

/// Frame carrying `payload` serialized as the data map.
#[must_use]
pub fn frame_of(channel: &str, event: &str, payload: &impl serde::Serialize) -> Frame {
    let serde_json::Value::Object(map) = serde_json::to_value(payload).unwrap() else {
        panic!("payload must serialize to an object");
    };
    Frame::event(channel, event, map.into_iter().collect::<Data>())
}
