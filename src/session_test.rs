use std::time::Duration;

use super::*;
use crate::backend::BackendError;
use crate::event::{EVENT_MESSAGE_SENT, EVENT_PARTICIPANT_JOINED};
use crate::push::LocalPush;
use crate::subscription::{chat_channel, participants_channel, user_channel};
use crate::testing::{MockBackend, frame_of, message, participant};

fn live(push: &LocalPush, backend: &Arc<MockBackend>, user: Option<&str>) -> LiveSession {
    LiveSession::new(
        Arc::new(push.clone()),
        backend.clone(),
        user.map(str::to_owned),
        LiveConfig::default(),
    )
}

fn at_edge() -> ScrollMetrics {
    ScrollMetrics::new(1500.0, 2000.0, 500.0)
}

fn far_away() -> ScrollMetrics {
    ScrollMetrics::new(0.0, 2000.0, 500.0)
}

fn scroll_token(effects: &[Effect]) -> Option<ScrollToken> {
    effects.iter().find_map(|e| match e {
        Effect::ScrollToEdge(token) => Some(*token),
        _ => None,
    })
}

// =============================================================================
// open / close
// =============================================================================

#[tokio::test]
async fn open_subscribes_and_notifies_join() {
    let push = LocalPush::new();
    let backend = MockBackend::new();
    let mut session = live(&push, &backend, Some("u1"));

    let activation = session.open("42", SessionSnapshot::default()).await.unwrap();
    assert_eq!(activation, Activation::Subscribed { channels: 3, listeners: 5 });
    assert!(push.is_joined(&chat_channel("42")));
    assert!(push.is_joined(&user_channel("42", "u1")));
    assert_eq!(backend.actions(), vec![Action::Join]);
    assert_eq!(session.session_id(), Some("42"));
}

#[tokio::test]
async fn missing_user_subscribes_nothing() {
    let push = LocalPush::new();
    let backend = MockBackend::new();
    let mut session = live(&push, &backend, None);

    let activation = session.open("42", SessionSnapshot::default()).await.unwrap();
    assert_eq!(activation, Activation::Inactive);
    assert_eq!(push.total_listeners(), 0);
    assert!(backend.actions().is_empty());
}

#[tokio::test]
async fn close_releases_everything_and_notifies_leave() {
    let push = LocalPush::new();
    let backend = MockBackend::new();
    let mut session = live(&push, &backend, Some("u1"));
    session.open("42", SessionSnapshot::default()).await.unwrap();

    session.close().await;
    session.close().await;
    assert_eq!(push.total_listeners(), 0);
    assert!(push.joined_channels().is_empty());
    assert_eq!(backend.actions(), vec![Action::Join, Action::Leave]);
    assert_eq!(session.session_id(), None);
}

#[tokio::test]
async fn switching_sessions_drops_old_listeners() {
    let push = LocalPush::new();
    let backend = MockBackend::new();
    let mut session = live(&push, &backend, Some("u1"));
    session.open("42", SessionSnapshot::default()).await.unwrap();
    session.open("43", SessionSnapshot::default()).await.unwrap();

    assert_eq!(push.publish(&frame_of(&chat_channel("42"), EVENT_MESSAGE_SENT, &message("m1", "late"))), 0);
    assert_eq!(push.total_listeners(), 5);
    assert_eq!(backend.actions(), vec![Action::Join, Action::Leave, Action::Join]);
    session.pump();
    assert!(session.state().messages().is_empty());
}

#[tokio::test]
async fn feed_starts_after_listeners_are_bound() {
    let push = LocalPush::new();
    let backend = MockBackend::new();
    let mut session = live(&push, &backend, Some("u1"));

    let feed_push = push.clone();
    let (activation, feed) = session
        .open_and_feed("42", SessionSnapshot::default(), move || {
            let delivered = feed_push.publish(&frame_of(&chat_channel("42"), EVENT_MESSAGE_SENT, &message("m1", "early")));
            async move { delivered }
        })
        .await
        .unwrap();

    assert!(matches!(activation, Activation::Subscribed { .. }));
    assert_eq!(feed.await.unwrap(), 1);
    session.pump();
    assert_eq!(session.state().messages().len(), 1);
}

#[tokio::test]
async fn snapshot_seeds_state() {
    let push = LocalPush::new();
    let backend = MockBackend::new();
    let mut session = live(&push, &backend, Some("u1"));
    let snapshot = SessionSnapshot { messages: vec![message("m1", "hi")], participants: vec![participant("p1")] };
    session.open("42", snapshot).await.unwrap();

    push.publish(&frame_of(&chat_channel("42"), EVENT_MESSAGE_SENT, &message("m1", "hi")));
    let effects = session.pump();
    assert!(effects.is_empty());
    assert_eq!(session.state().messages().len(), 1);
    assert_eq!(session.state().participants().len(), 1);
}

// =============================================================================
// inbound
// =============================================================================

#[tokio::test]
async fn message_on_two_channels_renders_once() {
    let push = LocalPush::new();
    let backend = MockBackend::new();
    let mut session = live(&push, &backend, Some("u1"));
    session.open("42", SessionSnapshot::default()).await.unwrap();

    let msg = message("m1", "hello");
    push.publish(&frame_of(&chat_channel("42"), EVENT_MESSAGE_SENT, &msg));
    push.publish(&frame_of(&user_channel("42", "u1"), EVENT_MESSAGE_SENT, &msg));

    let effects = session.pump();
    assert_eq!(session.state().messages().len(), 1);
    assert!(effects.contains(&Effect::Rendered { messages: 1, participants: 0 }));
    assert!(scroll_token(&effects).is_some());
    assert!(session.markers().is_marked("m1"));
}

#[tokio::test]
async fn malformed_frame_is_counted_and_dropped() {
    let push = LocalPush::new();
    let backend = MockBackend::new();
    let mut session = live(&push, &backend, Some("u1"));
    session.open("42", SessionSnapshot::default()).await.unwrap();

    let bad = frame_of(&participants_channel("42"), EVENT_PARTICIPANT_JOINED, &serde_json::json!({ "name": "no id" }));
    push.publish(&bad);
    push.publish(&frame_of(&participants_channel("42"), EVENT_PARTICIPANT_JOINED, &participant("p1")));

    let effects = session.pump();
    assert_eq!(session.rejected_frames(), 1);
    assert_eq!(session.state().participants().len(), 1);
    assert!(effects.contains(&Effect::Rendered { messages: 0, participants: 1 }));
    assert!(scroll_token(&effects).is_none());
}

#[tokio::test(start_paused = true)]
async fn scrolled_away_shows_jump_label_until_jump() {
    let push = LocalPush::new();
    let backend = MockBackend::new();
    let mut session = live(&push, &backend, Some("u1"));
    session.open("42", SessionSnapshot::default()).await.unwrap();

    push.publish(&frame_of(&chat_channel("42"), EVENT_MESSAGE_SENT, &message("m1", "a")));
    let token = scroll_token(&session.pump()).unwrap();
    session.scroll_completed(token, at_edge());

    session.scroll(far_away());
    tokio::time::advance(Duration::from_millis(50)).await;
    session.tick();
    assert!(!session.follower().anchored());

    push.publish(&frame_of(&chat_channel("42"), EVENT_MESSAGE_SENT, &message("m2", "b")));
    let effects = session.pump();
    assert!(scroll_token(&effects).is_none());
    assert!(effects.contains(&Effect::JumpLabel(Some("1 new message".into()))));

    let effects = session.jump_to_edge();
    assert!(scroll_token(&effects).is_some());
    assert!(effects.contains(&Effect::JumpLabel(None)));
}

#[tokio::test(start_paused = true)]
async fn own_scroll_animation_does_not_unanchor() {
    let push = LocalPush::new();
    let backend = MockBackend::new();
    let mut session = live(&push, &backend, Some("u1"));
    session.open("42", SessionSnapshot::default()).await.unwrap();

    push.publish(&frame_of(&chat_channel("42"), EVENT_MESSAGE_SENT, &message("m1", "a")));
    let token = scroll_token(&session.pump()).unwrap();

    // Animation frames of the scroll we started, reported before it completes.
    session.scroll(far_away());
    session.scroll_completed(token, at_edge());
    tokio::time::advance(Duration::from_millis(60)).await;
    session.tick();
    assert!(session.follower().anchored());

    push.publish(&frame_of(&chat_channel("42"), EVENT_MESSAGE_SENT, &message("m2", "b")));
    let effects = session.pump();
    assert!(scroll_token(&effects).is_some());
    assert!(!effects.iter().any(|e| matches!(e, Effect::JumpLabel(Some(_)))));
}

#[tokio::test(start_paused = true)]
async fn user_scroll_after_completion_still_unanchors() {
    let push = LocalPush::new();
    let backend = MockBackend::new();
    let mut session = live(&push, &backend, Some("u1"));
    session.open("42", SessionSnapshot::default()).await.unwrap();

    let effects = session.jump_to_edge();
    let token = scroll_token(&effects).unwrap();
    session.scroll_completed(token, at_edge());

    session.scroll(far_away());
    tokio::time::advance(Duration::from_millis(50)).await;
    session.tick();
    assert!(!session.follower().anchored());
}

#[tokio::test(start_paused = true)]
async fn arrival_markers_expire_on_tick() {
    let push = LocalPush::new();
    let backend = MockBackend::new();
    let mut session = live(&push, &backend, Some("u1"));
    session.open("42", SessionSnapshot::default()).await.unwrap();

    push.publish(&frame_of(&participants_channel("42"), EVENT_PARTICIPANT_JOINED, &participant("p1")));
    session.pump();
    let due = session.next_deadline().unwrap();
    assert_eq!(due, Instant::now() + Duration::from_millis(500));

    tokio::time::advance(Duration::from_millis(499)).await;
    assert!(session.tick().is_empty());

    tokio::time::advance(Duration::from_millis(1)).await;
    assert_eq!(session.tick(), vec![Effect::MarkersExpired(vec!["p1".into()])]);
    assert!(session.markers().is_empty());
}

// =============================================================================
// outbound
// =============================================================================

#[tokio::test(start_paused = true)]
async fn successful_submit_anchors_after_echo_delay() {
    let push = LocalPush::new();
    let backend = MockBackend::new();
    let mut session = live(&push, &backend, Some("u1"));
    session.open("42", SessionSnapshot::default()).await.unwrap();

    session.set_draft("hello");
    session.submit().await.unwrap();
    assert_eq!(session.dispatcher().draft(), "");

    tokio::time::advance(Duration::from_millis(99)).await;
    assert!(scroll_token(&session.tick()).is_none());

    tokio::time::advance(Duration::from_millis(1)).await;
    assert!(scroll_token(&session.tick()).is_some());
    assert!(session.next_deadline().is_none());
}

#[tokio::test]
async fn failed_submit_surfaces_error_effect() {
    let push = LocalPush::new();
    let backend = MockBackend::new();
    let mut session = live(&push, &backend, Some("u1"));
    session.open("42", SessionSnapshot::default()).await.unwrap();
    backend.fail_next(BackendError::Status { status: 500, body: "boom".into() });

    session.command(Command::SetDraft("hello".into())).await;
    let effects = session.command(Command::Submit).await;
    let [Effect::Error(notice)] = effects.as_slice() else {
        panic!("expected one error effect, got {effects:?}");
    };
    assert_eq!(notice.code, "E_BACKEND_STATUS");
    assert!(notice.retryable);
    assert_eq!(session.dispatcher().draft(), "hello");

    assert_eq!(session.command(Command::Retry).await, vec![Effect::DraftCleared]);
}

#[tokio::test]
async fn submit_without_session_is_rejected() {
    let push = LocalPush::new();
    let backend = MockBackend::new();
    let mut session = live(&push, &backend, Some("u1"));
    session.set_draft("hello");
    assert!(matches!(session.submit().await, Err(DispatchError::NoSession)));
}

// =============================================================================
// run loop
// =============================================================================

#[tokio::test(start_paused = true)]
async fn run_loop_applies_frames_and_releases_on_close() {
    let push = LocalPush::new();
    let backend = MockBackend::new();
    let session = live(&push, &backend, Some("u1"));
    let (cmd_tx, cmd_rx) = mpsc::channel(16);
    let (fx_tx, mut fx_rx) = mpsc::channel(16);
    let handle = tokio::spawn(session.run(cmd_rx, fx_tx));

    cmd_tx
        .send(Command::Open { session_id: "42".into(), snapshot: SessionSnapshot::default() })
        .await
        .unwrap();
    assert_eq!(fx_rx.recv().await, Some(Effect::Rendered { messages: 0, participants: 0 }));

    push.publish(&frame_of(&chat_channel("42"), EVENT_MESSAGE_SENT, &message("m1", "hi")));
    assert_eq!(fx_rx.recv().await, Some(Effect::Rendered { messages: 1, participants: 0 }));
    assert!(matches!(fx_rx.recv().await, Some(Effect::ScrollToEdge(_))));

    cmd_tx.send(Command::Close).await.unwrap();
    handle.await.unwrap();
    assert_eq!(push.total_listeners(), 0);
    assert_eq!(backend.actions(), vec![Action::Join, Action::Leave]);
}

#[tokio::test]
async fn run_loop_exits_when_commands_close() {
    let push = LocalPush::new();
    let backend = MockBackend::new();
    let session = live(&push, &backend, Some("u1"));
    let (cmd_tx, cmd_rx) = mpsc::channel(4);
    let (fx_tx, mut fx_rx) = mpsc::channel(4);
    let handle = tokio::spawn(session.run(cmd_rx, fx_tx));

    cmd_tx
        .send(Command::Open { session_id: "42".into(), snapshot: SessionSnapshot::default() })
        .await
        .unwrap();
    fx_rx.recv().await;
    drop(cmd_tx);
    handle.await.unwrap();
    assert_eq!(push.total_listeners(), 0);
}
