use super::*;

#[test]
fn event_sets_fields() {
    let frame = Frame::event("session.42.chat", "message.sent", Data::new());
    assert_eq!(frame.channel, "session.42.chat");
    assert_eq!(frame.event, "message.sent");
    assert!(frame.from.is_none());
    assert!(frame.ts > 0);
}

#[test]
fn prefix_extraction() {
    let frame = Frame::event("c", "participant.joined", Data::new());
    assert_eq!(frame.prefix(), "participant");

    let frame = Frame::event("c", "noseparator", Data::new());
    assert_eq!(frame.prefix(), "noseparator");
}

#[test]
fn json_round_trip() {
    let original = Frame::event("session.7.participants", "participant.left", Data::new())
        .with_from("server")
        .with_data("id", "p1");

    let json = serde_json::to_string(&original).expect("serialize");
    let restored: Frame = serde_json::from_str(&json).expect("deserialize");

    assert_eq!(restored, original);
    assert_eq!(restored.data.get("id").and_then(|v| v.as_str()), Some("p1"));
}

#[test]
fn minimal_json_fills_defaults() {
    let json = r#"{"channel":"session.1.chat","event":"message.sent"}"#;
    let frame: Frame = serde_json::from_str(json).expect("deserialize");
    assert_eq!(frame.ts, 0);
    assert!(frame.data.is_empty());
    assert!(frame.from.is_none());
}

#[test]
fn error_code_defaults_to_not_retryable() {
    #[derive(Debug, thiserror::Error)]
    #[error("bad payload")]
    struct BadPayload;

    impl ErrorCode for BadPayload {
        fn error_code(&self) -> &'static str {
            "E_BAD_PAYLOAD"
        }
    }

    assert_eq!(BadPayload.error_code(), "E_BAD_PAYLOAD");
    assert!(!BadPayload.retryable());
    assert_eq!(BadPayload.to_string(), "bad payload");
}

#[test]
fn error_notice_flattens_typed_error() {
    #[derive(Debug, thiserror::Error)]
    #[error("backend unavailable")]
    struct Unavailable;

    impl ErrorCode for Unavailable {
        fn error_code(&self) -> &'static str {
            "E_UNAVAILABLE"
        }

        fn retryable(&self) -> bool {
            true
        }
    }

    let notice = ErrorNotice::from_error(&Unavailable);
    assert_eq!(notice.code, "E_UNAVAILABLE");
    assert_eq!(notice.message, "backend unavailable");
    assert!(notice.retryable);
}
