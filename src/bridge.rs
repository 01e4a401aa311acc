//! Websocket feed into the in-process push registry.
//!
//! The realtime server pushes one JSON [`Frame`] per websocket message (text
//! or binary). The bridge decodes each one and publishes it on a
//! [`LocalPush`], which delivers it to whatever listeners live sessions have
//! bound. Frames nobody listens to are dropped by the registry.

use futures_util::{Stream, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, info, warn};

use crate::frame::{ErrorCode, Frame};
use crate::push::LocalPush;

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("invalid push URL: {0}")]
    InvalidUrl(String),
    #[error("websocket connect failed: {0}")]
    Connect(Box<tungstenite::Error>),
    #[error("websocket stream failed: {0}")]
    Stream(Box<tungstenite::Error>),
    #[error("frame decode failed: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ErrorCode for BridgeError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidUrl(_) => "E_INVALID_PUSH_URL",
            Self::Connect(_) => "E_PUSH_CONNECT",
            Self::Stream(_) => "E_PUSH_STREAM",
            Self::Decode(_) => "E_FRAME_DECODE",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Connect(_) | Self::Stream(_))
    }
}

/// Websocket URL for `base`. `http(s)` is mapped to `ws(s)`.
///
/// # Errors
///
/// Returns [`BridgeError::InvalidUrl`] for any other scheme.
pub fn push_url(base: &str) -> Result<String, BridgeError> {
    let base = base.trim().trim_end_matches('/');
    if let Some(rest) = base.strip_prefix("http://") {
        return Ok(format!("ws://{rest}"));
    }
    if let Some(rest) = base.strip_prefix("https://") {
        return Ok(format!("wss://{rest}"));
    }
    if base.starts_with("ws://") || base.starts_with("wss://") {
        return Ok(base.to_owned());
    }
    Err(BridgeError::InvalidUrl(base.to_owned()))
}

/// Decode one websocket message. Control messages yield `None`.
///
/// # Errors
///
/// Returns [`BridgeError::Decode`] if a data message is not a JSON frame.
pub fn decode_message(message: &Message) -> Result<Option<Frame>, BridgeError> {
    let frame = match message {
        Message::Text(text) => serde_json::from_str(text.as_str())?,
        Message::Binary(bytes) => serde_json::from_slice(bytes)?,
        Message::Ping(_) | Message::Pong(_) | Message::Close(_) | Message::Frame(_) => return Ok(None),
    };
    Ok(Some(frame))
}

/// Publish every frame from `stream` until it ends or the peer closes.
/// Undecodable messages are logged and skipped. Returns frames published.
///
/// # Errors
///
/// Returns [`BridgeError::Stream`] if the underlying transport fails.
pub async fn forward<S>(mut stream: S, push: &LocalPush) -> Result<u64, BridgeError>
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    let mut published = 0_u64;
    while let Some(message) = stream.next().await {
        let message = message.map_err(|e| BridgeError::Stream(Box::new(e)))?;
        if let Message::Close(reason) = &message {
            debug!(?reason, "bridge: peer closed");
            break;
        }
        match decode_message(&message) {
            Ok(Some(frame)) => {
                let delivered = push.publish(&frame);
                debug!(channel = %frame.channel, event = %frame.event, delivered, "bridge: frame");
                published += 1;
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "bridge: dropped undecodable message"),
        }
    }
    Ok(published)
}

/// Connect to `url` and forward its frames into `push` until the socket closes.
///
/// # Errors
///
/// Returns [`BridgeError`] if the URL is invalid, the connection cannot be
/// established, or the stream fails.
pub async fn run(url: &str, push: LocalPush) -> Result<u64, BridgeError> {
    let url = push_url(url)?;
    let (stream, _) = connect_async(url.as_str())
        .await
        .map_err(|e| BridgeError::Connect(Box::new(e)))?;
    info!(%url, "bridge: connected");

    let published = forward(stream, &push).await?;
    info!(%url, published, "bridge: disconnected");
    Ok(published)
}

#[cfg(test)]
#[path = "bridge_test.rs"]
mod tests;
