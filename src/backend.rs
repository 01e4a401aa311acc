//! Outbound backend actions.
//!
//! DESIGN
//! ======
//! The backend owns all business logic; this side only posts intents and
//! reads pass/fail. Results never feed local state directly: a sent message
//! shows up through the push channels like anyone else's.

use serde_json::json;
use tracing::{debug, warn};

use crate::config::BackendConfig;
use crate::frame::ErrorCode;

/// One outbound call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    Message { content: String },
    Emoji { emoji: String },
    Invite { user_id: String },
    Join,
    Leave,
}

impl Action {
    /// Path segment under `/sessions/{id}/`.
    #[must_use]
    pub fn path(&self) -> &'static str {
        match self {
            Self::Message { .. } => "messages",
            Self::Emoji { .. } => "emoji",
            Self::Invite { .. } => "invitations",
            Self::Join => "join",
            Self::Leave => "leave",
        }
    }

    #[must_use]
    pub fn body(&self) -> serde_json::Value {
        match self {
            Self::Message { content } => json!({ "content": content, "type": "text" }),
            Self::Emoji { emoji } => json!({ "emoji": emoji }),
            Self::Invite { user_id } => json!({ "user_id": user_id }),
            Self::Join | Self::Leave => json!({}),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("backend returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("http client build failed: {0}")]
    HttpClientBuild(String),
    #[error("invalid backend URL: {0}")]
    BaseUrl(String),
    #[error("invalid session id: {0:?}")]
    InvalidSessionId(String),
}

impl ErrorCode for BackendError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Request(_) => "E_BACKEND_REQUEST",
            Self::Status { .. } => "E_BACKEND_STATUS",
            Self::HttpClientBuild(_) => "E_HTTP_CLIENT_BUILD",
            Self::BaseUrl(_) => "E_BACKEND_URL",
            Self::InvalidSessionId(_) => "E_INVALID_SESSION_ID",
        }
    }

    fn retryable(&self) -> bool {
        match self {
            Self::Request(_) => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::HttpClientBuild(_) | Self::BaseUrl(_) | Self::InvalidSessionId(_) => false,
        }
    }
}

/// Contract of the backend collaborator.
#[async_trait::async_trait]
pub trait Backend: Send + Sync {
    /// Perform `action` for `session_id`.
    async fn submit(&self, session_id: &str, action: &Action) -> Result<(), BackendError>;
}

// =============================================================================
// HTTP
// =============================================================================

/// JSON-over-HTTP backend.
pub struct HttpBackend {
    http: reqwest::Client,
    base_url: reqwest::Url,
    token: Option<String>,
}

impl HttpBackend {
    /// # Errors
    ///
    /// Returns [`BackendError::BaseUrl`] if the base URL does not parse and
    /// [`BackendError::HttpClientBuild`] if the HTTP client cannot be built.
    pub fn new(config: BackendConfig) -> Result<Self, BackendError> {
        let base_url = reqwest::Url::parse(&config.base_url).map_err(|e| BackendError::BaseUrl(e.to_string()))?;
        if base_url.cannot_be_a_base() {
            return Err(BackendError::BaseUrl(config.base_url));
        }
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| BackendError::HttpClientBuild(e.to_string()))?;
        Ok(Self { http, base_url, token: config.token })
    }

    /// Endpoint for `action`. The session id is one percent-encoded path
    /// segment, so it can never address a different endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::InvalidSessionId`] for blank ids and for `.`
    /// or `..`, which a URL path cannot carry as a literal segment.
    pub fn url(&self, session_id: &str, action: &Action) -> Result<reqwest::Url, BackendError> {
        if session_id.trim().is_empty() || session_id == "." || session_id == ".." {
            return Err(BackendError::InvalidSessionId(session_id.to_owned()));
        }
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| BackendError::BaseUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(["sessions", session_id, action.path()]);
        Ok(url)
    }
}

#[async_trait::async_trait]
impl Backend for HttpBackend {
    async fn submit(&self, session_id: &str, action: &Action) -> Result<(), BackendError> {
        let url = self.url(session_id, action)?;
        debug!(%url, "backend: post");
        let mut request = self.http.post(url.clone()).json(&action.body());
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| BackendError::Request(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        warn!(%url, status = status.as_u16(), "backend: non-success status");
        Err(BackendError::Status { status: status.as_u16(), body })
    }
}

#[cfg(test)]
#[path = "backend_test.rs"]
mod tests;
