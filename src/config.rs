//! Runtime configuration parsed from environment variables.

use std::time::Duration;

use crate::follow::{DEFAULT_EDGE_TOLERANCE_PX, DEFAULT_SCROLL_DEBOUNCE_MS};
use crate::frame::ErrorCode;
use crate::markers::DEFAULT_MARKER_TTL_MS;

pub const DEFAULT_ECHO_ANCHOR_MS: u64 = 100;
pub const DEFAULT_MAX_MESSAGE_CHARS: usize = 2000;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required env var {0}")]
    Missing(&'static str),
    #[error("invalid value for {var}: {value}")]
    Invalid { var: &'static str, value: String },
}

impl ErrorCode for ConfigError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Missing(_) => "E_CONFIG_MISSING",
            Self::Invalid { .. } => "E_CONFIG_INVALID",
        }
    }
}

/// Tuning for one live session view.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LiveConfig {
    /// Distance from the live edge still counted as anchored.
    pub edge_tolerance_px: f64,
    /// How long an arrival marker stays set.
    pub marker_ttl: Duration,
    /// Delay between a successful send and anchoring to the live edge.
    pub echo_anchor_delay: Duration,
    /// Quiet period before a user scroll is evaluated.
    pub scroll_debounce: Duration,
    /// Longest accepted chat message, in characters.
    pub max_message_chars: usize,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            edge_tolerance_px: DEFAULT_EDGE_TOLERANCE_PX,
            marker_ttl: Duration::from_millis(DEFAULT_MARKER_TTL_MS),
            echo_anchor_delay: Duration::from_millis(DEFAULT_ECHO_ANCHOR_MS),
            scroll_debounce: Duration::from_millis(DEFAULT_SCROLL_DEBOUNCE_MS),
            max_message_chars: DEFAULT_MAX_MESSAGE_CHARS,
        }
    }
}

impl LiveConfig {
    /// Build from environment variables, falling back to defaults for any
    /// that are unset or unparsable.
    ///
    /// - `LIVESYNC_EDGE_TOLERANCE_PX` (100)
    /// - `LIVESYNC_MARKER_TTL_MS` (500)
    /// - `LIVESYNC_ECHO_ANCHOR_MS` (100)
    /// - `LIVESYNC_SCROLL_DEBOUNCE_MS` (50)
    /// - `LIVESYNC_MAX_MESSAGE_CHARS` (2000)
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            edge_tolerance_px: env_parse("LIVESYNC_EDGE_TOLERANCE_PX", DEFAULT_EDGE_TOLERANCE_PX),
            marker_ttl: Duration::from_millis(env_parse("LIVESYNC_MARKER_TTL_MS", DEFAULT_MARKER_TTL_MS)),
            echo_anchor_delay: Duration::from_millis(env_parse("LIVESYNC_ECHO_ANCHOR_MS", DEFAULT_ECHO_ANCHOR_MS)),
            scroll_debounce: Duration::from_millis(env_parse("LIVESYNC_SCROLL_DEBOUNCE_MS", DEFAULT_SCROLL_DEBOUNCE_MS)),
            max_message_chars: env_parse("LIVESYNC_MAX_MESSAGE_CHARS", DEFAULT_MAX_MESSAGE_CHARS),
        }
    }
}

/// Where outbound actions are posted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    pub base_url: String,
    pub token: Option<String>,
    pub request_timeout: Duration,
}

impl BackendConfig {
    /// Build from environment variables.
    ///
    /// Required:
    /// - `LIVESYNC_BACKEND_URL`
    ///
    /// Optional:
    /// - `LIVESYNC_BACKEND_TOKEN`: bearer token
    /// - `LIVESYNC_REQUEST_TIMEOUT_SECS`: default 10
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the URL is missing or not http(s).
    pub fn from_env() -> Result<Self, ConfigError> {
        let base_url = std::env::var("LIVESYNC_BACKEND_URL").map_err(|_| ConfigError::Missing("LIVESYNC_BACKEND_URL"))?;
        let token = std::env::var("LIVESYNC_BACKEND_TOKEN").ok().filter(|t| !t.is_empty());
        let timeout_secs = env_parse("LIVESYNC_REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS);
        Self::new(&base_url, token, Duration::from_secs(timeout_secs))
    }

    /// Validate and normalize a backend location.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] unless `base_url` is http(s).
    pub fn new(base_url: &str, token: Option<String>, request_timeout: Duration) -> Result<Self, ConfigError> {
        let trimmed = base_url.trim().trim_end_matches('/');
        if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
            return Err(ConfigError::Invalid { var: "LIVESYNC_BACKEND_URL", value: base_url.to_owned() });
        }
        Ok(Self { base_url: trimmed.to_owned(), token, request_timeout })
    }
}

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
