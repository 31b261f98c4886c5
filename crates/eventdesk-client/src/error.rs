//! Client error types.

use reqwest::StatusCode;
use thiserror::Error;

/// Result type used throughout the client.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur while talking to the event management API.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport-level failure (DNS, connect, timeout, reset).
    #[error("HTTP request failed: {source}")]
    Network {
        #[from]
        source: reqwest::Error,
    },

    /// The server answered with a non-success status.
    #[error("request failed with HTTP {status} for {url}: {message}")]
    HttpStatus {
        status: StatusCode,
        url: String,
        message: String,
    },

    #[error("invalid URL `{input}`: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("invalid header value for `{name}`")]
    InvalidHeader { name: &'static str },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {reason}")]
    Configuration { reason: String },

    /// No credential available for an operation that needs one.
    #[error("not authenticated")]
    NotAuthenticated,

    /// Credential refresh was rejected or returned an unusable body.
    #[error("credential refresh failed: {reason}")]
    RefreshFailed { reason: String },

    /// Malformed server-sent event stream.
    #[error("event stream error: {reason}")]
    Stream { reason: String },

    #[error("operation cancelled")]
    Cancelled,
}

impl ClientError {
    pub fn http_status(
        status: StatusCode,
        url: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::HttpStatus {
            status,
            url: url.into(),
            message: message.into(),
        }
    }

    pub fn invalid_url(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub fn config(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    pub fn stream(reason: impl Into<String>) -> Self {
        Self::Stream {
            reason: reason.into(),
        }
    }

    /// HTTP status carried by this error, if any.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            Self::Network { source } => source.status(),
            _ => None,
        }
    }

    /// Whether the session should be treated as ended.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::NotAuthenticated | Self::RefreshFailed { .. })
            || self.status() == Some(StatusCode::UNAUTHORIZED)
    }

    /// Whether repeating the same call later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. } | Self::Stream { .. } => true,
            Self::HttpStatus { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            Self::InvalidUrl { .. }
            | Self::UrlParse(_)
            | Self::InvalidHeader { .. }
            | Self::Json(_)
            | Self::Io(_)
            | Self::Configuration { .. }
            | Self::NotAuthenticated
            | Self::RefreshFailed { .. }
            | Self::Cancelled => false,
        }
    }
}
