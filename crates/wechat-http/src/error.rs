//! Error types for the HTTP client core
//!
//! Every failure the pipeline can surface is a variant of [`Error`]. Only one
//! class of failure is recovered automatically (an expired or invalid access
//! token, see [`crate::http::retry`]); everything here reaches the caller.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for operations that can fail with a client error.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the client.
#[derive(Debug, Error)]
pub enum Error {
    /// No response was received (connection refused, DNS, TLS, reset...).
    #[error("Transport error: {0}")]
    Transport(String),

    /// The transport gave up waiting for a response.
    #[error("Request timeout after {0:?}")]
    Timeout(Duration),

    /// The response body could not be turned into the requested shape.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Refreshing the access token failed while recovering from an
    /// expired-token response.
    #[error("Failed to refresh access token: {0}")]
    CredentialRefresh(#[source] Box<Error>),

    /// An upload source could not be opened for reading.
    #[error("Failed to open upload file {}: {source}", path.display())]
    FileOpen {
        /// Path that was requested
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The access token provider could not produce a token.
    #[error("Access token unavailable: {0}")]
    AccessToken(String),

    /// Invalid URL provided.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Invalid HTTP header name.
    #[error("Invalid HTTP header name: {0}")]
    InvalidHeaderName(String),

    /// Invalid HTTP header value.
    #[error("Invalid HTTP header value: {0}")]
    InvalidHeaderValue(String),

    /// HTTP client configuration or initialization error.
    #[error("HTTP client error: {0}")]
    HttpClient(String),

    /// Invalid configuration value.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Error raised by an external [`AccessToken`](crate::AccessToken)
    /// implementation that works in `anyhow`.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Whether this error means no response was received at all.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport(_) | Error::Timeout(_))
    }

    /// Wrap a failure raised by `AccessToken::refresh`.
    pub fn credential_refresh(source: Error) -> Self {
        Error::CredentialRefresh(Box::new(source))
    }

    /// Map a reqwest failure onto the transport error kinds.
    pub(crate) fn from_reqwest(error: reqwest::Error, timeout: Duration) -> Self {
        if error.is_timeout() {
            Error::Timeout(timeout)
        } else if error.is_builder() {
            Error::HttpClient(error.to_string())
        } else {
            Error::Transport(error.to_string())
        }
    }
}
