//! Error handling for the session manager

use std::fmt;
use thiserror::Error;

use crate::storage::StorageError;

/// Unified error type for the session manager
#[derive(Error, Debug)]
pub enum Error {
    /// Network or HTTP related errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization or deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parsing errors
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// Non-2xx response from the auth API
    #[error("Request failed with status {status}: {body}")]
    Status { status: u16, body: String },

    /// Storage backend errors
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// A token that can never become valid
    #[error("Malformed token: {0}")]
    MalformedToken(String),

    /// General errors
    #[error("{0}")]
    General(String),
}

impl Error {
    /// Create a new malformed token error
    pub fn malformed<T: fmt::Display>(msg: T) -> Self {
        Error::MalformedToken(msg.to_string())
    }

    /// Create a new general error
    pub fn general<T: fmt::Display>(msg: T) -> Self {
        Error::General(msg.to_string())
    }

    /// HTTP status code carried by this error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Status { status, .. } => Some(*status),
            Error::Http(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Outcome classification for a failed refresh call
#[derive(Error, Debug)]
pub enum RefreshError {
    /// The refresh token itself was rejected (HTTP 401). Never retried.
    #[error("refresh token rejected by the server")]
    Rejected,

    /// Network failure, timeout, 5xx or any other non-401 failure. Retried.
    #[error("refresh transport error: {0}")]
    Transport(String),
}

impl RefreshError {
    pub fn is_rejected(&self) -> bool {
        matches!(self, RefreshError::Rejected)
    }
}

impl From<Error> for RefreshError {
    fn from(err: Error) -> Self {
        match err.status() {
            Some(401) => RefreshError::Rejected,
            _ => RefreshError::Transport(err.to_string()),
        }
    }
}
