//! Error types for the Rentwise client

use reqwest::{Method, StatusCode};
use thiserror::Error;

/// Result type alias for dispatch operations
pub type Result<T> = std::result::Result<T, DispatchError>;

/// Why a token could not be decoded. Never surfaced to callers; a token that
/// fails to decode is treated as expired.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("token has no payload segment")]
    MissingPayload,

    #[error("payload segment is not base64url: {0}")]
    Base64(String),

    #[error("payload is not a JSON object: {0}")]
    Json(String),

    #[error("payload has no numeric exp claim")]
    MissingExpiry,
}

/// Credential store failures
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Credential store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Stored credential is unreadable: {0}")]
    Corrupt(String),
}

/// Token refresh failures. These never reach callers directly; the
/// dispatcher converts them into [`DispatchError::AuthExpired`].
#[derive(Error, Debug)]
pub enum RefreshError {
    #[error("refresh request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("refresh rejected with status {status}: {body}")]
    Rejected { status: StatusCode, body: String },

    #[error("refresh response unusable: {0}")]
    InvalidResponse(String),

    #[error("refreshed token could not be stored: {0}")]
    Store(#[from] StoreError),
}

/// Why the session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthExpiredReason {
    /// No token was available to send
    MissingCredentials,
    /// The token was expired and could not be exchanged
    RefreshFailed(String),
    /// The server answered 401 to a request carrying a valid-looking token
    Unauthorized,
}

impl std::fmt::Display for AuthExpiredReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthExpiredReason::MissingCredentials => write!(f, "no stored credentials"),
            AuthExpiredReason::RefreshFailed(cause) => write!(f, "token refresh failed: {}", cause),
            AuthExpiredReason::Unauthorized => write!(f, "server rejected the token"),
        }
    }
}

/// Error types for authenticated dispatch
#[derive(Error, Debug)]
pub enum DispatchError {
    /// Terminal for the current token: credentials have been cleared and the
    /// user has to log in again
    #[error("Session expired, please log in again ({reason})")]
    AuthExpired { reason: AuthExpiredReason },

    /// The server answered with a non-2xx status other than 401
    #[error("{method} {url} failed with status {status}: {body}")]
    Status {
        method: Method,
        url: String,
        status: StatusCode,
        body: String,
    },

    /// The request never produced a response
    #[error("{method} {url} failed: {source}")]
    Transport {
        method: Method,
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The request could not be built from what the caller supplied
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The stored token could not be read
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The HTTP client could not be constructed from the configuration
    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

impl DispatchError {
    /// True when the calling layer should send the user to the login surface
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, DispatchError::AuthExpired { .. })
    }

    /// Response status, when the server produced one
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            DispatchError::Status { status, .. } => Some(*status),
            DispatchError::Transport { source, .. } => source.status(),
            DispatchError::AuthExpired {
                reason: AuthExpiredReason::Unauthorized,
            } => Some(StatusCode::UNAUTHORIZED),
            _ => None,
        }
    }
}
