//! Authentication error types.

use thiserror::Error;

/// Shown when a previous session cannot be restored at startup.
pub const RESTORE_FAILED_MESSAGE: &str =
    "We could not restore your previous session. Please sign in again.";

/// Recorded when the backend rejects the session mid-use.
pub const SESSION_EXPIRED_MESSAGE: &str = "Your session has expired. Please sign in again.";

/// Fallback for failures without a more specific message.
pub const SIGN_IN_FAILED_MESSAGE: &str = "Sign-in failed.";

/// Authentication error type.
#[derive(Error, Debug)]
pub enum AuthError {
    /// Invalid email or password
    #[error("Invalid email or password.")]
    InvalidCredentials,

    /// Backend returned a body that does not match any accepted shape
    #[error("{0}")]
    MalformedResponse(String),

    /// Access token missing, undecodable, or without a subject
    #[error("{0}")]
    InvalidToken(String),

    /// Non-success HTTP status not covered by a more specific variant
    #[error("Request failed with status code {status}")]
    HttpStatus { status: u16, body: String },

    /// Backend rejected the credentials (401)
    #[error("Request failed with status code 401")]
    Unauthorized,

    /// Backend refused access (403)
    #[error("Request failed with status code 403")]
    Forbidden,

    /// A sign-out or newer sign-in happened while this operation was pending
    #[error("Operation superseded by a newer session change")]
    Superseded,

    /// Invalid state transition in the session FSM
    #[error("Invalid session state transition: {0}")]
    InvalidStateTransition(String),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] guelp_storage::StorageError),

    /// HTTP request error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// No response was received from a non-reqwest transport
    #[error("Transport error: {0}")]
    Transport(String),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parse error
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl AuthError {
    /// Returns true if this error is transient and the operation can be retried.
    ///
    /// Transient errors include connection failures, timeouts, and 5xx responses.
    pub fn is_transient(&self) -> bool {
        match self {
            AuthError::HttpStatus { status, .. } => (500..600).contains(status),
            AuthError::Transport(_) => true,
            AuthError::Http(e) => {
                if e.is_connect() || e.is_timeout() {
                    return true;
                }
                e.status().is_some_and(|s| s.is_server_error())
            }
            _ => false,
        }
    }

    /// HTTP status carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            AuthError::HttpStatus { status, .. } => Some(*status),
            AuthError::Unauthorized => Some(401),
            AuthError::Forbidden => Some(403),
            AuthError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Human-readable text suitable for `last_error`.
    pub fn user_message(&self) -> String {
        match self {
            AuthError::InvalidCredentials
            | AuthError::MalformedResponse(_)
            | AuthError::InvalidToken(_)
            | AuthError::HttpStatus { .. }
            | AuthError::Unauthorized
            | AuthError::Forbidden => self.to_string(),
            AuthError::Http(e) if e.is_timeout() => {
                "The server took too long to respond. Please try again.".to_string()
            }
            AuthError::Http(e) if e.is_connect() => {
                "Unable to reach the server. Check your connection and try again.".to_string()
            }
            AuthError::Transport(_) => {
                "Unable to reach the server. Check your connection and try again.".to_string()
            }
            _ => SIGN_IN_FAILED_MESSAGE.to_string(),
        }
    }
}

impl From<guelp_config::CoreError> for AuthError {
    fn from(err: guelp_config::CoreError) -> Self {
        AuthError::Config(err.to_string())
    }
}

/// Result type alias using AuthError.
pub type AuthResult<T> = Result<T, AuthError>;
