//! Session error taxonomy

use thiserror::Error;

use crate::storage::StoreError;

/// Errors surfaced by the session manager and the authorized client.
///
/// Rate limiting is not in here: a 429 comes back as
/// [`ApiResponse::RateLimited`](crate::api::ApiResponse::RateLimited).
#[derive(Error, Debug)]
pub enum SessionError {
    /// The issuer rejected the login. Never retried.
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    /// Token contents could not be decoded. Forces logout.
    #[error("malformed token: {0}")]
    MalformedToken(String),

    /// A 401 could not be recovered by refreshing. Session is logged out.
    #[error("authentication expired, log in again")]
    AuthenticationExpired,

    /// The request was still rejected after a successful refresh.
    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("access forbidden")]
    AccessForbidden,

    #[error("request failed with status {status}")]
    RequestFailed { status: u16 },

    /// An endpoint path or `api_url` does not form a valid URL.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("invalid response body: {0}")]
    InvalidResponse(String),

    #[error(transparent)]
    Storage(#[from] StoreError),

    #[error(transparent)]
    Transport(#[from] anyhow::Error),
}

impl SessionError {
    /// Whether this error ended (or must end) the session.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            SessionError::MalformedToken(_)
                | SessionError::AuthenticationExpired
                | SessionError::AuthenticationFailed
                | SessionError::AccessForbidden
        )
    }
}
