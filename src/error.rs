// Error handling module
// Defines pipeline errors and classified authentication failures

use thiserror::Error;

/// Errors returned by the request pipeline itself
///
/// Authentication failures are not in here: they are recorded and exposed
/// through `current_auth_error()`, and the request still goes out.
#[derive(Error, Debug)]
pub enum ApiError {
    /// Transport failure on an ordinary request (timeout, connection reset, ...)
    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The request could not be built
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Classified failure of an authenticate or refresh operation
///
/// `Clone` because one failure is handed to every caller awaiting the
/// shared in-flight authentication.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthFailure {
    /// Token endpoint answered 401
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    /// Token endpoint answered 429
    #[error("rate limited — too many attempts")]
    RateLimited,

    /// Token endpoint answered with another non-2xx status
    #[error("server returned {0}")]
    ServerError(u16),

    /// No response from the token endpoint
    #[error("cannot reach {0}")]
    Unreachable(String),

    /// Failure before or after the exchange, reported as-is
    #[error("{0}")]
    Client(String),

    /// Refresh failed and there are no credentials to fall back on
    #[error("session expired — please restart your session")]
    SessionExpired,
}

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, ApiError>;
