//! The closed error taxonomy shared by every tier, and its HTTP status mapping.
//!
//! Mirrors the original's `ErrorCodes` / `S2ApiException` split (see
//! `original_source/app/models/exception.py` and the `except S2ApiException`
//! blocks in `core_paper_service.py`): upstream failures classify into a
//! fixed set of kinds, local failures add a few more, and the mapping to a
//! status code happens once, at the boundary.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, GatewayError>;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("paper not found: {0}")]
    NotFound(String),

    #[error("upstream rate limited: {0}")]
    RateLimited(String),

    #[error("upstream request timed out: {0}")]
    Timeout(String),

    #[error("network error reaching upstream: {0}")]
    NetworkError(String),

    #[error("upstream authentication failed: {0}")]
    AuthError(String),

    #[error("upstream unavailable: {0}")]
    Unavailable(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("internal error: {0}")]
    InternalError(String),

    #[error("cache error: {0}")]
    CacheError(String),

    #[error("storage error: {0}")]
    StorageError(String),

    #[error("upstream error: {0}")]
    Other(String),
}

impl GatewayError {
    /// The HTTP status code this kind maps to (spec.md §7).
    pub fn status_code(&self) -> u16 {
        match self {
            GatewayError::NotFound(_) => 404,
            GatewayError::RateLimited(_) => 429,
            GatewayError::Timeout(_) => 408,
            GatewayError::NetworkError(_) => 502,
            GatewayError::AuthError(_) => 401,
            GatewayError::Unavailable(_) => 503,
            GatewayError::InvalidRequest(_) => 400,
            GatewayError::InternalError(_)
            | GatewayError::CacheError(_)
            | GatewayError::StorageError(_)
            | GatewayError::Other(_) => 500,
        }
    }

    /// Never-fatal failures (§7 "recovered locally") are logged by the
    /// caller and turned into a miss/false rather than propagated. This
    /// helper marks the kinds that are expected to reach that path.
    pub fn is_recoverable_locally(&self) -> bool {
        matches!(self, GatewayError::CacheError(_) | GatewayError::StorageError(_))
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(e: serde_json::Error) -> Self {
        GatewayError::InternalError(format!("serialization error: {e}"))
    }
}

impl From<sqlx::Error> for GatewayError {
    fn from(e: sqlx::Error) -> Self {
        GatewayError::StorageError(e.to_string())
    }
}

impl From<redis::RedisError> for GatewayError {
    fn from(e: redis::RedisError) -> Self {
        GatewayError::CacheError(e.to_string())
    }
}

/// Classifies a transport/HTTP failure from the upstream client into the
/// closed taxonomy, per spec.md §4.5. Grounded on the status-code dispatch
/// repeated in every method of `original_source/app/clients/s2_client.py`.
pub fn classify_upstream_error(status: Option<u16>, message: impl Into<String>) -> GatewayError {
    let message = message.into();
    match status {
        Some(404) => GatewayError::NotFound(message),
        Some(429) => GatewayError::RateLimited(message),
        Some(401) | Some(403) => GatewayError::AuthError(message),
        Some(502) | Some(503) => GatewayError::Unavailable(message),
        Some(408) => GatewayError::Timeout(message),
        _ => GatewayError::Other(message),
    }
}
