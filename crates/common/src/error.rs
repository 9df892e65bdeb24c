//! Common error types shared across crates.

use thiserror::Error;

/// Caller-visible gateway error.
///
/// Variants map to HTTP status codes the endpoint layer returns:
/// - [`ServiceError::BadRequest`] → 400
/// - [`ServiceError::LimitReached`] → 403
/// - [`ServiceError::Store`] → 502
/// - [`ServiceError::Internal`] → 500
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// The input was rejected before any remote call: unknown table, empty
    /// update, inverted date range.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// A subscription-plan ceiling blocks the creation.
    ///
    /// This is a user-facing validation outcome, not an outage.
    #[error("{entity} limit reached: your plan allows at most {limit} {entity}")]
    LimitReached { entity: String, limit: u64 },

    /// The remote store could not be reached or answered with a non-2xx status.
    #[error("store request failed: {0}")]
    Store(String),

    /// An unexpected internal error occurred.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Returns the HTTP status code that should be sent for this error.
    pub fn http_status(&self) -> u16 {
        match self {
            ServiceError::BadRequest(_) => 400,
            ServiceError::LimitReached { .. } => 403,
            ServiceError::Store(_) => 502,
            ServiceError::Internal(_) => 500,
        }
    }

    /// `true` when the error was caused by caller input and must not be
    /// reported as a system fault.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ServiceError::BadRequest(_) | ServiceError::LimitReached { .. }
        )
    }
}
