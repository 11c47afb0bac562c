//! Error taxonomy for the storefront backend.
//!
//! Validation errors are terminal for the action that triggered them and are
//! surfaced to the caller before any persistence happens. Remote mirror
//! errors never escape the mirror adapter's critical path; when they appear
//! here it is only on explicitly remote operations (admin bulk clear, manual
//! reconciliation).

use thiserror::Error;

/// Rejections raised by the order composer before any store mutation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    /// The phone contract is exactly 11 ASCII digits, nothing else.
    #[error("phone number must be exactly 11 digits")]
    InvalidPhoneFormat,

    #[error("product is not available: {0}")]
    ProductUnavailable(String),
}

/// Top-level error type for storefront operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Admin credential or session token rejected. No lockout, no throttle.
    #[error("admin credential rejected")]
    Unauthorized,

    #[error("remote mirror unavailable: {0}")]
    RemoteUnavailable(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Storage(e.to_string())
    }
}
