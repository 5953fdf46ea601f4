//! Early request rejections.

use axum::http::StatusCode;
use thiserror::Error;

/// Rejections decided before a handler runs. Each maps to one status.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RequestLimitError {
    #[error("payload exceeds {limit} bytes")]
    PayloadTooLarge { limit: u64 },

    #[error("uploads are disabled for this site")]
    UploadForbidden,

    #[error("request timed out")]
    Timeout,

    #[error("forbidden: {0}")]
    Forbidden(&'static str),

    #[error("not found")]
    NotFound,

    #[error("malformed request body: {0}")]
    Malformed(String),
}

impl RequestLimitError {
    pub fn status(&self) -> StatusCode {
        match self {
            RequestLimitError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            RequestLimitError::UploadForbidden | RequestLimitError::Forbidden(_) => {
                StatusCode::FORBIDDEN
            }
            RequestLimitError::Timeout => StatusCode::REQUEST_TIMEOUT,
            RequestLimitError::NotFound => StatusCode::NOT_FOUND,
            RequestLimitError::Malformed(_) => StatusCode::BAD_REQUEST,
        }
    }
}
