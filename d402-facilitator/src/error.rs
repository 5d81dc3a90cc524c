//! Error types for the facilitator HTTP service.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Errors that can occur while serving facilitator requests.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// No facilitator is registered for the named network.
    #[error("Unsupported network {0}")]
    UnknownNetwork(String),
    /// No facilitator is registered for the given chain id.
    #[error("Unsupported chain id {0}")]
    UnknownChain(u64),
    /// A path or query parameter could not be parsed.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
    /// The requested voucher does not exist.
    #[error("voucher_not_found")]
    VoucherNotFound,
    /// A voucher with the same key is already stored.
    #[error("Voucher already exists")]
    VoucherExists,
    /// Protocol-level failure from the facilitator core.
    #[error(transparent)]
    Facilitator(#[from] d402::FacilitatorError),
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::UnknownNetwork(_) | Self::UnknownChain(_) | Self::VoucherNotFound => {
                StatusCode::NOT_FOUND
            }
            Self::InvalidParameter(_) => StatusCode::BAD_REQUEST,
            Self::VoucherExists => StatusCode::CONFLICT,
            Self::Facilitator(d402::FacilitatorError::InvalidFormat(_)) => StatusCode::BAD_REQUEST,
            Self::Facilitator(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = serde_json::json!({ "error": self.to_string() });
        (status, axum::Json(body)).into_response()
    }
}
