//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use checkout::CheckoutError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// No authenticated caller.
    Unauthorized,
    /// Bad request from the client.
    BadRequest(String),
    /// Checkout saga error.
    Checkout(CheckoutError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "Missing authenticated user".to_string(),
            ),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Checkout(err) => checkout_error_to_response(err),
        };

        let body = serde_json::json!({ "success": false, "message": message });
        (status, axum::Json(body)).into_response()
    }
}

fn checkout_error_to_response(err: CheckoutError) -> (StatusCode, String) {
    let status = match &err {
        CheckoutError::InvalidRequest(_) | CheckoutError::InvalidAmount { .. } => {
            StatusCode::BAD_REQUEST
        }
        CheckoutError::NotFound(_) => StatusCode::NOT_FOUND,
        CheckoutError::AlreadyEnrolled { .. } => StatusCode::CONFLICT,
        CheckoutError::PaymentRejected(_) => StatusCode::PAYMENT_REQUIRED,
        CheckoutError::GatewayUnavailable(_) | CheckoutError::Unavailable(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        CheckoutError::Ledger(_) | CheckoutError::Internal(_) => {
            tracing::error!(error = %err, "internal server error");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };

    // Rejections carry no detail the client could use to refine a forgery.
    let message = match &err {
        CheckoutError::PaymentRejected(_) => "Payment Failed".to_string(),
        CheckoutError::Ledger(_) | CheckoutError::Internal(_) => {
            "Payment verification failed".to_string()
        }
        other => other.to_string(),
    };
    (status, message)
}

impl From<CheckoutError> for ApiError {
    fn from(err: CheckoutError) -> Self {
        ApiError::Checkout(err)
    }
}
