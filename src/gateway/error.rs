//! Error envelope
//!
//! Every error leaves the API as
//! `{code, status: "error", error_code, message, details?, timestamp}`.
//! Internal detail stays in the logs; the envelope carries only the stable
//! error-code vocabulary.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use chrono::Utc;
use serde::Serialize;
use utoipa::ToSchema;

use crate::dispatch::DispatchError;
use crate::ledger::LedgerError;
use crate::routing::RoutingError;
use crate::store::StoreError;

/// Stable error codes surfaced to API consumers.
pub mod error_codes {
    pub const VALIDATION_FAILED: &str = "VALIDATION_FAILED";
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const UNAUTHORIZED: &str = "UNAUTHORIZED";
    pub const FORBIDDEN: &str = "FORBIDDEN";
    pub const CONFLICT: &str = "CONFLICT";
    pub const INSUFFICIENT_BALANCE: &str = "INSUFFICIENT_BALANCE";
    pub const INVALID_PRODUCT: &str = "INVALID_PRODUCT";
    pub const SUPPLIER_ERROR: &str = "SUPPLIER_ERROR";
    pub const TRANSACTION_FAILED: &str = "TRANSACTION_FAILED";
    pub const RATE_LIMIT_EXCEEDED: &str = "RATE_LIMIT_EXCEEDED";
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// HTTP status code, mirrored into the body.
    #[schema(example = 400)]
    pub code: u16,
    #[schema(example = "error")]
    pub status: &'static str,
    #[schema(example = "VALIDATION_FAILED")]
    pub error_code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Object)]
    pub details: Option<serde_json::Value>,
    /// `YYYY-MM-DD HH:MM:SS` server time.
    pub timestamp: String,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub error_code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(status: StatusCode, error_code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            error_code,
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, error_codes::VALIDATION_FAILED, msg)
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, error_codes::UNAUTHORIZED, msg)
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, error_codes::FORBIDDEN, msg)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, error_codes::NOT_FOUND, msg)
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, error_codes::CONFLICT, msg)
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            error_codes::TRANSACTION_FAILED,
            msg,
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            code: self.status.as_u16(),
            status: "error",
            error_code: self.error_code,
            message: self.message,
            details: self.details,
            timestamp: Utc::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<DispatchError> for ApiError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::Validation(msg) => ApiError::bad_request(msg),
            DispatchError::UserInactive => ApiError::forbidden("user account is not active"),
            DispatchError::ProductInactive => ApiError::new(
                StatusCode::BAD_REQUEST,
                error_codes::INVALID_PRODUCT,
                "product is not available",
            ),
            DispatchError::PriceOutOfRange { price } => {
                ApiError::bad_request(format!("price {price} is outside the allowed range"))
            }
            DispatchError::InsufficientBalance
            | DispatchError::Ledger(LedgerError::InsufficientFunds { .. }) => ApiError::new(
                StatusCode::BAD_REQUEST,
                error_codes::INSUFFICIENT_BALANCE,
                "insufficient balance",
            ),
            DispatchError::NotCancellable(status) => ApiError::conflict(format!(
                "transaction cannot be cancelled in status {status}"
            )),
            DispatchError::Store(StoreError::UserNotFound) => ApiError::not_found("user not found"),
            DispatchError::Store(StoreError::ProductNotFound) => {
                ApiError::not_found("product not found")
            }
            DispatchError::Store(StoreError::SupplierNotFound) => {
                ApiError::not_found("supplier not found")
            }
            DispatchError::Store(StoreError::TransactionNotFound) => {
                ApiError::not_found("transaction not found")
            }
            DispatchError::Store(StoreError::DuplicateTrxCode(code)) => {
                ApiError::conflict(format!("trx code {code} already exists"))
            }
            DispatchError::Routing(RoutingError::NoMappings)
            | DispatchError::Routing(RoutingError::NoHealthySupplier) => ApiError::new(
                StatusCode::SERVICE_UNAVAILABLE,
                error_codes::SUPPLIER_ERROR,
                "no supplier available",
            ),
            other => {
                tracing::error!(error = %other, "internal dispatch error");
                ApiError::internal("internal error")
            }
        }
    }
}
