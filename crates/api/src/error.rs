//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::{CartError, CheckoutError, DomainError, LedgerError, OrderError};
use store::StoreError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// The caller did not present an identity.
    Unauthorized(String),
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Domain logic error.
    Domain(DomainError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Domain(err) => domain_error_to_response(err),
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn domain_error_to_response(err: DomainError) -> (StatusCode, String) {
    if let Some(store_err) = err.store_error() {
        let status = match store_err {
            StoreError::Conflict(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %err, "storage failure");
        }
        return (status, err.to_string());
    }

    let status = match &err {
        DomainError::Ledger(e) | DomainError::Order(OrderError::Ledger(e)) => ledger_status(e),
        DomainError::Checkout(CheckoutError::Ledger(e)) => ledger_status(e),
        DomainError::Cart(e) => match e {
            CartError::ProductNotFound(_)
            | CartError::VariantNotFound(_)
            | CartError::LineNotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::BAD_REQUEST,
        },
        DomainError::Order(e) => match e {
            OrderError::OrderNotFound(_) => StatusCode::NOT_FOUND,
            OrderError::InvalidStatusTransition { .. } => StatusCode::CONFLICT,
            _ => StatusCode::BAD_REQUEST,
        },
        DomainError::Checkout(_) => StatusCode::BAD_REQUEST,
        DomainError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        tracing::error!(error = %err, "internal server error");
    }
    (status, err.to_string())
}

fn ledger_status(err: &LedgerError) -> StatusCode {
    match err {
        LedgerError::ProductNotFound(_) | LedgerError::VariantNotFound(_) => StatusCode::NOT_FOUND,
        LedgerError::VariantInUse(_) => StatusCode::CONFLICT,
        LedgerError::NotLocked(_) | LedgerError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::BAD_REQUEST,
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        ApiError::Domain(err)
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        ApiError::Domain(err.into())
    }
}

impl From<CartError> for ApiError {
    fn from(err: CartError) -> Self {
        ApiError::Domain(err.into())
    }
}

impl From<OrderError> for ApiError {
    fn from(err: OrderError) -> Self {
        ApiError::Domain(err.into())
    }
}

impl From<CheckoutError> for ApiError {
    fn from(err: CheckoutError) -> Self {
        ApiError::Domain(err.into())
    }
}
