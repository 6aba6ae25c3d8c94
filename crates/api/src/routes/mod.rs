//! HTTP route handlers.

pub mod admin;
pub mod cart;
pub mod catalog;
pub mod health;
pub mod metrics;
pub mod orders;

use std::fmt::Display;
use std::str::FromStr;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use common::IdentityId;
use domain::{
    CartService, CheckoutService, InMemoryAddressBook, InventoryService, LogNotifier,
    OrderService, PaymentService,
};
use store::Store;

use crate::error::ApiError;

/// Header carrying the caller's identity, set by the authenticating proxy.
pub const IDENTITY_HEADER: &str = "x-identity-id";

/// Shared application state accessible from all handlers.
pub struct AppState<S: Store> {
    pub inventory: InventoryService<S>,
    pub cart: CartService<S>,
    pub checkout: CheckoutService<S, InMemoryAddressBook, LogNotifier>,
    pub orders: OrderService<S>,
    pub payments: PaymentService<S>,
    pub addresses: InMemoryAddressBook,
}

/// The authenticated caller, taken from the [`IDENTITY_HEADER`] header.
#[derive(Debug, Clone, Copy)]
pub struct Identity(pub IdentityId);

impl<St: Send + Sync> FromRequestParts<St> for Identity {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &St) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(IDENTITY_HEADER)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| ApiError::Unauthorized(format!("Missing {IDENTITY_HEADER} header")))?;

        raw.parse()
            .map(Identity)
            .map_err(|_| ApiError::Unauthorized(format!("Invalid {IDENTITY_HEADER} header")))
    }
}

/// Parses a path segment into a typed identifier.
pub(crate) fn parse_id<T>(kind: &str, raw: &str) -> Result<T, ApiError>
where
    T: FromStr,
    T::Err: Display,
{
    raw.parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid {kind} ID format: {e}")))
}
