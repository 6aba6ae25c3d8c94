//! Checkout and order endpoints for the calling identity.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::{AddressId, Order, OrderId};
use serde::{Deserialize, Serialize};
use store::Store;

use super::{AppState, Identity, parse_id};
use crate::error::ApiError;

// -- Request types --

#[derive(Deserialize, Default)]
pub struct CheckoutRequest {
    pub address_id: Option<String>,
}

// -- Response types --

#[derive(Serialize)]
pub struct OrderResponse {
    pub id: String,
    pub owner: String,
    pub status: String,
    pub address_id: Option<String>,
    pub lines: Vec<OrderLineResponse>,
    pub total_cents: i64,
    pub created_at: String,
}

#[derive(Serialize)]
pub struct OrderLineResponse {
    pub product_id: String,
    pub variant_id: Option<String>,
    pub quantity: u32,
    pub unit_price_cents: i64,
    pub line_total_cents: i64,
}

impl From<Order> for OrderResponse {
    fn from(order: Order) -> Self {
        let lines = order
            .lines
            .iter()
            .map(|line| OrderLineResponse {
                product_id: line.product_id.to_string(),
                variant_id: line.variant_id.map(|v| v.to_string()),
                quantity: line.quantity,
                unit_price_cents: line.unit_price.cents(),
                line_total_cents: line.line_total().cents(),
            })
            .collect();

        Self {
            id: order.id.to_string(),
            owner: order.owner.to_string(),
            status: order.status.to_string(),
            address_id: order.address.map(|a| a.to_string()),
            lines,
            total_cents: order.total.cents(),
            created_at: order.created_at.to_rfc3339(),
        }
    }
}

// -- Handlers --

/// POST /orders: check out the caller's cart.
#[tracing::instrument(skip(state, req))]
pub async fn checkout<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Identity(owner): Identity,
    req: Option<Json<CheckoutRequest>>,
) -> Result<(StatusCode, Json<OrderResponse>), ApiError> {
    let req = req.map(|Json(req)| req).unwrap_or_default();
    let address: Option<AddressId> = req
        .address_id
        .as_deref()
        .map(|raw| parse_id("address", raw))
        .transpose()?;

    let order = state.checkout.place_order(owner, address).await?;
    Ok((StatusCode::CREATED, Json(order.into())))
}

/// GET /orders: the caller's orders, newest first.
#[tracing::instrument(skip(state))]
pub async fn list<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Identity(owner): Identity,
) -> Result<Json<Vec<OrderResponse>>, ApiError> {
    let orders = state.orders.orders(owner).await?;
    Ok(Json(orders.into_iter().map(OrderResponse::from).collect()))
}

/// GET /orders/:id
#[tracing::instrument(skip(state))]
pub async fn get<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Identity(owner): Identity,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let id: OrderId = parse_id("order", &id)?;
    let order = state.orders.order(owner, id).await?;
    Ok(Json(order.into()))
}

/// POST /orders/:id/cancel: cancel a pending, unpaid order and restore its stock.
#[tracing::instrument(skip(state))]
pub async fn cancel<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Identity(owner): Identity,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let id: OrderId = parse_id("order", &id)?;
    let order = state.orders.cancel(owner, id).await?;
    Ok(Json(order.into()))
}

/// DELETE /orders/:id: remove a canceled order.
#[tracing::instrument(skip(state))]
pub async fn delete<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Identity(owner): Identity,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id: OrderId = parse_id("order", &id)?;
    state.orders.delete(owner, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
