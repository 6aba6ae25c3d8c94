//! Administrative order endpoints. Authorization happens upstream.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use common::{OrderId, OrderStatus, PaymentRecord};
use serde::{Deserialize, Serialize};
use store::Store;

use super::orders::OrderResponse;
use super::{AppState, parse_id};
use crate::error::ApiError;

#[derive(Deserialize)]
pub struct SetStatusRequest {
    pub status: String,
}

#[derive(Deserialize, Default)]
pub struct MarkPaidRequest {
    pub reference: Option<String>,
}

#[derive(Serialize)]
pub struct PaymentResponse {
    pub order_id: String,
    pub provider: String,
    pub status: String,
    pub amount_cents: i64,
    pub reference: Option<String>,
}

impl From<PaymentRecord> for PaymentResponse {
    fn from(payment: PaymentRecord) -> Self {
        Self {
            order_id: payment.order_id.to_string(),
            provider: payment.provider,
            status: payment.status.to_string(),
            amount_cents: payment.amount.cents(),
            reference: payment.reference,
        }
    }
}

/// GET /admin/orders: every order, newest first.
#[tracing::instrument(skip(state))]
pub async fn list<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<Json<Vec<OrderResponse>>, ApiError> {
    let orders = state.orders.all_orders().await?;
    Ok(Json(orders.into_iter().map(OrderResponse::from).collect()))
}

/// GET /admin/orders/:id: any order, regardless of owner.
#[tracing::instrument(skip(state))]
pub async fn get<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let id: OrderId = parse_id("order", &id)?;
    let order = state.orders.admin_order(id).await?;
    Ok(Json(order.into()))
}

/// POST /admin/orders/:id/status: move an order along its lifecycle.
#[tracing::instrument(skip(state, req))]
pub async fn set_status<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Json(req): Json<SetStatusRequest>,
) -> Result<Json<OrderResponse>, ApiError> {
    let id: OrderId = parse_id("order", &id)?;
    let target: OrderStatus = req
        .status
        .parse()
        .map_err(|e: common::ParseStatusError| ApiError::BadRequest(e.to_string()))?;

    let order = state.orders.set_status(id, target).await?;
    Ok(Json(order.into()))
}

/// POST /admin/orders/:id/payment: record settlement of the order's payment.
#[tracing::instrument(skip(state, req))]
pub async fn mark_paid<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    req: Option<Json<MarkPaidRequest>>,
) -> Result<Json<PaymentResponse>, ApiError> {
    let id: OrderId = parse_id("order", &id)?;
    let req = req.map(|Json(req)| req).unwrap_or_default();

    let payment = state.payments.mark_paid(id, req.reference).await?;
    Ok(Json(payment.into()))
}
