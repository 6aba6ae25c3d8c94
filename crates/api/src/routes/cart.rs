//! Cart endpoints for the calling identity.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::{CartLine, CartLineId, ProductId, VariantId};
use domain::{CartItemView, CartView};
use serde::{Deserialize, Serialize};
use store::Store;

use super::{AppState, Identity, parse_id};
use crate::error::ApiError;

// -- Request types --

#[derive(Deserialize)]
pub struct AddLineRequest {
    pub product_id: String,
    pub variant_id: Option<String>,
    pub quantity: u32,
}

#[derive(Deserialize)]
pub struct UpdateLineRequest {
    pub quantity: u32,
}

// -- Response types --

#[derive(Serialize)]
pub struct CartLineResponse {
    pub id: String,
    pub product_id: String,
    pub variant_id: Option<String>,
    pub quantity: u32,
}

#[derive(Serialize)]
pub struct CartItemResponse {
    pub id: String,
    pub product_id: String,
    pub variant_id: Option<String>,
    pub product_name: String,
    pub variant_name: Option<String>,
    pub quantity: u32,
    pub unit_price_cents: i64,
    pub line_total_cents: i64,
}

#[derive(Serialize)]
pub struct CartResponse {
    pub lines: Vec<CartItemResponse>,
    pub total_cents: i64,
}

impl From<CartLine> for CartLineResponse {
    fn from(line: CartLine) -> Self {
        Self {
            id: line.id.to_string(),
            product_id: line.product_id.to_string(),
            variant_id: line.variant_id.map(|v| v.to_string()),
            quantity: line.quantity,
        }
    }
}

impl From<CartItemView> for CartItemResponse {
    fn from(item: CartItemView) -> Self {
        Self {
            id: item.line.id.to_string(),
            product_id: item.line.product_id.to_string(),
            variant_id: item.line.variant_id.map(|v| v.to_string()),
            product_name: item.product_name,
            variant_name: item.variant_name,
            quantity: item.line.quantity,
            unit_price_cents: item.unit_price.cents(),
            line_total_cents: item.line_total.cents(),
        }
    }
}

impl From<CartView> for CartResponse {
    fn from(view: CartView) -> Self {
        Self {
            lines: view.lines.into_iter().map(CartItemResponse::from).collect(),
            total_cents: view.total.cents(),
        }
    }
}

// -- Handlers --

/// GET /cart: the caller's cart priced against the current catalog.
#[tracing::instrument(skip(state))]
pub async fn get<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Identity(owner): Identity,
) -> Result<Json<CartResponse>, ApiError> {
    let view = state.cart.lines(owner).await?;
    Ok(Json(view.into()))
}

/// POST /cart/lines: add units, merging with an existing line for the same item.
#[tracing::instrument(skip(state, req))]
pub async fn add_line<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Identity(owner): Identity,
    Json(req): Json<AddLineRequest>,
) -> Result<(StatusCode, Json<CartLineResponse>), ApiError> {
    let product_id: ProductId = parse_id("product", &req.product_id)?;
    let variant_id: Option<VariantId> = req
        .variant_id
        .as_deref()
        .map(|raw| parse_id("variant", raw))
        .transpose()?;

    let line = state
        .cart
        .add_line(owner, product_id, variant_id, req.quantity)
        .await?;
    Ok((StatusCode::CREATED, Json(line.into())))
}

/// PATCH /cart/lines/:id
#[tracing::instrument(skip(state, req))]
pub async fn update_line<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Identity(owner): Identity,
    Path(id): Path<String>,
    Json(req): Json<UpdateLineRequest>,
) -> Result<Json<CartLineResponse>, ApiError> {
    let line_id: CartLineId = parse_id("cart line", &id)?;
    let line = state.cart.set_quantity(owner, line_id, req.quantity).await?;
    Ok(Json(line.into()))
}

/// DELETE /cart/lines/:id
#[tracing::instrument(skip(state))]
pub async fn remove_line<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Identity(owner): Identity,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let line_id: CartLineId = parse_id("cart line", &id)?;
    state.cart.remove_line(owner, line_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
