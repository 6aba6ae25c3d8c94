//! Catalog administration endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::{ItemRef, Money, Product, ProductId, Variant, VariantId};
use serde::{Deserialize, Serialize};
use store::Store;

use super::{AppState, parse_id};
use crate::error::ApiError;

// -- Request types --

#[derive(Deserialize)]
pub struct CreateProductRequest {
    pub name: String,
    pub price_cents: i64,
    #[serde(default)]
    pub stock_quantity: u32,
}

#[derive(Deserialize)]
pub struct CreateVariantRequest {
    pub name: String,
    pub price_cents: Option<i64>,
    #[serde(default)]
    pub stock_quantity: u32,
}

#[derive(Deserialize)]
pub struct SetStockRequest {
    pub stock_quantity: u32,
}

#[derive(Deserialize)]
pub struct SetPriceRequest {
    pub price_cents: i64,
}

// -- Response types --

#[derive(Serialize)]
pub struct ProductResponse {
    pub id: String,
    pub name: String,
    pub price_cents: i64,
    pub stock_quantity: u32,
    pub available: bool,
    pub variants: Vec<VariantResponse>,
}

#[derive(Serialize)]
pub struct VariantResponse {
    pub id: String,
    pub product_id: String,
    pub name: String,
    pub price_cents: Option<i64>,
    pub stock_quantity: u32,
    pub available: bool,
}

impl ProductResponse {
    fn new(product: Product, variants: Vec<Variant>) -> Self {
        Self {
            id: product.id.to_string(),
            name: product.name,
            price_cents: product.price.cents(),
            stock_quantity: product.stock_quantity,
            available: product.available,
            variants: variants.into_iter().map(VariantResponse::from).collect(),
        }
    }
}

impl From<Variant> for VariantResponse {
    fn from(variant: Variant) -> Self {
        Self {
            id: variant.id.to_string(),
            product_id: variant.product_id.to_string(),
            name: variant.name,
            price_cents: variant.price.map(|p| p.cents()),
            stock_quantity: variant.stock_quantity,
            available: variant.available,
        }
    }
}

// -- Handlers --

/// POST /products: add a product without variants.
#[tracing::instrument(skip(state, req))]
pub async fn create_product<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<CreateProductRequest>,
) -> Result<(StatusCode, Json<ProductResponse>), ApiError> {
    let product = state
        .inventory
        .create_product(req.name, Money::from_cents(req.price_cents), req.stock_quantity)
        .await?;
    Ok((StatusCode::CREATED, Json(ProductResponse::new(product, vec![]))))
}

/// GET /products/:id: a product with its variants.
#[tracing::instrument(skip(state))]
pub async fn get_product<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<ProductResponse>, ApiError> {
    let id: ProductId = parse_id("product", &id)?;
    product_response(&state, id).await.map(Json)
}

/// POST /products/:id/variants: add a variant and fold its stock into the product.
#[tracing::instrument(skip(state, req))]
pub async fn create_variant<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Json(req): Json<CreateVariantRequest>,
) -> Result<(StatusCode, Json<VariantResponse>), ApiError> {
    let product_id: ProductId = parse_id("product", &id)?;
    let variant = state
        .inventory
        .add_variant(
            product_id,
            req.name,
            req.price_cents.map(Money::from_cents),
            req.stock_quantity,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(variant.into())))
}

/// PUT /products/:id/stock
#[tracing::instrument(skip(state, req))]
pub async fn set_product_stock<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Json(req): Json<SetStockRequest>,
) -> Result<Json<ProductResponse>, ApiError> {
    let id: ProductId = parse_id("product", &id)?;
    state
        .inventory
        .set_stock(ItemRef::Product(id), req.stock_quantity)
        .await?;
    product_response(&state, id).await.map(Json)
}

/// PUT /products/:id/price
#[tracing::instrument(skip(state, req))]
pub async fn set_product_price<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Json(req): Json<SetPriceRequest>,
) -> Result<Json<ProductResponse>, ApiError> {
    let id: ProductId = parse_id("product", &id)?;
    state
        .inventory
        .set_price(ItemRef::Product(id), Money::from_cents(req.price_cents))
        .await?;
    product_response(&state, id).await.map(Json)
}

/// PUT /variants/:id/stock
#[tracing::instrument(skip(state, req))]
pub async fn set_variant_stock<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Json(req): Json<SetStockRequest>,
) -> Result<Json<VariantResponse>, ApiError> {
    let id: VariantId = parse_id("variant", &id)?;
    state
        .inventory
        .set_stock(ItemRef::Variant(id), req.stock_quantity)
        .await?;
    Ok(Json(state.inventory.variant(id).await?.into()))
}

/// PUT /variants/:id/price
#[tracing::instrument(skip(state, req))]
pub async fn set_variant_price<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Json(req): Json<SetPriceRequest>,
) -> Result<Json<VariantResponse>, ApiError> {
    let id: VariantId = parse_id("variant", &id)?;
    state
        .inventory
        .set_price(ItemRef::Variant(id), Money::from_cents(req.price_cents))
        .await?;
    Ok(Json(state.inventory.variant(id).await?.into()))
}

/// DELETE /variants/:id: remove a variant; returns its product with the recomputed aggregate.
#[tracing::instrument(skip(state))]
pub async fn delete_variant<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<ProductResponse>, ApiError> {
    let id: VariantId = parse_id("variant", &id)?;
    let product = state.inventory.remove_variant(id).await?;
    product_response(&state, product.id).await.map(Json)
}

async fn product_response<S: Store + Clone + 'static>(
    state: &AppState<S>,
    id: ProductId,
) -> Result<ProductResponse, ApiError> {
    let product = state.inventory.product(id).await?;
    let variants = state.inventory.variants_of(id).await?;
    Ok(ProductResponse::new(product, variants))
}
