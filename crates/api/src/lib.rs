//! HTTP API server with observability for the checkout system.
//!
//! Provides REST endpoints for catalog administration, carts, checkout and
//! order management, with structured logging (tracing) and Prometheus
//! metrics. Callers are identified by the `x-identity-id` header.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, post, put};
use domain::{
    CartService, CheckoutService, InMemoryAddressBook, InventoryService, LogNotifier,
    OrderService, PaymentService,
};
use metrics_exporter_prometheus::PrometheusHandle;
use store::Store;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use routes::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: Store + Clone + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        // Catalog
        .route("/products", post(routes::catalog::create_product::<S>))
        .route("/products/{id}", get(routes::catalog::get_product::<S>))
        .route(
            "/products/{id}/variants",
            post(routes::catalog::create_variant::<S>),
        )
        .route(
            "/products/{id}/stock",
            put(routes::catalog::set_product_stock::<S>),
        )
        .route(
            "/products/{id}/price",
            put(routes::catalog::set_product_price::<S>),
        )
        .route(
            "/variants/{id}",
            delete(routes::catalog::delete_variant::<S>),
        )
        .route(
            "/variants/{id}/stock",
            put(routes::catalog::set_variant_stock::<S>),
        )
        .route(
            "/variants/{id}/price",
            put(routes::catalog::set_variant_price::<S>),
        )
        // Cart
        .route("/cart", get(routes::cart::get::<S>))
        .route("/cart/lines", post(routes::cart::add_line::<S>))
        .route(
            "/cart/lines/{id}",
            axum::routing::patch(routes::cart::update_line::<S>)
                .delete(routes::cart::remove_line::<S>),
        )
        // Orders
        .route(
            "/orders",
            get(routes::orders::list::<S>).post(routes::orders::checkout::<S>),
        )
        .route(
            "/orders/{id}",
            get(routes::orders::get::<S>).delete(routes::orders::delete::<S>),
        )
        .route("/orders/{id}/cancel", post(routes::orders::cancel::<S>))
        // Administration
        .route("/admin/orders", get(routes::admin::list::<S>))
        .route("/admin/orders/{id}", get(routes::admin::get::<S>))
        .route(
            "/admin/orders/{id}/status",
            post(routes::admin::set_status::<S>),
        )
        .route(
            "/admin/orders/{id}/payment",
            post(routes::admin::mark_paid::<S>),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates the default application state over `store`.
///
/// Addresses come from an in-memory address book and order notifications go
/// to the log.
pub fn create_default_state<S: Store + Clone + 'static>(store: S) -> Arc<AppState<S>> {
    let addresses = InMemoryAddressBook::new();

    Arc::new(AppState {
        inventory: InventoryService::new(store.clone()),
        cart: CartService::new(store.clone()),
        checkout: CheckoutService::new(store.clone(), addresses.clone(), LogNotifier),
        orders: OrderService::new(store.clone()),
        payments: PaymentService::new(store),
        addresses,
    })
}
