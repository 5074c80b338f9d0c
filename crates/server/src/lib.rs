//! HTTP server and background workers for the order-processing backend.
//!
//! Exposes order operations and operational endpoints over REST, and runs
//! the outbox dispatcher, lease reaper, janitor, notification queue
//! consumer, message retry scan and payment-timeout sweeper beside it.

pub mod config;
pub mod error;
pub mod routes;
pub mod state;
pub mod sweeper;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post, put};
use domain::{AddressValidator, OrderService, OrderStore};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use config::{Config, ConfigError, LogFormat};
pub use error::ApiError;
pub use state::{AppState, Background, Catalog, Storage, build, build_with_provider};
pub use sweeper::PaymentTimeoutSweeper;

/// Order service over type-erased stores, shared by handlers and the sweeper.
pub type OrderApi = OrderService<Arc<dyn OrderStore>, Arc<dyn AddressValidator>>;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/orders", post(routes::orders::create))
        .route("/orders/{id}", get(routes::orders::get))
        .route("/orders/{id}/cancel", post(routes::orders::cancel))
        .route("/orders/{id}/payment", post(routes::orders::payment))
        .route(
            "/orders/{id}/payment-timeout",
            post(routes::orders::payment_timeout),
        )
        .route("/orders/{id}/delivery", post(routes::orders::start_delivery))
        .route(
            "/orders/{id}/delivered",
            post(routes::orders::complete_delivery),
        )
        .route("/admin/orders/{id}/status", put(routes::orders::update_status))
        .route("/admin/products", post(routes::admin::upsert_product))
        .route("/admin/addresses", post(routes::admin::add_address))
        .route("/admin/service-area", put(routes::admin::set_service_area))
        .route(
            "/admin/recipients/{user_id}",
            put(routes::admin::set_recipient),
        )
        .route("/ops/queue", get(routes::ops::queue_status))
        .route("/ops/queue/flush", post(routes::ops::flush_queue))
        .route("/ops/messages/retry", post(routes::ops::retry_messages))
        .route("/ops/events/stats", get(routes::ops::event_stats))
        .route("/telemetry/actions", post(routes::telemetry::record))
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
