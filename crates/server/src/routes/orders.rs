//! Order placement, lookup and lifecycle endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::{DeliveryWorkerId, OrderId};
use domain::{CreateOrder, Order, OrderStatus, StartDelivery};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

// -- Request types --

#[derive(Debug, Deserialize)]
pub struct PaymentRequest {
    pub transaction_id: String,
}

#[derive(Debug, Deserialize)]
pub struct DeliveryRequest {
    pub delivery_worker_id: DeliveryWorkerId,
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: String,
}

// -- Handlers --

/// `POST /orders`: place an order, reserving stock.
#[tracing::instrument(skip(state))]
pub async fn create(
    State(state): State<Arc<AppState>>,
    Json(cmd): Json<CreateOrder>,
) -> Result<(StatusCode, Json<Order>), ApiError> {
    let order = state.orders.create_order(cmd).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

/// `GET /orders/:id`: load an order by ID or order number.
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Order>, ApiError> {
    let order = match Uuid::parse_str(&id) {
        Ok(uuid) => state.orders.get_order(OrderId::from_uuid(uuid)).await?,
        Err(_) => state.orders.get_order_by_number(&id).await?,
    };
    Ok(Json(order))
}

/// `POST /orders/:id/cancel`: cancel before delivery, restoring stock.
#[tracing::instrument(skip(state))]
pub async fn cancel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Order>, ApiError> {
    let order_id = parse_order_id(&id)?;
    Ok(Json(state.orders.cancel_order(order_id).await?))
}

/// `POST /orders/:id/payment`: payment provider callback.
#[tracing::instrument(skip(state))]
pub async fn payment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<PaymentRequest>,
) -> Result<Json<Order>, ApiError> {
    let order_id = parse_order_id(&id)?;
    if req.transaction_id.trim().is_empty() {
        return Err(ApiError::BadRequest("transaction_id is required".into()));
    }
    let order = state
        .orders
        .handle_payment_success(order_id, &req.transaction_id)
        .await?;
    Ok(Json(order))
}

/// `POST /orders/:id/payment-timeout`: expire an unpaid order.
#[tracing::instrument(skip(state))]
pub async fn payment_timeout(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Order>, ApiError> {
    let order_id = parse_order_id(&id)?;
    Ok(Json(state.orders.handle_payment_timeout(order_id).await?))
}

/// `POST /orders/:id/delivery`: hand a paid order to a courier.
#[tracing::instrument(skip(state))]
pub async fn start_delivery(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<DeliveryRequest>,
) -> Result<Json<Order>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let cmd = StartDelivery::new(order_id, req.delivery_worker_id);
    Ok(Json(state.orders.start_delivery(cmd).await?))
}

/// `POST /orders/:id/delivered`: mark an order delivered.
#[tracing::instrument(skip(state))]
pub async fn complete_delivery(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Order>, ApiError> {
    let order_id = parse_order_id(&id)?;
    Ok(Json(state.orders.complete_delivery(order_id).await?))
}

/// `PUT /admin/orders/:id/status`: override status outside the state machine.
#[tracing::instrument(skip(state))]
pub async fn update_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<StatusRequest>,
) -> Result<Json<Order>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let status: OrderStatus = req
        .status
        .parse()
        .map_err(|e| ApiError::BadRequest(format!("{e}")))?;
    Ok(Json(state.orders.update_order_status(order_id, status).await?))
}

// -- Helpers --

fn parse_order_id(id: &str) -> Result<OrderId, ApiError> {
    let uuid =
        Uuid::parse_str(id).map_err(|e| ApiError::BadRequest(format!("Invalid order ID: {e}")))?;
    Ok(OrderId::from_uuid(uuid))
}
