//! Administrative endpoints for reference data: products, delivery
//! addresses, the service area and push recipients.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::{ProductId, UserId};
use domain::{Address, Product};
use notifications::MessageType;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ProductRequest {
    #[serde(default)]
    pub id: Option<ProductId>,
    pub name: String,
    pub price_cents: i64,
    pub stock: u32,
}

#[derive(Debug, Deserialize)]
pub struct AddressRequest {
    pub user_id: UserId,
    pub province: String,
    pub city: String,
    pub district: String,
    pub detail: String,
}

#[derive(Debug, Deserialize)]
pub struct ServiceAreaRequest {
    pub cities: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct RecipientRequest {
    pub recipient: String,
    #[serde(default)]
    pub disabled: Vec<MessageType>,
}

#[derive(Serialize)]
pub struct RecipientResponse {
    pub user_id: UserId,
    pub recipient: String,
    pub disabled: Vec<MessageType>,
}

/// `POST /admin/products`: create or replace a product.
#[tracing::instrument(skip(state))]
pub async fn upsert_product(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ProductRequest>,
) -> Result<(StatusCode, Json<Product>), ApiError> {
    if req.name.trim().is_empty() {
        return Err(ApiError::BadRequest("name is required".into()));
    }
    if req.price_cents < 0 {
        return Err(ApiError::BadRequest("price_cents must not be negative".into()));
    }

    let mut product = Product::new(req.name, req.price_cents, req.stock);
    if let Some(id) = req.id {
        product.id = id;
    }
    state.catalog.upsert_product(&product).await?;
    Ok((StatusCode::CREATED, Json(product)))
}

/// `POST /admin/addresses`: register a delivery address.
#[tracing::instrument(skip(state))]
pub async fn add_address(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AddressRequest>,
) -> (StatusCode, Json<Address>) {
    let address = Address::new(req.user_id, req.province, req.city, req.district, req.detail);
    state.addresses.add_address(address.clone()).await;
    (StatusCode::CREATED, Json(address))
}

/// `PUT /admin/service-area`: restrict delivery to the listed cities.
#[tracing::instrument(skip(state))]
pub async fn set_service_area(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ServiceAreaRequest>,
) -> StatusCode {
    state.addresses.set_service_area(req.cities).await;
    StatusCode::NO_CONTENT
}

/// `PUT /admin/recipients/:user_id`: set a user's push recipient id.
#[tracing::instrument(skip(state))]
pub async fn set_recipient(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Json(req): Json<RecipientRequest>,
) -> Result<Json<RecipientResponse>, ApiError> {
    let user_id = Uuid::parse_str(&user_id)
        .map(UserId::from_uuid)
        .map_err(|e| ApiError::BadRequest(format!("Invalid user ID: {e}")))?;
    if req.recipient.trim().is_empty() {
        return Err(ApiError::BadRequest("recipient is required".into()));
    }

    state.recipients.set_recipient(user_id, req.recipient.clone()).await;
    for message_type in &req.disabled {
        state.recipients.disable(user_id, *message_type).await;
    }
    Ok(Json(RecipientResponse {
        user_id,
        recipient: req.recipient,
        disabled: req.disabled,
    }))
}
