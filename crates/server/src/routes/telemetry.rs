//! User action ingestion.

use std::{collections::BTreeMap, sync::Arc};

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use common::UserId;
use notifications::QueueItem;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ActionRequest {
    pub user_id: UserId,
    pub action_type: String,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

#[derive(Serialize)]
pub struct ActionResponse {
    pub accepted: bool,
}

/// `POST /telemetry/actions`: enqueue a user action without waiting.
///
/// Responds 202 when queued and 503 when the queue is full and the action
/// was dropped.
pub async fn record(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ActionRequest>,
) -> Result<(StatusCode, Json<ActionResponse>), ApiError> {
    if req.action_type.trim().is_empty() {
        return Err(ApiError::BadRequest("action_type is required".into()));
    }

    let accepted = state.queue.enqueue(QueueItem::UserAction {
        user_id: req.user_id,
        action_type: req.action_type,
        target: req.target,
        properties: req.properties,
    });
    let status = if accepted {
        StatusCode::ACCEPTED
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    Ok((status, Json(ActionResponse { accepted })))
}
