//! Operational endpoints for the notification queue, message retries and
//! outbox monitoring.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Query, State};
use chrono::Utc;
use notifications::QueueStatus;
use outbox::{EventStats, StatsQuery};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::state::AppState;

/// Largest accepted stats window, one hundred years.
const MAX_WINDOW_HOURS: i64 = 24 * 365 * 100;

#[derive(Serialize)]
pub struct FlushResponse {
    pub flushed: usize,
}

#[derive(Serialize)]
pub struct RetryResponse {
    pub resent: usize,
}

#[derive(Debug, Deserialize)]
pub struct StatsParams {
    pub window_hours: Option<i64>,
}

#[derive(Serialize)]
pub struct StatsResponse {
    pub window_hours: i64,
    pub total: u64,
    pub dead_letter_rate: f64,
    #[serde(flatten)]
    pub stats: EventStats,
}

/// `POST /ops/queue/flush`: process everything queued now.
#[tracing::instrument(skip(state))]
pub async fn flush_queue(State(state): State<Arc<AppState>>) -> Result<Json<FlushResponse>, ApiError> {
    let flushed = state.queue.flush().await?;
    Ok(Json(FlushResponse { flushed }))
}

/// `GET /ops/queue`: queue depth and batch settings.
pub async fn queue_status(State(state): State<Arc<AppState>>) -> Json<QueueStatus> {
    Json(state.queue.status())
}

/// `POST /ops/messages/retry`: resend failed notifications now.
#[tracing::instrument(skip(state))]
pub async fn retry_messages(
    State(state): State<Arc<AppState>>,
) -> Result<Json<RetryResponse>, ApiError> {
    let resent = state.notifications.retry_failed_messages().await?;
    Ok(Json(RetryResponse { resent }))
}

/// `GET /ops/events/stats`: outbox counts by type and status.
#[tracing::instrument(skip(state))]
pub async fn event_stats(
    State(state): State<Arc<AppState>>,
    Query(params): Query<StatsParams>,
) -> Result<Json<StatsResponse>, ApiError> {
    let window = match params.window_hours {
        Some(hours) if hours <= 0 => {
            return Err(ApiError::BadRequest("window_hours must be positive".into()));
        }
        Some(hours) if hours > MAX_WINDOW_HOURS => {
            return Err(ApiError::BadRequest(format!(
                "window_hours must be at most {MAX_WINDOW_HOURS}"
            )));
        }
        Some(hours) => chrono::Duration::hours(hours),
        None => state.stats_window,
    };

    let counts = state
        .outbox
        .count_events(StatsQuery::trailing(Utc::now(), window))
        .await?;
    let stats = EventStats::from_counts(counts);

    Ok(Json(StatsResponse {
        window_hours: window.num_hours(),
        total: stats.total(),
        dead_letter_rate: stats.dead_letter_rate(),
        stats,
    }))
}
