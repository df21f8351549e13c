// HTTP request handlers for view ingestion, the unload beacon and queries

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};
use viewtrack_core::ViewEvent;
use viewtrack_writer::queries::{
    recent_window_start, DEFAULT_HISTORY_LIMIT, DEFAULT_RECENT_DAYS, DEFAULT_RECENT_LIMIT,
    DEFAULT_TOP_VIEWERS_LIMIT, DEFAULT_TRENDING_LIMIT,
};
use viewtrack_writer::WriterError;

use crate::{AppError, AppState};

/// Upper bound for any `limit` query parameter.
const MAX_QUERY_LIMIT: usize = 100;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RecordViewRequest {
    #[serde(alias = "userId")]
    viewer_id: String,
    #[serde(alias = "productId")]
    subject_id: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LimitParams {
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RecentParams {
    days: Option<u32>,
    limit: Option<usize>,
}

fn clamp_limit(requested: Option<usize>, default: usize) -> usize {
    requested.unwrap_or(default).clamp(1, MAX_QUERY_LIMIT)
}

fn writer_error(err: WriterError) -> AppError {
    let status = match err {
        WriterError::InvalidKey { .. } => StatusCode::BAD_REQUEST,
        WriterError::StoreUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    AppError::with_status(status, err.into())
}

fn not_found(what: &str, id: &str) -> AppError {
    AppError::with_status(
        StatusCode::NOT_FOUND,
        anyhow::anyhow!("No analytics recorded for {} '{}'", what, id),
    )
}

/// POST /api/views - Record a view. Always accepted; recording happens in
/// the background and never reports failure to the caller.
pub(crate) async fn record_view(
    State(state): State<AppState>,
    Json(request): Json<RecordViewRequest>,
) -> impl IntoResponse {
    let tracker = Arc::clone(&state.tracker);
    tokio::spawn(async move {
        let outcome = tracker
            .record_view(&request.viewer_id, &request.subject_id)
            .await;
        debug!(?outcome, "View recorded");
    });

    (StatusCode::ACCEPTED, Json(json!({"status": "accepted"})))
}

/// POST /api/analytics - Unload beacon receiver (JSON array of view events)
pub(crate) async fn receive_beacon(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let events: Vec<ViewEvent> = serde_json::from_slice(&body).map_err(|e| {
        warn!(error = %e, "Rejected malformed beacon payload");
        AppError::with_status(StatusCode::BAD_REQUEST, e.into())
    })?;

    metrics::counter!("viewtrack.beacon.events").increment(events.len() as u64);
    let report = state.writer.process_batch(events).await;

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "processed": report.delivered.len(),
            "failed": report.failed.len(),
            "rejected": report.rejected.len(),
        })),
    ))
}

/// GET /api/analytics/subjects/:id/summary
pub(crate) async fn subject_summary(
    State(state): State<AppState>,
    Path(subject_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let summary = state
        .queries
        .get_subject_summary(&subject_id)
        .await
        .map_err(writer_error)?
        .ok_or_else(|| not_found("subject", &subject_id))?;
    Ok(Json(summary))
}

/// GET /api/analytics/subjects/:id/top-viewers?limit=
pub(crate) async fn top_viewers(
    State(state): State<AppState>,
    Path(subject_id): Path<String>,
    Query(params): Query<LimitParams>,
) -> Result<impl IntoResponse, AppError> {
    let limit = clamp_limit(params.limit, DEFAULT_TOP_VIEWERS_LIMIT);
    let viewers = state
        .queries
        .get_top_viewers(&subject_id, limit)
        .await
        .map_err(writer_error)?;
    Ok(Json(viewers))
}

/// GET /api/analytics/viewers/:id/summary
pub(crate) async fn viewer_summary(
    State(state): State<AppState>,
    Path(viewer_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let summary = state
        .queries
        .get_viewer_summary(&viewer_id)
        .await
        .map_err(writer_error)?
        .ok_or_else(|| not_found("viewer", &viewer_id))?;
    Ok(Json(summary))
}

/// GET /api/analytics/viewers/:id/history?limit=
pub(crate) async fn viewer_history(
    State(state): State<AppState>,
    Path(viewer_id): Path<String>,
    Query(params): Query<LimitParams>,
) -> Result<impl IntoResponse, AppError> {
    let limit = clamp_limit(params.limit, DEFAULT_HISTORY_LIMIT);
    let history = state
        .queries
        .get_viewer_history(&viewer_id, limit)
        .await
        .map_err(writer_error)?;
    Ok(Json(history))
}

/// GET /api/analytics/viewers/:id/recent?days=&limit=
pub(crate) async fn recently_viewed(
    State(state): State<AppState>,
    Path(viewer_id): Path<String>,
    Query(params): Query<RecentParams>,
) -> Result<impl IntoResponse, AppError> {
    let limit = clamp_limit(params.limit, DEFAULT_RECENT_LIMIT);
    let days = params.days.unwrap_or(DEFAULT_RECENT_DAYS);
    let since = recent_window_start(state.clock.now_millis(), days);

    let recent = state
        .queries
        .get_recently_viewed(&viewer_id, since, limit)
        .await
        .map_err(writer_error)?;
    Ok(Json(recent))
}

/// GET /api/analytics/trending?limit=
pub(crate) async fn trending(
    State(state): State<AppState>,
    Query(params): Query<LimitParams>,
) -> Result<impl IntoResponse, AppError> {
    let limit = clamp_limit(params.limit, DEFAULT_TRENDING_LIMIT);
    let subjects = state
        .queries
        .get_trending(limit)
        .await
        .map_err(writer_error)?;
    Ok(Json(subjects))
}

/// GET /api/analytics/stats - Tracker counters and queue depth
pub(crate) async fn tracker_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.tracker.stats().await)
}

/// GET /health - Basic health check
pub(crate) async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({"status": "healthy"})))
}

/// GET /ready - Readiness check (includes local queue persistence)
pub(crate) async fn ready_check(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.tracker.stats().await;
    if stats.degraded {
        warn!("Readiness check: queue persistence degraded");
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"status": "not ready", "queue": "degraded", "pending": stats.pending})),
        )
    } else {
        (
            StatusCode::OK,
            Json(json!({"status": "ready", "queue": "persisted", "pending": stats.pending})),
        )
    }
}
