// Server mode - HTTP front for the view tracker
//
// Features:
// - View ingestion (POST /api/views) through the debounced durable queue
// - Unload beacon receiver (POST /api/analytics)
// - Aggregate analytics queries
// - Structured logging with tracing
// - Graceful shutdown that hands pending views to the unload path

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use viewtrack_batch::ViewTracker;
use viewtrack_config::{RuntimeConfig, ServerConfig};
use viewtrack_core::{Clock, SystemClock};
use viewtrack_writer::{AggregateStore, AggregateWriter, AnalyticsQueries, MemoryAggregateStore};

mod handlers;
mod init;

use handlers::{
    health_check, ready_check, receive_beacon, recently_viewed, record_view, subject_summary,
    top_viewers, tracker_stats, trending, viewer_history, viewer_summary,
};
use init::{init_queue_store, init_tracing, init_transport, tracker_config};

/// How often the background ticker checks the flush deadline.
const TICK_PERIOD: Duration = Duration::from_secs(1);

/// How long accepted unload beacons get to leave the process at shutdown.
const BEACON_GRACE: Duration = Duration::from_secs(2);

/// Application state shared across all requests
#[derive(Clone)]
pub struct AppState {
    pub tracker: Arc<ViewTracker>,
    pub writer: Arc<AggregateWriter>,
    pub queries: AnalyticsQueries,
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    /// Wire tracker, writer and queries over `store` using `config`.
    pub async fn from_config(
        config: &RuntimeConfig,
        clock: Arc<dyn Clock>,
        store: Arc<dyn AggregateStore>,
    ) -> Result<Self> {
        let writer = Arc::new(
            AggregateWriter::new(Arc::clone(&store), Arc::clone(&clock))
                .with_max_attempts(config.tracker.max_transaction_attempts),
        );

        let tracker = ViewTracker::open(
            tracker_config(config),
            Arc::clone(&clock),
            init_queue_store(config)?,
            Arc::clone(&writer),
            init_transport(config),
        )
        .await;

        Ok(Self {
            tracker: Arc::new(tracker),
            writer,
            queries: AnalyticsQueries::new(store),
            clock,
        })
    }
}

/// Error type that implements IntoResponse
pub(crate) struct AppError {
    status: StatusCode,
    error: anyhow::Error,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!("Request error: {:?}", self.error);
        }
        (
            self.status,
            Json(json!({
                "error": self.error.to_string(),
            })),
        )
            .into_response()
    }
}

impl AppError {
    pub fn with_status(status: StatusCode, error: anyhow::Error) -> Self {
        Self { status, error }
    }
}

/// Build the HTTP router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/views", post(record_view))
        .route("/api/analytics", post(receive_beacon))
        .route("/api/analytics/stats", get(tracker_stats))
        .route("/api/analytics/trending", get(trending))
        .route("/api/analytics/subjects/:id/summary", get(subject_summary))
        .route("/api/analytics/subjects/:id/top-viewers", get(top_viewers))
        .route("/api/analytics/viewers/:id/summary", get(viewer_summary))
        .route("/api/analytics/viewers/:id/history", get(viewer_history))
        .route("/api/analytics/viewers/:id/recent", get(recently_viewed))
        .route("/health", get(health_check))
        .route("/ready", get(ready_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Graceful shutdown handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown...");
        },
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown...");
        },
    }
}

/// Entry point for server mode using configuration from the environment
pub async fn run() -> Result<()> {
    let config = RuntimeConfig::load().context("Failed to load configuration")?;
    run_with_config(config).await
}

/// Entry point for server mode with a resolved configuration
pub async fn run_with_config(config: RuntimeConfig) -> Result<()> {
    init_tracing(&config);

    let server = config.server.clone().unwrap_or_else(ServerConfig::default);
    let addr = server.listen_addr.clone();

    info!(
        batch_size = config.tracker.batch_size,
        flush_interval_secs = config.tracker.flush_interval_secs,
        debounce_window_ms = config.tracker.debounce_window_ms,
        queue_backend = %config.queue.backend,
        "Starting view tracker"
    );

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store: Arc<dyn AggregateStore> = Arc::new(MemoryAggregateStore::new());
    let state = AppState::from_config(&config, clock, store).await?;
    let ticker = state.tracker.spawn_ticker(TICK_PERIOD);

    let app = router(state.clone());

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context(format!("Failed to bind to {}", addr))?;

    info!("viewtrack listening on http://{}", addr);
    info!("Routes:");
    info!("  POST http://{}/api/views                    - Record a view", addr);
    info!("  POST http://{}/api/analytics                - Unload beacon receiver", addr);
    info!("  GET  http://{}/api/analytics/trending       - Trending subjects", addr);
    info!("  GET  http://{}/api/analytics/subjects/:id/* - Subject analytics", addr);
    info!("  GET  http://{}/api/analytics/viewers/:id/*  - Viewer analytics", addr);
    info!("  GET  http://{}/health                       - Health check", addr);
    info!("  GET  http://{}/ready                        - Readiness check", addr);
    info!("Press Ctrl+C or send SIGTERM to stop");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    ticker.shutdown().await;
    state.tracker.wait_flush_idle().await;
    let outcome = state.tracker.flush_on_unload().await;
    state.tracker.transport().wait_idle(BEACON_GRACE).await;

    info!(?outcome, "Server shutdown complete");

    Ok(())
}
