//! Health and metrics HTTP surfaces.
//!
//! A small axum router exposing `/health`, `/ready`, `/live`, and
//! `/metrics`. Handlers only read snapshots: the run publishes its
//! counters through a watch channel and the metrics registry renders on
//! demand, so nothing here can block or mutate the run.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tokio::sync::watch;
use tracing::{error, info};

use crate::metrics::Metrics;
use crate::scheduler::StopSignal;
use crate::stats::StatsSnapshot;

/// Shared state behind the observability endpoints.
#[derive(Clone)]
pub struct AppState {
    started: Instant,
    version: &'static str,
    metrics: Arc<Metrics>,
    stats: watch::Receiver<StatsSnapshot>,
}

impl AppState {
    pub fn new(metrics: Arc<Metrics>, stats: watch::Receiver<StatsSnapshot>) -> Self {
        AppState {
            started: Instant::now(),
            version: env!("CARGO_PKG_VERSION"),
            metrics,
            stats,
        }
    }

    fn status_body(&self, status: &str) -> serde_json::Value {
        let snapshot = *self.stats.borrow();
        json!({
            "status": status,
            "uptime_seconds": self.started.elapsed().as_secs(),
            "version": self.version,
            "executions": snapshot,
        })
    }
}

/// Router with all observability endpoints.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/live", get(live))
        .route("/metrics", get(metrics))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(state.status_body("ok"))
}

async fn ready(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(state.status_body("ready"))
}

async fn live(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(state.status_body("alive"))
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, state.metrics.render())
}

/// Serve the router on `port` until the stop signal trips. Bind or serve
/// failures are logged, never fatal to the run.
pub async fn serve(state: AppState, port: u16, stop: StopSignal) {
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(port, error = %e, "failed to bind observability port");
            return;
        }
    };
    info!(port, "observability endpoints listening");
    let shutdown = async move { stop.stopped().await };
    if let Err(e) = axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
    {
        error!(error = %e, "observability server exited");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn state_with(snapshot: StatsSnapshot) -> AppState {
        let (tx, rx) = watch::channel(snapshot);
        // Keep the sender alive for the test body.
        std::mem::forget(tx);
        AppState::new(Arc::new(Metrics::new()), rx)
    }

    #[test]
    fn test_status_body_shape() {
        let snapshot = StatsSnapshot {
            total: 7,
            successful: 5,
            failed: 2,
            elapsed_seconds: 12.5,
        };
        let body = state_with(snapshot).status_body("ok");
        assert_eq!(body["status"], "ok");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
        assert_eq!(body["executions"]["total"], 7);
        assert_eq!(body["executions"]["successful"], 5);
        assert_eq!(body["executions"]["failed"], 2);
    }

    #[tokio::test]
    async fn test_serve_and_shutdown() {
        let state = state_with(StatsSnapshot::default());
        let stop = StopSignal::new();
        // Port 0 would be ideal, but the helper takes a fixed port; use an
        // unlikely high port and only assert clean shutdown.
        let server = tokio::spawn(serve(state, 48621, stop.clone()));
        tokio::time::sleep(Duration::from_millis(50)).await;
        stop.stop();
        tokio::time::timeout(Duration::from_secs(2), server)
            .await
            .expect("server did not shut down")
            .unwrap();
    }
}
