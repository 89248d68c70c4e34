//! axum server publishing the metrics snapshot as JSON at `/metrics`.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use tokio::net::TcpListener;

use super::MetricsSnapshot;
use crate::server::ServerCore;

pub fn router(core: Arc<ServerCore>) -> Router {
    Router::new()
        .route("/metrics", get(metrics))
        .with_state(core)
}

/// Run the metrics server until the core shuts down.
pub async fn start(core: Arc<ServerCore>, port: u16) {
    let addr = format!("0.0.0.0:{}", port);
    let listener = match TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!("Metrics endpoint failed to bind to {}: {}", addr, e);
            return;
        }
    };
    tracing::info!("Metrics at http://{}/metrics", addr);

    let shutdown = core.shutdown_token().clone();
    let app = router(core);
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
    {
        tracing::error!("Metrics server error: {}", e);
    }
}

async fn metrics(State(core): State<Arc<ServerCore>>) -> Json<MetricsSnapshot> {
    Json(core.metrics_snapshot())
}
