//! Prometheus exposition endpoint

use axum::routing::get;
use axum::Router;
use quill_common::{Result, METRICS};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::info;

async fn metrics() -> String {
    METRICS.gather()
}

/// Router serving `GET /metrics`
pub fn metrics_router() -> Router {
    Router::new().route("/metrics", get(metrics))
}

/// Serve the metrics endpoint on `addr` until the listener fails
pub async fn serve_metrics(addr: SocketAddr) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("Metrics endpoint listening on {}", listener.local_addr()?);
    axum::serve(listener, metrics_router()).await?;
    Ok(())
}
