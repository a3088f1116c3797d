//! HTTP surface of the exporter.

use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use proxmox_exporter_api::ApiClient;
use proxmox_exporter_collector::Collector;
use tracing::error;

/// Routes `/healthz` and `/metrics`.
pub fn router<C>(collector: Arc<Collector<C>>) -> Router
where
    C: ApiClient,
{
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics::<C>))
        .with_state(collector)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn metrics<C>(State(collector): State<Arc<Collector<C>>>) -> Response
where
    C: ApiClient,
{
    match collector.collect().await {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)],
            body,
        )
            .into_response(),
        Err(e) => {
            error!("Scrape failed: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response()
        }
    }
}
