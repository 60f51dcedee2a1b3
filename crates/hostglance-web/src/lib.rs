//! Metrics HTTP server: the Axum router exposing `/metrics` over the
//! shared snapshot buffers. No auth, no SSE, no OpenAPI surface — the
//! stripped-down counterpart to a full web frontend, not one.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::Request;
use axum::http::{header, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use hostglance_core::buffers::SnapshotBuffers;
use hostglance_core::prometheus::{read_snapshot, serialize};
use tower_http::compression::CompressionLayer;
use tracing::info;

/// Forces `Connection: close` on every response, per the external
/// interface contract — no keep-alive sockets to leak across scrapes.
async fn close_connections(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    response.headers_mut().insert(header::CONNECTION, HeaderValue::from_static("close"));
    response
}

async fn metrics_handler(
    axum::extract::State(buffers): axum::extract::State<Arc<SnapshotBuffers>>,
) -> impl IntoResponse {
    let snapshot = read_snapshot(&buffers);
    let body = serialize(&snapshot);
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

async fn index_handler() -> impl IntoResponse {
    "hostglance metrics endpoint; see /metrics\n"
}

async fn fallback_handler() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "not found\n")
}

pub fn router(buffers: Arc<SnapshotBuffers>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/", get(index_handler))
        .fallback(fallback_handler)
        .layer(middleware::from_fn(close_connections))
        .layer(CompressionLayer::new())
        .with_state(buffers)
}

/// Binds `addr` and serves until `shutdown` resolves.
pub async fn serve(addr: SocketAddr, buffers: Arc<SnapshotBuffers>, shutdown: impl std::future::Future<Output = ()> + Send + 'static) -> std::io::Result<()> {
    let app = router(buffers);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "metrics server listening");
    axum::serve(listener, app).with_graceful_shutdown(shutdown).await
}
