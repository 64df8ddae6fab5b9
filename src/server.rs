//! HTTP status endpoint: axum router and handlers.
//!
//! Runs on the same tokio runtime as the broker session and only ever reads
//! the shared counters, so it cannot slow down the network or render paths.
//!
//! ## Rust concepts
//! - axum extractors: `State`, `Json`
//! - `Arc` for sharing state across async tasks
//! - `tower-http` middleware for tracing and CORS

use crate::stats::{StatusSnapshot, WallStats};
use crate::{PanelConfig, WallError};
use axum::Router;
use axum::extract::State;
use axum::response::Json;
use axum::routing::get;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;
use utoipa::OpenApi;

// ── App State ────────────────────────────────────────────────────────

/// Shared application state, passed to every handler via axum's `State` extractor.
///
/// Rust concept: CLONE for Arc
/// axum clones the state for each request, so everything inside must be
/// cheaply cloneable. `Arc` makes that possible for the counters.
#[derive(Clone)]
pub struct AppState {
    pub stats: Arc<WallStats>,
    pub panel: PanelConfig,
}

// ── OpenAPI Documentation ────────────────────────────────────────────

#[derive(OpenApi)]
#[openapi(
    paths(get_status, get_panel),
    components(schemas(StatusSnapshot, PanelInfo)),
    tags(
        (name = "system", description = "System status endpoints"),
    ),
    info(
        title = "LED Wall Status API",
        version = env!("CARGO_PKG_VERSION"),
        description = "Read-only counters of a NATS-fed LED wall segment"
    )
)]
pub struct ApiDoc;

// ── Response types ───────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Eq, Serialize, utoipa::ToSchema)]
pub struct PanelInfo {
    /// Panel height in pixels
    #[schema(example = 7)]
    pub rows: u32,
    /// Panel width in pixels
    #[schema(example = 7)]
    pub cols: u32,
    /// Byte count every `MSG` must declare
    #[schema(example = 163)]
    pub payload_len: usize,
}

// ── Router ───────────────────────────────────────────────────────────

/// Build the axum router with the status endpoints.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/status", get(get_status))
        .route("/api/v1/panel", get(get_panel))
        .route("/api-docs/openapi.json", get(get_openapi))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind `addr` and serve until the task is dropped.
pub async fn serve(addr: SocketAddr, state: AppState) -> Result<(), WallError> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("status endpoint listening on http://{}", addr);
    tracing::info!("API docs at http://{}/api-docs/openapi.json", addr);
    axum::serve(listener, create_router(state)).await?;
    Ok(())
}

// ── Handlers ─────────────────────────────────────────────────────────

/// GET /api/v1/status: counters and connection state
#[utoipa::path(
    get,
    path = "/api/v1/status",
    tag = "system",
    responses(
        (status = 200, description = "Current counters", body = StatusSnapshot)
    )
)]
async fn get_status(State(state): State<AppState>) -> Json<StatusSnapshot> {
    Json(state.stats.snapshot())
}

/// GET /api/v1/panel: panel geometry this segment expects
#[utoipa::path(
    get,
    path = "/api/v1/panel",
    tag = "system",
    responses(
        (status = 200, description = "Panel geometry", body = PanelInfo)
    )
)]
async fn get_panel(State(state): State<AppState>) -> Json<PanelInfo> {
    Json(PanelInfo {
        rows: state.panel.rows,
        cols: state.panel.cols,
        payload_len: state.panel.payload_len(),
    })
}

async fn get_openapi() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn state() -> AppState {
        AppState {
            stats: Arc::new(WallStats::new()),
            panel: PanelConfig::default(),
        }
    }

    #[tokio::test]
    async fn status_reports_current_counters() {
        let state = state();
        state.stats.frame_rendered();
        state.stats.frame_missed();
        state.stats.frame_missed();

        let Json(snapshot) = get_status(State(state)).await;
        assert_eq!(snapshot.rendered, 1);
        assert_eq!(snapshot.missed, 2);
        assert!(!snapshot.connected);
    }

    #[tokio::test]
    async fn panel_reports_expected_payload() {
        let Json(info) = get_panel(State(state())).await;
        assert_eq!(
            info,
            PanelInfo {
                rows: 7,
                cols: 7,
                payload_len: 163,
            }
        );
    }

    #[test]
    fn openapi_lists_every_route() {
        let doc = ApiDoc::openapi();
        let paths: Vec<&str> = doc.paths.paths.keys().map(String::as_str).collect();
        assert_eq!(paths, vec!["/api/v1/panel", "/api/v1/status"]);
    }

    #[tokio::test]
    async fn router_serves_status_over_http() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(axum::serve(listener, create_router(state())).into_future());

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /api/v1/status HTTP/1.1\r\nHost: test\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();

        assert!(response.starts_with("HTTP/1.1 200"), "{response}");
        assert!(response.contains("\"protocol_errors\":0"));
        server.abort();
    }
}
