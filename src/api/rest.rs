// =============================================================================
// REST API — read-only snapshot delivery
// =============================================================================
//
// Generalized from the teacher's `api::rest::router`/`AppState`-snapshot
// pattern with the `AuthBearer` extractor and every trading-control route
// removed: there is no authentication and nothing here places an order, so
// there is nothing to protect. This is the boundary the out-of-scope trading
// layer polls for `Snapshot` data.
//
// CORS is configured permissively, matching the teacher's development
// posture.
// =============================================================================

use std::sync::Arc;

use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};

use crate::store::Store;

/// Build the read-only API router: `GET /health`, `GET /snapshot`.
pub fn router(store: Arc<Store>, live_ttl_secs: i64) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/snapshot", get(snapshot))
        .layer(cors)
        .with_state(ApiState { store, live_ttl_secs })
}

#[derive(Clone)]
struct ApiState {
    store: Arc<Store>,
    live_ttl_secs: i64,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    server_time: i64,
}

async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        server_time: chrono::Utc::now().timestamp_millis(),
    })
}

async fn snapshot(State(state): State<ApiState>) -> impl IntoResponse {
    Json(state.store.snapshot(state.live_ttl_secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn router_builds_without_panicking() {
        let store = Arc::new(Store::new());
        let _router = router(store, 120);
    }
}
