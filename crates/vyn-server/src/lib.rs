pub mod config;

use axum::{Json, Router, response::IntoResponse, routing::get};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use vyn_api::state::AppState;

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(vyn_api::router(state))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}
