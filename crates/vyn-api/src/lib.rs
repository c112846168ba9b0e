pub mod conversations;
pub mod error;
pub mod messages;
pub mod middleware;
pub mod state;
pub mod ws;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};

use crate::state::AppState;

/// Every route that needs a verified user: the query surface and the live gateway.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/conversations", get(conversations::list_conversations))
        .route("/conversations/{peer_id}/messages", get(messages::get_history))
        .route("/conversations/{peer_id}/read", post(messages::mark_read))
        .route("/ws", get(ws::ws_upgrade))
        .layer(axum_middleware::from_fn_with_state(state.clone(), middleware::require_auth))
        .with_state(state)
}
