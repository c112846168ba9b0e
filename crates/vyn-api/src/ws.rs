use axum::{
    Extension,
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
};

use vyn_gateway::connection;
use vyn_types::api::Claims;

use crate::state::AppState;

pub async fn ws_upgrade(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let router = state.router.clone();
    ws.on_upgrade(move |socket| connection::handle_connection(socket, router, claims.sub))
}
