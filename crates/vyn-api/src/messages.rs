use axum::{
    Extension, Json,
    extract::{Path, State},
};
use tracing::debug;

use vyn_types::api::{Claims, MarkReadResponse, MessageResponse};
use vyn_types::models::UserId;

use crate::error::ApiError;
use crate::state::AppState;

/// Full history between the caller and `peer_id`, oldest first. Fetching
/// counts as delivery for anything the peer sent that was still pending.
pub async fn get_history(
    State(state): State<AppState>,
    Path(peer_id): Path<UserId>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<MessageResponse>>, ApiError> {
    let viewer = claims.sub;

    let messages = state
        .db
        .call(move |db| {
            let delivered = db.deliver_pending(viewer, peer_id)?;
            if delivered > 0 {
                debug!("User {} fetched {} pending messages from {}", viewer, delivered, peer_id);
            }
            db.history(viewer, peer_id)
        })
        .await?;

    Ok(Json(messages.into_iter().map(MessageResponse::from).collect()))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Path(peer_id): Path<UserId>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<MarkReadResponse>, ApiError> {
    let reader = claims.sub;
    let updated_count = state.db.call(move |db| db.mark_read(reader, peer_id)).await?;

    Ok(Json(MarkReadResponse { updated_count }))
}
