use axum::{
    Extension, Json,
    extract::State,
};

use vyn_types::api::{Claims, ConversationResponse};

use crate::error::ApiError;
use crate::state::AppState;

/// Conversation list for the caller, most recent first, with unread counts.
pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<ConversationResponse>>, ApiError> {
    let viewer = claims.sub;
    let conversations = state.db.call(move |db| db.conversations(viewer)).await?;

    Ok(Json(conversations.into_iter().map(ConversationResponse::from).collect()))
}
