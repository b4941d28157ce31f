//! Message History Handler

use axum::{
    extract::{Query, State},
    Json,
};

use crate::application::dto::HistoryQuery;
use crate::presentation::websocket::messages::ChatMessage;
use crate::shared::error::AppError;
use crate::startup::AppState;

/// Recent persisted messages, oldest first.
///
/// `limit` is capped at the configured history limit; `since` (RFC 3339)
/// restricts the result to messages created after it.
pub async fn get_messages(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<ChatMessage>>, AppError> {
    let limit = query.effective_limit(state.settings.chat.history_limit);

    let messages = state
        .messages
        .list_recent(limit, query.since)
        .await?
        .into_iter()
        .map(ChatMessage::from)
        .collect();

    Ok(Json(messages))
}
