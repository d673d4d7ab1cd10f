use std::convert::Infallible;

use axum::extract::{Path, State};
use axum::response::sse::{Event, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::Stream;
use serde::Deserialize;

use super::snapshot_events;
use crate::AppState;
use crate::auth::AuthenticatedUser;
use crate::db::models::{ConversationRow, MessageRow};
use crate::error::AppError;
use crate::market::chat;
use crate::types::{ConversationId, ListingId};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/conversation",
            get(list_conversations).post(open_conversation),
        )
        .route("/conversation/stream", get(stream_conversations))
        .route(
            "/conversation/{id}/message",
            get(list_messages).post(send_message),
        )
        .route("/conversation/{id}/stream", get(stream_messages))
        .route("/conversation/{id}/read", post(mark_read))
}

#[derive(Deserialize)]
struct OpenConversationBody {
    listing_id: String,
}

#[derive(Deserialize)]
struct SendMessageBody {
    #[serde(default)]
    text: String,
    #[serde(default)]
    image_url: Option<String>,
}

/// 出品者との会話を開く（既にあれば既存のものを返す）
async fn open_conversation(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    Json(body): Json<OpenConversationBody>,
) -> Result<Json<ConversationRow>, AppError> {
    let conversation =
        chat::get_or_create_conversation(&state, &auth, &ListingId(body.listing_id)).await?;
    Ok(Json(conversation))
}

async fn list_conversations(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
) -> Result<Json<Vec<ConversationRow>>, AppError> {
    Ok(Json(chat::list_conversations(&state, &auth.user_id).await?))
}

async fn stream_conversations(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    snapshot_events(chat::stream_conversations(&state, &auth.user_id))
}

async fn list_messages(
    State(state): State<AppState>,
    Path(id): Path<String>,
    auth: AuthenticatedUser,
) -> Result<Json<Vec<MessageRow>>, AppError> {
    let messages = chat::list_messages(&state, &auth.user_id, &ConversationId(id)).await?;
    Ok(Json(messages))
}

async fn send_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    auth: AuthenticatedUser,
    Json(body): Json<SendMessageBody>,
) -> Result<Json<MessageRow>, AppError> {
    let message = chat::send_message(
        &state,
        &auth,
        &ConversationId(id),
        &body.text,
        body.image_url.as_deref(),
    )
    .await?;
    Ok(Json(message))
}

async fn stream_messages(
    State(state): State<AppState>,
    Path(id): Path<String>,
    auth: AuthenticatedUser,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let sub = chat::stream_messages(&state, &auth.user_id, &ConversationId(id)).await?;
    Ok(snapshot_events(sub))
}

async fn mark_read(
    State(state): State<AppState>,
    Path(id): Path<String>,
    auth: AuthenticatedUser,
) -> Result<Json<serde_json::Value>, AppError> {
    let updated = chat::mark_read(&state, &auth.user_id, &ConversationId(id)).await?;
    Ok(Json(serde_json::json!({ "updated": updated })))
}
