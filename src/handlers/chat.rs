use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use futures::StreamExt;
use std::convert::Infallible;

use crate::error::{Error, Result};
use crate::middleware::auth::AuthenticatedUser;
use crate::models::requests::{ChatRequest, ChatResponse};
use crate::services::{branch, orchestrator};
use crate::state::AppState;

/// Non-streaming chat turn: the full response body carries what the meta
/// and done frames would have carried.
pub async fn chat(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>> {
    tracing::info!(
        conversation_id = req.conversation_id,
        user_id = user.id,
        regenerate = req.regenerate,
        is_edit = req.is_edit,
        "Chat turn requested"
    );

    let outcome = orchestrator::run_chat(&state, user.id, &req).await?;

    let mut conn = state.pool.acquire().await.map_err(Error::Sqlx)?;
    let response_versions =
        branch::response_variants_for_user(&mut conn, &outcome.user_message).await?;

    let user_view = branch::message_view(&outcome.user_message, Some(response_versions.clone()));
    let assistant_view = branch::message_view(&outcome.assistant_message, None);

    Ok(Json(ChatResponse {
        response: outcome.assistant_message.content.clone(),
        sources: outcome.sources,
        source_chunks: outcome.source_chunks,
        user_message: Some(user_view),
        assistant_message: assistant_view,
        response_versions: Some(response_versions),
    }))
}

/// Streaming chat turn over Server-Sent Events. Validation errors (missing
/// conversation, invalid parent, parent required) surface as HTTP errors
/// before the stream opens; everything afterwards arrives as frames.
pub async fn chat_stream(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(req): Json<ChatRequest>,
) -> Result<Response> {
    tracing::info!(
        conversation_id = req.conversation_id,
        user_id = user.id,
        "Streaming chat turn requested"
    );

    let prepared = orchestrator::prepare_turn(&state, user.id, &req).await?;
    let frames = orchestrator::stream_turn(state, prepared);

    let events = frames.map(|frame| {
        let data = serde_json::to_string(&frame).unwrap_or_else(|e| {
            tracing::error!(error = %e, "Failed to serialize SSE frame");
            "{\"type\":\"error\",\"message\":\"serialization failure\"}".to_string()
        });
        Ok::<_, Infallible>(Event::default().data(data))
    });

    let mut response = Sse::new(events)
        .keep_alive(KeepAlive::default())
        .into_response();
    let headers = response.headers_mut();
    headers.insert("Cache-Control", http::HeaderValue::from_static("no-cache"));
    headers.insert("X-Accel-Buffering", http::HeaderValue::from_static("no"));

    Ok(response)
}
