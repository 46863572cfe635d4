use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};

use crate::error::{Error, Result};
use crate::handlers::conversations::require_conversation;
use crate::middleware::auth::AuthenticatedUser;
use crate::models::message::MessageRole;
use crate::models::requests::{ChatRequest, EditMessageRequest, EditMessageResponse};
use crate::queries::messages;
use crate::services::{branch, orchestrator};
use crate::state::AppState;

/// `POST /messages/{id}` — edit a user message. A new sibling version is
/// created in the same edit group with the same parent; nothing is
/// archived, so every branch stays navigable. With `regenerate` set, a
/// fresh assistant reply is generated for the new version.
pub async fn edit_message(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(message_id): Path<i64>,
    Json(req): Json<EditMessageRequest>,
) -> Result<Json<EditMessageResponse>> {
    let mut conn = state.pool.acquire().await?;

    let message = messages::get_message(&mut conn, message_id)
        .await?
        .ok_or_else(|| Error::NotFound("Message not found".to_string()))?;

    let conversation = require_conversation(&mut conn, message.conversation_id, user.id)
        .await
        .map_err(|_| Error::Forbidden("Access denied".to_string()))?;

    if message.role != MessageRole::User {
        return Err(Error::Validation(
            "only user messages can be edited".to_string(),
        ));
    }

    // The first version's id anchors the group.
    let group_id = match message.edit_group_id {
        Some(group) if group != message.id => group,
        _ => message.id,
    };

    if req.regenerate {
        drop(conn);
        let chat_request = ChatRequest {
            message: req.content.clone(),
            conversation_id: conversation.id,
            regenerate: false,
            edit_group_id: Some(group_id),
            is_edit: true,
            cloud_model: req.cloud_model.clone(),
            parent_message_id: None,
        };
        let outcome = orchestrator::run_chat(&state, user.id, &chat_request).await?;

        let mut conn = state.pool.acquire().await?;
        let versions =
            branch::response_variants_for_user(&mut conn, &outcome.user_message).await?;

        return Ok(Json(EditMessageResponse {
            message: "Message updated successfully".to_string(),
            updated_message: branch::message_view(&outcome.user_message, Some(versions)),
            regenerated_response: Some(branch::message_view(&outcome.assistant_message, None)),
        }));
    }

    drop(conn);
    let mut tx = state.pool.begin().await?;
    let version = branch::next_version_index(tx.as_mut(), conversation.id, group_id).await?;
    let new_message = branch::append_user_message(
        tx.as_mut(),
        conversation.id,
        &req.content,
        message.reply_to_message_id,
        Some(group_id),
        version,
    )
    .await?;
    crate::queries::conversations::touch_conversation(tx.as_mut(), conversation.id).await?;
    tx.commit().await?;

    Ok(Json(EditMessageResponse {
        message: "Message updated successfully".to_string(),
        updated_message: branch::message_view(&new_message, None),
        regenerated_response: None,
    }))
}

/// `DELETE /messages/{id}`
pub async fn delete_message(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(message_id): Path<i64>,
) -> Result<StatusCode> {
    let mut conn = state.pool.acquire().await?;

    let message = messages::get_message(&mut conn, message_id)
        .await?
        .ok_or_else(|| Error::NotFound("Message not found".to_string()))?;

    require_conversation(&mut conn, message.conversation_id, user.id)
        .await
        .map_err(|_| Error::Forbidden("Access denied".to_string()))?;

    messages::delete_message(&mut conn, message.id).await?;

    Ok(StatusCode::NO_CONTENT)
}
