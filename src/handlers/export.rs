use axum::extract::State;
use axum::http::{HeaderValue, header};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};

use crate::error::{Error, Result};
use crate::handlers::conversations::require_conversation;
use crate::middleware::auth::AuthenticatedUser;
use crate::models::requests::DownloadRequest;
use crate::queries::messages;
use crate::services::export::{ExportFormat, ExportMessage, safe_filename};
use crate::state::AppState;

/// `POST /download` — renders the non-archived transcript in the requested
/// format via the configured renderer.
pub async fn download_chat(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(req): Json<DownloadRequest>,
) -> Result<Response> {
    let format: ExportFormat = req.format.parse()?;

    let mut conn = state.pool.acquire().await?;
    let conversation = require_conversation(&mut conn, req.conversation_id, user.id).await?;

    let transcript: Vec<ExportMessage> = messages::list_messages(&mut conn, conversation.id)
        .await?
        .iter()
        .filter(|m| !m.is_archived)
        .map(ExportMessage::from)
        .collect();

    if transcript.is_empty() {
        return Err(Error::Validation("No chat history to download".to_string()));
    }

    let bytes = state
        .exporter
        .render(&conversation.title, &transcript, format)?;

    let filename = format!("{}.{}", safe_filename(&conversation.title), format.extension());
    let disposition = format!("attachment; filename=\"{filename}\"");

    let mut response = bytes.into_response();
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(format.content_type()),
    );
    response.headers_mut().insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&disposition)
            .map_err(|_| Error::Internal("invalid export filename".to_string()))?,
    );

    Ok(response)
}
