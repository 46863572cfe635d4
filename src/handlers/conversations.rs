use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};

use crate::error::{Error, Result};
use crate::middleware::auth::AuthenticatedUser;
use crate::models::conversation::{Conversation, ConversationSummary};
use crate::models::document::{Document, DocumentKind, DocumentView};
use crate::models::requests::{
    ConversationDetailResponse, DocumentToggle, NoteCreate, NoteUpdate,
};
use crate::queries::{chunks, conversations, documents, messages};
use crate::services::chunker::Chunker;
use crate::services::embedder::embed_batch_blocking;
use crate::services::{branch, vector_store};
use crate::state::AppState;
use crate::DbConn;

/// Loads a conversation scoped to the caller or fails `NotFound`.
pub async fn require_conversation(
    conn: &mut DbConn,
    conversation_id: i64,
    user_id: i64,
) -> Result<Conversation> {
    conversations::get_conversation_for_user(conn, conversation_id, user_id)
        .await?
        .ok_or_else(|| Error::NotFound("Conversation not found".to_string()))
}

pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<Vec<ConversationSummary>>> {
    let mut conn = state.pool.acquire().await?;
    let rows = conversations::list_conversations(&mut conn, user.id).await?;

    let mut summaries = Vec::with_capacity(rows.len());
    for conversation in rows {
        let last_message = messages::latest_message(&mut conn, conversation.id)
            .await?
            .map(|m| m.content);
        summaries.push(ConversationSummary::from_conversation(
            conversation,
            last_message,
        ));
    }

    Ok(Json(summaries))
}

pub async fn get_conversation(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(conversation_id): Path<i64>,
) -> Result<Json<ConversationDetailResponse>> {
    let mut conn = state.pool.acquire().await?;
    let conversation = require_conversation(&mut conn, conversation_id, user.id).await?;

    let message_views = branch::list_active_branch(&mut conn, conversation.id).await?;
    let last_message = message_views.last().map(|m| m.content.clone());

    let docs = documents::list_documents(&mut conn, conversation.id).await?;
    let mut document_views = Vec::with_capacity(docs.len());
    for document in docs {
        let has_embeddings = chunks::document_has_chunks(&mut conn, document.id).await?;
        document_views.push(document_view(document, has_embeddings));
    }

    Ok(Json(ConversationDetailResponse {
        conversation: ConversationSummary::from_conversation(conversation, last_message),
        messages: message_views,
        documents: document_views,
    }))
}

pub async fn delete_conversation(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(conversation_id): Path<i64>,
) -> Result<StatusCode> {
    let mut conn = state.pool.acquire().await?;
    let conversation = require_conversation(&mut conn, conversation_id, user.id).await?;

    let removed = vector_store::delete_by_conversation(&mut conn, conversation.id).await?;
    conversations::delete_conversation(&mut conn, conversation.id).await?;
    tracing::info!(
        conversation_id,
        vectors_removed = removed,
        "Conversation deleted"
    );

    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_document(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path((conversation_id, document_id)): Path<(i64, i64)>,
) -> Result<StatusCode> {
    let mut conn = state.pool.acquire().await?;
    let conversation = require_conversation(&mut conn, conversation_id, user.id).await?;

    let document = documents::get_document(&mut conn, conversation.id, document_id)
        .await?
        .ok_or_else(|| Error::NotFound("Document not found".to_string()))?;

    chunks::delete_chunks_by_document(&mut conn, document.id).await?;
    vector_store::delete_by_document(&mut conn, conversation.id, document.id).await?;
    documents::delete_document(&mut conn, document.id).await?;

    Ok(StatusCode::NO_CONTENT)
}

/// Flips a document in or out of retrieval; its chunks stay indexed.
pub async fn toggle_document(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path((conversation_id, document_id)): Path<(i64, i64)>,
    Json(toggle): Json<DocumentToggle>,
) -> Result<Json<serde_json::Value>> {
    let mut conn = state.pool.acquire().await?;
    let conversation = require_conversation(&mut conn, conversation_id, user.id).await?;

    let document =
        documents::set_document_active(&mut conn, conversation.id, document_id, toggle.is_active)
            .await?
            .ok_or_else(|| Error::NotFound("Document not found".to_string()))?;

    Ok(Json(serde_json::json!({
        "id": document.id,
        "isActive": document.is_active,
    })))
}

pub async fn create_note(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(conversation_id): Path<i64>,
    Json(note): Json<NoteCreate>,
) -> Result<(StatusCode, Json<DocumentView>)> {
    let mut conn = state.pool.acquire().await?;
    let conversation = require_conversation(&mut conn, conversation_id, user.id).await?;

    let document = documents::insert_document(
        &mut conn,
        conversation.id,
        &note.title,
        Some(&note.content),
        DocumentKind::Note,
    )
    .await?;

    Ok((StatusCode::CREATED, Json(document_view(document, false))))
}

pub async fn update_note(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path((conversation_id, note_id)): Path<(i64, i64)>,
    Json(note): Json<NoteUpdate>,
) -> Result<Json<DocumentView>> {
    let mut conn = state.pool.acquire().await?;
    let conversation = require_conversation(&mut conn, conversation_id, user.id).await?;

    let document = documents::update_note(
        &mut conn,
        conversation.id,
        note_id,
        note.title.as_deref(),
        note.content.as_deref(),
    )
    .await?
    .ok_or_else(|| Error::NotFound("Note not found".to_string()))?;

    let has_embeddings = chunks::document_has_chunks(&mut conn, document.id).await?;
    Ok(Json(document_view(document, has_embeddings)))
}

/// Converts a note into a searchable source by chunking and indexing its
/// content; re-converting replaces the previous chunks.
pub async fn convert_note(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path((conversation_id, note_id)): Path<(i64, i64)>,
) -> Result<Json<DocumentView>> {
    let mut conn = state.pool.acquire().await?;
    let conversation = require_conversation(&mut conn, conversation_id, user.id).await?;

    let note = documents::get_document_of_kind(
        &mut conn,
        conversation.id,
        note_id,
        DocumentKind::Note,
    )
    .await?
    .ok_or_else(|| Error::NotFound(format!("Note with id {note_id} not found")))?;

    let content = note
        .content
        .clone()
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| Error::NoContent("Note has no content to convert".to_string()))?;

    let chunker = Chunker::new(
        state.config.retrieval.chunk_size,
        state.config.retrieval.chunk_overlap,
    );
    let text_chunks = chunker.chunk_source(&note.filename, &content);
    if text_chunks.is_empty() {
        return Err(Error::NoContent(
            "Could not create chunks from note content".to_string(),
        ));
    }

    let embedder = state.embedders.get(&conversation.embedding_profile);
    let contents: Vec<String> = text_chunks.iter().map(|c| c.content.clone()).collect();
    let embeddings = embed_batch_blocking(embedder, contents).await?;

    let mut tx = state.pool.begin().await?;
    chunks::delete_chunks_by_document(tx.as_mut(), note.id).await?;
    vector_store::delete_by_document(tx.as_mut(), conversation.id, note.id).await?;

    for chunk in &text_chunks {
        let mut metadata = serde_json::to_value(&chunk.metadata)?;
        metadata["type"] = serde_json::Value::String("note".to_string());
        chunks::insert_chunk(
            tx.as_mut(),
            conversation.id,
            note.id,
            chunk.metadata.chunk_index as i32,
            &chunk.content,
            &metadata,
        )
        .await?;
    }
    vector_store::index_chunks(tx.as_mut(), conversation.id, note.id, &text_chunks, embeddings)
        .await?;
    conversations::touch_conversation(tx.as_mut(), conversation.id).await?;
    tx.commit().await?;

    tracing::info!(
        conversation_id,
        note_id,
        chunks = text_chunks.len(),
        "Note converted to source"
    );

    Ok(Json(document_view(note, true)))
}

fn document_view(document: Document, has_embeddings: bool) -> DocumentView {
    DocumentView {
        id: document.id,
        filename: document.filename,
        content: document.content,
        doc_kind: document.doc_kind,
        is_active: document.is_active,
        has_embeddings,
        uploaded_at: document.uploaded_at,
    }
}
