//! Study artifacts derived from the corpus: flashcards (append-only
//! generations) and the per-conversation mind map (upsert on regenerate).
//! Generation is an LLM call, so it serializes through the arbiter like a
//! chat turn.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use chrono::Utc;

use crate::error::{Error, Result};
use crate::handlers::conversations::require_conversation;
use crate::middleware::auth::AuthenticatedUser;
use crate::models::conversation::{Conversation, LlmMode};
use crate::models::requests::GenerateArtifactRequest;
use crate::models::study::{Flashcard, MindMapResponse};
use crate::queries::{chunks, conversations, documents, study};
use crate::services::arbiter::LocalSlotGuard;
use crate::services::hierarchical::{self, SampledChunk};
use crate::state::AppState;
use crate::DbConn;

async fn load_corpus(conn: &mut DbConn, conversation_id: i64) -> Result<Vec<SampledChunk>> {
    let rows = chunks::list_chunks(conn, conversation_id, None).await?;
    Ok(rows
        .into_iter()
        .map(|row| SampledChunk {
            source: row
                .metadata
                .get("source")
                .and_then(|v| v.as_str())
                .unwrap_or("Unknown")
                .to_string(),
            content: row.content,
        })
        .collect())
}

async fn acquire_generation_locks(
    state: &AppState,
    conversation: &Conversation,
) -> Result<(crate::services::arbiter::ConversationGuard, Option<LocalSlotGuard>)> {
    let conversation_guard = state.arbiter.lock_conversation(conversation.id).await?;
    let local_guard = if conversation.llm_mode == LlmMode::Local {
        Some(state.arbiter.acquire_local_slot().await?)
    } else {
        None
    };
    Ok((conversation_guard, local_guard))
}

pub async fn list_flashcards(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(conversation_id): Path<i64>,
) -> Result<Json<Vec<Flashcard>>> {
    let mut conn = state.pool.acquire().await?;
    let conversation = require_conversation(&mut conn, conversation_id, user.id).await?;
    let cards = study::list_flashcards(&mut conn, conversation.id).await?;
    Ok(Json(cards))
}

/// `POST /conversations/{id}/flashcards/generate` — new generations append
/// to the existing set; prior fronts are passed as negative examples and
/// duplicates are dropped.
pub async fn generate_flashcards(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(conversation_id): Path<i64>,
    Json(req): Json<GenerateArtifactRequest>,
) -> Result<Json<Vec<Flashcard>>> {
    let mut conn = state.pool.acquire().await?;
    let conversation = require_conversation(&mut conn, conversation_id, user.id).await?;

    let corpus = load_corpus(&mut conn, conversation.id).await?;
    if corpus.is_empty() {
        return Err(Error::NoContent(
            "No documents found in this conversation to generate flashcards from".to_string(),
        ));
    }

    let existing_fronts = study::list_flashcard_fronts(&mut conn, conversation.id).await?;
    let existing_count = existing_fronts.len();
    drop(conn);

    let local = conversation.llm_mode == LlmMode::Local;
    let provider = state
        .llm
        .provider_for(conversation.llm_mode, req.cloud_model.as_deref());
    let target = state.config.ai.flashcard_target;
    let seed = Utc::now().timestamp_millis() as u64;

    let drafts = {
        let _guards = acquire_generation_locks(&state, &conversation).await?;
        hierarchical::generate_flashcards(&provider, &corpus, target, local, &existing_fronts, seed)
            .await?
    };

    let mut tx = state.pool.begin().await?;
    for (i, draft) in drafts.iter().enumerate() {
        study::insert_flashcard(
            tx.as_mut(),
            conversation.id,
            &draft.front,
            &draft.back,
            (existing_count + i) as i32,
        )
        .await?;
    }
    conversations::touch_conversation(tx.as_mut(), conversation.id).await?;
    tx.commit().await?;

    tracing::info!(
        conversation_id,
        generated = drafts.len(),
        total = existing_count + drafts.len(),
        "Flashcards generated"
    );

    let mut conn = state.pool.acquire().await?;
    let all = study::list_flashcards(&mut conn, conversation.id).await?;
    Ok(Json(all))
}

pub async fn delete_flashcard(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path((conversation_id, flashcard_id)): Path<(i64, i64)>,
) -> Result<StatusCode> {
    let mut conn = state.pool.acquire().await?;
    let conversation = require_conversation(&mut conn, conversation_id, user.id).await?;

    let removed = study::delete_flashcard(&mut conn, conversation.id, flashcard_id).await?;
    if removed == 0 {
        return Err(Error::NotFound("Flashcard not found".to_string()));
    }

    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_all_flashcards(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(conversation_id): Path<i64>,
) -> Result<StatusCode> {
    let mut conn = state.pool.acquire().await?;
    let conversation = require_conversation(&mut conn, conversation_id, user.id).await?;
    study::delete_all_flashcards(&mut conn, conversation.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_mindmap(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(conversation_id): Path<i64>,
) -> Result<Json<MindMapResponse>> {
    let mut conn = state.pool.acquire().await?;
    let conversation = require_conversation(&mut conn, conversation_id, user.id).await?;

    let row = study::get_mindmap(&mut conn, conversation.id)
        .await?
        .ok_or_else(|| Error::NotFound("Mind map not found".to_string()))?;

    let source_count = documents::list_active_document_ids(&mut conn, conversation.id)
        .await?
        .len() as i64;

    Ok(Json(MindMapResponse::from_row(row, source_count)))
}

/// `POST /conversations/{id}/mindmap/generate` — at most one mind map per
/// conversation; regeneration upserts in place.
pub async fn generate_mindmap(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(conversation_id): Path<i64>,
    Json(req): Json<GenerateArtifactRequest>,
) -> Result<Json<MindMapResponse>> {
    let mut conn = state.pool.acquire().await?;
    let conversation = require_conversation(&mut conn, conversation_id, user.id).await?;

    let corpus = load_corpus(&mut conn, conversation.id).await?;
    if corpus.is_empty() {
        return Err(Error::NoContent(
            "No documents found in this conversation to generate a mind map from".to_string(),
        ));
    }
    drop(conn);

    let local = conversation.llm_mode == LlmMode::Local;
    let provider = state
        .llm
        .provider_for(conversation.llm_mode, req.cloud_model.as_deref());
    let seed = Utc::now().timestamp_millis() as u64;

    let doc = {
        let _guards = acquire_generation_locks(&state, &conversation).await?;
        hierarchical::generate_mindmap(&provider, &corpus, local, seed).await?
    };

    let title = if doc.title.trim().is_empty() {
        conversation.title.clone()
    } else {
        doc.title.clone()
    };
    let nodes = serde_json::to_value(&doc.nodes)?;

    let mut tx = state.pool.begin().await?;
    let row = study::upsert_mindmap(tx.as_mut(), conversation.id, &title, &nodes).await?;
    conversations::touch_conversation(tx.as_mut(), conversation.id).await?;
    tx.commit().await?;

    let mut conn = state.pool.acquire().await?;
    let source_count = documents::list_active_document_ids(&mut conn, conversation.id)
        .await?
        .len() as i64;

    tracing::info!(
        conversation_id,
        nodes = doc.nodes.len(),
        "Mind map generated"
    );

    Ok(Json(MindMapResponse::from_row(row, source_count)))
}

pub async fn delete_mindmap(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(conversation_id): Path<i64>,
) -> Result<StatusCode> {
    let mut conn = state.pool.acquire().await?;
    let conversation = require_conversation(&mut conn, conversation_id, user.id).await?;
    study::delete_mindmap(&mut conn, conversation.id).await?;
    Ok(StatusCode::NO_CONTENT)
}
