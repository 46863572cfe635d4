//! Upload pipeline: decoded bytes become document rows, overlapping
//! chunks, and dense vectors in one transaction. A failure anywhere rolls
//! the transaction back and clears the conversation's vectors so no
//! orphans survive.

use std::collections::HashMap;

use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use indexmap::IndexMap;

use crate::error::{Error, Result};
use crate::middleware::auth::AuthenticatedUser;
use crate::models::conversation::LlmMode;
use crate::models::document::DocumentKind;
use crate::models::requests::UploadResponse;
use crate::queries::{chunks, conversations, documents};
use crate::services::chunker::Chunker;
use crate::services::decoder::source_base;
use crate::services::embedder::embed_batch_blocking;
use crate::services::vector_store;
use crate::state::AppState;
use crate::DbConn;

/// Multipart fields accepted by the upload endpoints.
struct UploadForm {
    files: Vec<(String, Vec<u8>)>,
    title: Option<String>,
    llm_mode: Option<String>,
    embedding_profile: Option<String>,
}

async fn read_multipart(multipart: &mut Multipart) -> Result<UploadForm> {
    let mut form = UploadForm {
        files: Vec::new(),
        title: None,
        llm_mode: None,
        embedding_profile: None,
    };

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::Validation(format!("malformed multipart body: {e}")))?
    {
        let name = field.name().map(|n| n.to_string());
        match name.as_deref() {
            Some("files") => {
                let filename = field
                    .file_name()
                    .map(|f| f.to_string())
                    .ok_or_else(|| Error::Validation("file field without filename".to_string()))?;
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| Error::Validation(format!("failed to read {filename}: {e}")))?;
                form.files.push((filename, bytes.to_vec()));
            }
            Some("title") => {
                form.title = Some(read_text_field(field).await?);
            }
            Some("llm_mode") => {
                form.llm_mode = Some(read_text_field(field).await?);
            }
            Some("embedding_model") => {
                form.embedding_profile = Some(read_text_field(field).await?);
            }
            _ => {}
        }
    }

    Ok(form)
}

async fn read_text_field(field: axum::extract::multipart::Field<'_>) -> Result<String> {
    field
        .text()
        .await
        .map_err(|e| Error::Validation(format!("malformed form field: {e}")))
}

/// Decoded text per source tag, collected across all uploaded files.
struct DecodedUpload {
    sources: IndexMap<String, String>,
    processed_files: Vec<String>,
    file_contents: HashMap<String, String>,
}

/// Decodes every file, collecting per-file failures. Only fails the whole
/// request when nothing at all could be decoded.
fn decode_files(state: &AppState, files: &[(String, Vec<u8>)]) -> Result<DecodedUpload> {
    let max_size = state.config.upload.max_file_size_bytes;
    let mut decoded = DecodedUpload {
        sources: IndexMap::new(),
        processed_files: Vec::new(),
        file_contents: HashMap::new(),
    };
    let mut errors: Vec<String> = Vec::new();
    let mut size_rejections = 0usize;

    for (filename, bytes) in files {
        if bytes.len() > max_size {
            size_rejections += 1;
            errors.push(format!(
                "File {filename} too large (max: {}MB)",
                max_size / 1024 / 1024
            ));
            continue;
        }
        match state.decoder.decode(bytes, filename) {
            Ok(map) => {
                decoded
                    .file_contents
                    .insert(filename.clone(), map.values().cloned().collect::<Vec<_>>().join("\n\n"));
                decoded.sources.extend(map);
                decoded.processed_files.push(filename.clone());
            }
            Err(e) => errors.push(format!("Error processing {filename}: {e}")),
        }
    }

    if decoded.sources.is_empty() {
        if errors.is_empty() {
            return Err(Error::NoContent("No text extracted from files".to_string()));
        }
        if size_rejections == errors.len() {
            return Err(Error::TooLarge(errors.join("; ")));
        }
        return Err(Error::NoContent(errors.join("; ")));
    }

    for error in errors {
        tracing::warn!(error, "Upload file skipped");
    }

    Ok(decoded)
}

/// Maps decoder source tags to document ids: exact filename, page-suffix
/// base, then unambiguous filename stem. An unmapped source is a pipeline
/// fault, not a silent orphan.
fn map_sources_to_documents(
    sources: &IndexMap<String, String>,
    document_ids: &IndexMap<String, i64>,
) -> Result<HashMap<String, i64>> {
    let mut stem_to_doc: HashMap<String, Option<i64>> = HashMap::new();
    for (filename, &doc_id) in document_ids {
        let stem = filename
            .rsplit_once('.')
            .map(|(stem, _)| stem)
            .unwrap_or(filename);
        stem_to_doc
            .entry(stem.to_string())
            .and_modify(|existing| {
                if *existing != Some(doc_id) {
                    *existing = None; // Ambiguous
                }
            })
            .or_insert(Some(doc_id));
    }

    let mut mapping = HashMap::new();
    for source in sources.keys() {
        if let Some(&doc_id) = document_ids.get(source) {
            mapping.insert(source.clone(), doc_id);
            continue;
        }
        let base = source_base(source);
        if let Some(&doc_id) = document_ids.get(base) {
            mapping.insert(source.clone(), doc_id);
            continue;
        }
        let stem = base.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(base);
        if let Some(Some(doc_id)) = stem_to_doc.get(stem) {
            mapping.insert(source.clone(), *doc_id);
            continue;
        }
        return Err(Error::Internal(format!(
            "unmapped source '{source}' could not be matched to any document"
        )));
    }

    Ok(mapping)
}

/// Creates document rows and indexes every decoded source as chunk rows
/// plus vectors, all on the caller's transaction.
async fn ingest_decoded(
    conn: &mut DbConn,
    state: &AppState,
    conversation_id: i64,
    embedding_profile: &str,
    decoded: &DecodedUpload,
) -> Result<usize> {
    let mut unique_files: Vec<String> = Vec::new();
    for filename in &decoded.processed_files {
        if !unique_files.contains(filename) {
            unique_files.push(filename.clone());
        }
    }

    let mut document_ids: IndexMap<String, i64> = IndexMap::new();
    for filename in &unique_files {
        let document = documents::insert_document(
            conn,
            conversation_id,
            filename,
            decoded.file_contents.get(filename).map(|s| s.as_str()),
            DocumentKind::File,
        )
        .await?;
        document_ids.insert(filename.clone(), document.id);
    }

    let source_to_doc = map_sources_to_documents(&decoded.sources, &document_ids)?;

    let chunker = Chunker::new(
        state.config.retrieval.chunk_size,
        state.config.retrieval.chunk_overlap,
    );
    let embedder = state.embedders.get(embedding_profile);

    let mut total_chunks = 0usize;
    for (source, text) in &decoded.sources {
        let document_id = source_to_doc[source];
        let text_chunks = chunker.chunk_source(source, text);
        if text_chunks.is_empty() {
            continue;
        }

        for chunk in &text_chunks {
            let mut metadata = serde_json::to_value(&chunk.metadata)?;
            metadata["type"] = serde_json::Value::String("document".to_string());
            chunks::insert_chunk(
                conn,
                conversation_id,
                document_id,
                chunk.metadata.chunk_index as i32,
                &chunk.content,
                &metadata,
            )
            .await?;
        }

        let contents: Vec<String> = text_chunks.iter().map(|c| c.content.clone()).collect();
        let embeddings = embed_batch_blocking(embedder.clone(), contents).await?;
        vector_store::index_chunks(conn, conversation_id, document_id, &text_chunks, embeddings)
            .await?;
        total_chunks += text_chunks.len();
    }

    Ok(total_chunks)
}

/// `POST /upload` — decode files, create a conversation, and index its
/// first corpus.
pub async fn upload(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>)> {
    let form = read_multipart(&mut multipart).await?;

    let llm_mode: LlmMode = form
        .llm_mode
        .as_deref()
        .unwrap_or("cloud")
        .parse()
        .map_err(|_| Error::Validation("Invalid llm_mode. Use 'cloud' or 'local'.".to_string()))?;

    let embedding_profile = form
        .embedding_profile
        .unwrap_or_else(|| state.config.ai.default_embedding_profile.clone())
        .to_lowercase();
    if !matches!(embedding_profile.as_str(), "custom" | "allminilm") {
        return Err(Error::Validation(
            "Invalid embedding_model. Use 'custom' or 'allminilm'.".to_string(),
        ));
    }

    let decoded = decode_files(&state, &form.files)?;

    let title = form
        .title
        .filter(|t| !t.trim().is_empty())
        .or_else(|| decoded.processed_files.first().cloned())
        .unwrap_or_else(|| "Untitled Conversation".to_string());

    let mut tx = state.pool.begin().await?;
    let conversation = conversations::insert_conversation(
        tx.as_mut(),
        user.id,
        &title,
        llm_mode,
        &embedding_profile,
    )
    .await?;

    match ingest_decoded(tx.as_mut(), &state, conversation.id, &embedding_profile, &decoded).await {
        Ok(chunk_count) => {
            tx.commit().await?;
            tracing::info!(
                conversation_id = conversation.id,
                files = decoded.processed_files.len(),
                chunks = chunk_count,
                "Upload indexed"
            );
            Ok((
                StatusCode::CREATED,
                Json(UploadResponse {
                    message: "Files processed successfully".to_string(),
                    conversation_id: conversation.id,
                    processed_files: decoded.processed_files,
                    llm_mode,
                    embedding_profile,
                }),
            ))
        }
        Err(error) => {
            drop(tx);
            cleanup_vectors(&state, conversation.id).await;
            Err(error)
        }
    }
}

/// `POST /conversations/{id}/documents` — add documents to an existing
/// conversation.
pub async fn add_documents(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(conversation_id): Path<i64>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>> {
    let form = read_multipart(&mut multipart).await?;

    let mut conn = state.pool.acquire().await?;
    let conversation =
        conversations::get_conversation_for_user(&mut conn, conversation_id, user.id)
            .await?
            .ok_or_else(|| Error::NotFound("Conversation not found".to_string()))?;
    drop(conn);

    let decoded = decode_files(&state, &form.files)?;

    let mut tx = state.pool.begin().await?;
    let ingested = ingest_decoded(
        tx.as_mut(),
        &state,
        conversation.id,
        &conversation.embedding_profile,
        &decoded,
    )
    .await;

    match ingested {
        Ok(chunk_count) => {
            conversations::touch_conversation(tx.as_mut(), conversation.id).await?;
            tx.commit().await?;
            tracing::info!(
                conversation_id = conversation.id,
                files = decoded.processed_files.len(),
                chunks = chunk_count,
                "Documents added"
            );
            Ok(Json(UploadResponse {
                message: format!(
                    "Added {} document(s) to conversation",
                    decoded.processed_files.len()
                ),
                conversation_id: conversation.id,
                processed_files: decoded.processed_files,
                llm_mode: conversation.llm_mode,
                embedding_profile: conversation.embedding_profile,
            }))
        }
        Err(error) => {
            drop(tx);
            cleanup_vectors(&state, conversation.id).await;
            Err(error)
        }
    }
}

/// Best-effort vector cleanup after a failed ingest, so no orphan vectors
/// outlive the rolled-back rows.
async fn cleanup_vectors(state: &AppState, conversation_id: i64) {
    match state.pool.acquire().await {
        Ok(mut conn) => {
            if let Err(error) = vector_store::delete_by_conversation(&mut conn, conversation_id).await
            {
                tracing::error!(
                    conversation_id,
                    error = %error,
                    "Failed to clean up vectors after ingest failure"
                );
            }
        }
        Err(error) => {
            tracing::error!(
                conversation_id,
                error = %error,
                "Could not acquire connection for vector cleanup"
            );
        }
    }
}
