//! End-to-end chat turn pipeline: validate conversation, resolve parent,
//! persist the user message, build branch history, retrieve context,
//! serialize through the arbiter, call the provider, persist the assistant
//! reply, and (for streaming requests) drive the SSE frames.
//!
//! The user message is persisted before any lock is taken, so a failed
//! generation still leaves a coherent pair: the failure is recorded as an
//! assistant reply with `[Error: …]` content instead of an orphaned user
//! message.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::{
    error::{Error, Result},
    models::conversation::{Conversation, LlmMode},
    models::message::{BranchMessage, ChatMessage, MessageRole, SourceChunk},
    models::requests::ChatRequest,
    models::sse::SseFrame,
    queries::{chunks, conversations, documents, messages},
    services::branch::{self, TurnKind},
    services::hierarchical::{self, SampledChunk},
    services::llm::{ContextDoc, LlmProvider, extract_sources, sanitize},
    services::retriever::{HybridRetriever, RetrievalParams, is_summary_intent},
    state::AppState,
};

/// Capacity of the frame channel between the turn task and the SSE writer.
const FRAME_CHANNEL_CAPACITY: usize = 32;

/// Marker appended when a stream dies before the provider finishes.
const INTERRUPTED_MARKER: &str = "[Error: response interrupted]";

/// How the response text is produced for this turn.
enum GenerationPlan {
    /// Hybrid retrieval feeding a single provider call
    Retrieval {
        context_docs: Vec<ContextDoc>,
        recent: Vec<BranchMessage>,
        aux: String,
    },
    /// Stratified batch-then-merge summarization over the whole corpus
    HierarchicalSummary { chunks: Vec<SampledChunk> },
}

/// Everything resolved and persisted before locks are acquired.
pub struct PreparedTurn {
    conversation: Conversation,
    user_message: ChatMessage,
    provider: Arc<dyn LlmProvider>,
    plan: GenerationPlan,
    query: String,
    sources: Vec<String>,
    source_chunks: Vec<SourceChunk>,
}

/// A completed turn with both rows persisted.
pub struct TurnOutcome {
    pub conversation: Conversation,
    pub user_message: ChatMessage,
    pub assistant_message: ChatMessage,
    pub sources: Vec<String>,
    pub source_chunks: Vec<SourceChunk>,
}

enum StreamEnd {
    /// Generation ran to completion (text is unsanitized accumulation)
    Completed(String),
    /// Client went away mid-stream; holds whatever accumulated
    Disconnected(String),
}

/// Validation, parent resolution, user-message persistence, history walk,
/// and retrieval. Everything that should surface as an HTTP error (404,
/// 400 InvalidParent/ParentRequired) happens here, before any SSE stream
/// starts or any lock is taken.
pub async fn prepare_turn(
    state: &AppState,
    user_id: i64,
    req: &ChatRequest,
) -> Result<PreparedTurn> {
    let mut conn = state.pool.acquire().await?;

    let conversation =
        conversations::get_conversation_for_user(&mut conn, req.conversation_id, user_id)
            .await?
            .ok_or_else(|| Error::NotFound("Conversation not found".to_string()))?;

    let resolution = branch::resolve_parent(&mut conn, conversation.id, req).await?;

    let user_message = match resolution.kind {
        TurnKind::Regenerate => {
            messages::latest_message_of_role(&mut conn, conversation.id, MessageRole::User)
                .await?
                .ok_or_else(|| {
                    Error::InvalidParent("no user message to regenerate from".to_string())
                })?
        }
        TurnKind::Edit => {
            let group_id = req.edit_group_id.ok_or_else(|| {
                Error::InvalidParent("edit requests must carry an edit group id".to_string())
            })?;
            let version = branch::next_version_index(&mut conn, conversation.id, group_id).await?;
            branch::append_user_message(
                &mut conn,
                conversation.id,
                &req.message,
                resolution.parent_id,
                Some(group_id),
                version,
            )
            .await?
        }
        TurnKind::Explicit | TurnKind::FirstTurn => {
            branch::append_user_message(
                &mut conn,
                conversation.id,
                &req.message,
                resolution.parent_id,
                None,
                1,
            )
            .await?
        }
        TurnKind::Rejected => return Err(Error::ParentRequired),
    };

    let history = branch::build_branch_history(
        &mut conn,
        conversation.id,
        resolution.parent_id,
        state.config.retrieval.max_history_messages,
    )
    .await?;

    let summary_intent = is_summary_intent(&req.message);
    let provider = state
        .llm
        .provider_for(conversation.llm_mode, req.cloud_model.as_deref());

    // A summary request over a corpus that exceeds the provider budget
    // routes to hierarchical processing instead of plain retrieval.
    if summary_intent {
        let active_ids = documents::list_active_document_ids(&mut conn, conversation.id).await?;
        if !active_ids.is_empty() {
            let total_bytes =
                chunks::total_chunk_bytes(&mut conn, conversation.id, Some(active_ids.as_slice()))
                    .await?;
            let budget = state.llm.context_budget_bytes(conversation.llm_mode);
            if total_bytes as usize > budget {
                let rows =
                    chunks::list_chunks(&mut conn, conversation.id, Some(active_ids.as_slice()))
                        .await?;
                let sampled: Vec<SampledChunk> = rows
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
                    .collect();
                let sources = {
                    let mut seen = std::collections::HashSet::new();
                    sampled
                        .iter()
                        .filter(|c| seen.insert(c.source.clone()))
                        .map(|c| c.source.clone())
                        .collect()
                };
                return Ok(PreparedTurn {
                    conversation,
                    user_message,
                    provider,
                    plan: GenerationPlan::HierarchicalSummary { chunks: sampled },
                    query: req.message.clone(),
                    sources,
                    source_chunks: Vec::new(),
                });
            }
        }
    }

    let params = RetrievalParams::resolve(
        &state.config.retrieval,
        conversation.llm_mode,
        summary_intent,
    );
    let retriever = HybridRetriever::new(
        state.embedders.get(&conversation.embedding_profile),
        state.config.retrieval.clone(),
    );
    let context = retriever
        .build_context(&mut conn, conversation.id, &req.message, &history, &params)
        .await?;

    let context_docs: Vec<ContextDoc> =
        context.document_chunks.iter().map(ContextDoc::from).collect();
    let sources = extract_sources(&context_docs);
    let source_chunks = crate::services::llm::extract_source_chunks(&context_docs);

    Ok(PreparedTurn {
        conversation,
        user_message,
        provider,
        plan: GenerationPlan::Retrieval {
            context_docs,
            recent: context.recent_context,
            aux: context.combined_context,
        },
        query: req.message.clone(),
        sources,
        source_chunks,
    })
}

/// Runs a prepared turn to completion, persisting the assistant reply.
/// With a frame sink this drives the full streaming protocol (meta,
/// tokens, done); without one it is the non-streaming `/chat` body.
pub async fn execute_turn(
    state: &AppState,
    prepared: PreparedTurn,
    sink: Option<&mpsc::Sender<SseFrame>>,
) -> Result<TurnOutcome> {
    let PreparedTurn {
        conversation,
        user_message,
        provider,
        plan,
        query,
        sources,
        source_chunks,
    } = prepared;
    let local = conversation.llm_mode == LlmMode::Local;

    let end = {
        let _conversation_guard = state.arbiter.lock_conversation(conversation.id).await?;
        let _local_guard = if local {
            Some(state.arbiter.acquire_local_slot().await?)
        } else {
            None
        };

        if let Some(tx) = sink {
            let meta = SseFrame::Meta {
                sources: sources.clone(),
                source_chunks: source_chunks.clone(),
                user_message_id: Some(user_message.id),
                edit_group_id: user_message.edit_group_id,
            };
            if tx.send(meta).await.is_err() {
                tracing::debug!(
                    conversation_id = conversation.id,
                    "Client disconnected before meta frame"
                );
                return Err(Error::Internal("client disconnected".to_string()));
            }
        }

        generate(&provider, &plan, &query, local, user_message.id as u64, sink).await?
        // Guards drop here: locks release before persistence.
    };

    let (raw_text, interrupted) = match end {
        StreamEnd::Completed(text) => (text, false),
        StreamEnd::Disconnected(text) => (text, true),
    };

    let mut final_text = if local {
        sanitize::clean_response(&raw_text)
    } else {
        raw_text
    };
    if interrupted {
        if !final_text.is_empty() {
            final_text.push_str("\n\n");
        }
        final_text.push_str(INTERRUPTED_MARKER);
    }

    let assistant_message = persist_assistant(
        state,
        conversation.id,
        user_message.id,
        &final_text,
        &sources,
        &source_chunks,
        &query,
    )
    .await?;

    if let Some(tx) = sink {
        let _ = tx
            .send(SseFrame::Done {
                assistant_message_id: assistant_message.id,
                full_response: assistant_message.content.clone(),
                error: None,
            })
            .await;
    }

    Ok(TurnOutcome {
        conversation,
        user_message,
        assistant_message,
        sources,
        source_chunks,
    })
}

/// Non-streaming chat turn.
pub async fn run_chat(state: &AppState, user_id: i64, req: &ChatRequest) -> Result<TurnOutcome> {
    let prepared = prepare_turn(state, user_id, req).await?;
    execute_turn(state, prepared, None).await
}

/// Streaming chat turn. `prepare_turn` must have succeeded already so
/// validation failures surface as HTTP errors; everything after becomes
/// SSE frames, including failures.
pub fn stream_turn(state: AppState, prepared: PreparedTurn) -> ReceiverStream<SseFrame> {
    let (tx, rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);

    tokio::spawn(async move {
        let conversation_id = prepared.conversation.id;
        let user_message = prepared.user_message.clone();
        let query = prepared.query.clone();

        if let Err(error) = execute_turn(&state, prepared, Some(&tx)).await {
            tracing::warn!(
                conversation_id,
                error = %error,
                "Chat turn failed; recording error reply"
            );
            let content = format!("[Error: {error}]");
            let persisted = persist_assistant(
                &state,
                conversation_id,
                user_message.id,
                &content,
                &[],
                &[],
                &query,
            )
            .await;
            if let Err(persist_error) = &persisted {
                tracing::error!(
                    conversation_id,
                    error = %persist_error,
                    "Failed to record error reply"
                );
            }

            let _ = tx
                .send(SseFrame::Error {
                    message: error.to_string(),
                })
                .await;
            if let Ok(assistant) = persisted {
                let _ = tx
                    .send(SseFrame::Done {
                        assistant_message_id: assistant.id,
                        full_response: assistant.content,
                        error: Some(true),
                    })
                    .await;
            }
        }
    });

    ReceiverStream::new(rx)
}

async fn generate(
    provider: &Arc<dyn LlmProvider>,
    plan: &GenerationPlan,
    query: &str,
    local: bool,
    seed: u64,
    sink: Option<&mpsc::Sender<SseFrame>>,
) -> Result<StreamEnd> {
    match plan {
        GenerationPlan::HierarchicalSummary { chunks } => {
            let text = hierarchical::summarize(provider, chunks, local, seed).await?;
            Ok(emit_simulated(sink, text).await)
        }
        GenerationPlan::Retrieval {
            context_docs,
            recent,
            aux,
        } => {
            if let Some(tx) = sink
                && provider.supports_streaming()
            {
                let mut receiver = provider
                    .generate_stream(query, context_docs, recent, aux)
                    .await?;

                let mut accumulated = String::new();
                while let Some(item) = receiver.recv().await {
                    let token = item?;
                    let token = if local {
                        sanitize::clean_token(&token)
                    } else {
                        token
                    };
                    if token.is_empty() {
                        continue;
                    }
                    accumulated.push_str(&token);
                    if tx.send(SseFrame::Token { content: token }).await.is_err() {
                        tracing::debug!("Client disconnected mid-stream");
                        return Ok(StreamEnd::Disconnected(accumulated));
                    }
                }
                Ok(StreamEnd::Completed(accumulated))
            } else {
                let output = provider.generate(query, context_docs, recent, aux).await?;
                Ok(emit_simulated(sink, output.response).await)
            }
        }
    }
}

/// Streams an already-complete response as whitespace-delimited token
/// frames. The text is fully generated, so a dropped client only cuts
/// frame delivery, never the persisted content.
async fn emit_simulated(sink: Option<&mpsc::Sender<SseFrame>>, text: String) -> StreamEnd {
    if let Some(tx) = sink {
        for piece in text.split_inclusive(' ') {
            if tx
                .send(SseFrame::Token {
                    content: piece.to_string(),
                })
                .await
                .is_err()
            {
                break;
            }
        }
    }
    StreamEnd::Completed(text)
}

/// Persists the assistant reply and bumps the conversation timestamp in a
/// single transaction, keeping `updated_at` monotone per conversation.
async fn persist_assistant(
    state: &AppState,
    conversation_id: i64,
    reply_to_user_id: i64,
    content: &str,
    sources: &[String],
    source_chunks: &[SourceChunk],
    prompt_snapshot: &str,
) -> Result<ChatMessage> {
    let mut tx = state.pool.begin().await?;
    let assistant = branch::append_assistant_message(
        tx.as_mut(),
        conversation_id,
        content,
        Some(reply_to_user_id),
        sources,
        source_chunks,
        prompt_snapshot,
    )
    .await?;
    conversations::touch_conversation(tx.as_mut(), conversation_id).await?;
    tx.commit().await?;
    Ok(assistant)
}
