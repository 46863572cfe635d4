use std::collections::{HashMap, HashSet};

use crate::{
    DbConn,
    error::{Error, Result},
    models::message::{
        BranchMessage, ChatMessage, ChatMessageView, MessageRole, ResponseVariant, SourceChunk,
    },
    models::requests::ChatRequest,
    queries::messages::{self, NewAssistantMessage, NewUserMessage},
};

/// How a chat request attaches to the reply graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnKind {
    /// Explicit parent pinned by the client
    Explicit,
    /// Fresh sibling reply for the latest user turn
    Regenerate,
    /// New version of an existing user turn
    Edit,
    /// First turn of the conversation
    FirstTurn,
    /// Follow-up without a pinned parent: rejected to preserve branches
    Rejected,
}

pub fn classify_request(
    has_explicit_parent: bool,
    regenerate: bool,
    is_edit: bool,
    conversation_has_assistant: bool,
) -> TurnKind {
    if has_explicit_parent {
        TurnKind::Explicit
    } else if regenerate {
        TurnKind::Regenerate
    } else if is_edit {
        TurnKind::Edit
    } else if !conversation_has_assistant {
        TurnKind::FirstTurn
    } else {
        TurnKind::Rejected
    }
}

/// Outcome of parent resolution: how the turn attaches, and to what.
#[derive(Debug, Clone, Copy)]
pub struct ParentResolution {
    pub kind: TurnKind,
    pub parent_id: Option<i64>,
}

/// Resolves the parent message for a chat request. This is the single
/// authority on how new turns attach to the reply graph.
pub async fn resolve_parent(
    conn: &mut DbConn,
    conversation_id: i64,
    req: &ChatRequest,
) -> Result<ParentResolution> {
    let has_assistant = messages::has_assistant_message(conn, conversation_id).await?;
    let kind = classify_request(
        req.parent_message_id.is_some(),
        req.regenerate,
        req.is_edit,
        has_assistant,
    );
    let parent_id = match (kind, req.parent_message_id) {
        (TurnKind::Explicit, Some(parent_id)) => {
            let parent = messages::get_message_in_conversation(conn, conversation_id, parent_id)
                .await?
                .ok_or_else(|| {
                    Error::InvalidParent(format!(
                        "message {parent_id} not found in conversation {conversation_id}"
                    ))
                })?;
            if parent.role != MessageRole::Assistant {
                return Err(Error::InvalidParent(format!(
                    "message {parent_id} is not an assistant message"
                )));
            }
            Some(parent.id)
        }
        (TurnKind::Explicit, None) => {
            return Err(Error::Internal(
                "explicit turn without a parent message id".to_string(),
            ));
        }
        (TurnKind::Regenerate, _) => {
            let last_user =
                messages::latest_message_of_role(conn, conversation_id, MessageRole::User)
                    .await?
                    .ok_or_else(|| {
                        Error::InvalidParent("no user message to regenerate from".to_string())
                    })?;
            last_user.reply_to_message_id
        }
        (TurnKind::Edit, _) => {
            let group_id = req.edit_group_id.ok_or_else(|| {
                Error::InvalidParent("edit requests must carry an edit group id".to_string())
            })?;
            // The group id IS the original version's message id.
            let original = messages::get_message_in_conversation(conn, conversation_id, group_id)
                .await?
                .ok_or_else(|| {
                    Error::InvalidParent(format!(
                        "edit group {group_id} not found in conversation {conversation_id}"
                    ))
                })?;
            if original.role != MessageRole::User {
                return Err(Error::InvalidParent(format!(
                    "edit group {group_id} does not anchor a user message"
                )));
            }
            original.reply_to_message_id
        }
        (TurnKind::FirstTurn, _) => None,
        (TurnKind::Rejected, _) => return Err(Error::ParentRequired),
    };

    Ok(ParentResolution { kind, parent_id })
}

/// Reconstructs the active branch ending at `tail` by walking
/// `reply_to_message_id` backwards, then reversing to chronological order.
/// Sibling branches are never mixed in. A cycle in the walk is data
/// corruption and fails the request.
pub async fn build_branch_history(
    conn: &mut DbConn,
    conversation_id: i64,
    tail: Option<i64>,
    max_messages: usize,
) -> Result<Vec<BranchMessage>> {
    let Some(tail_id) = tail else {
        return Ok(Vec::new());
    };

    let all = messages::list_messages(conn, conversation_id).await?;
    let by_id: HashMap<i64, &ChatMessage> = all.iter().map(|m| (m.id, m)).collect();

    let mut walk: Vec<&ChatMessage> = Vec::new();
    let mut visited: HashSet<i64> = HashSet::new();
    let mut cursor = Some(tail_id);

    while let Some(id) = cursor {
        if !visited.insert(id) {
            return Err(Error::Internal(format!(
                "reply graph cycle detected at message {id} in conversation {conversation_id}"
            )));
        }
        let message = by_id.get(&id).ok_or_else(|| {
            Error::Internal(format!(
                "dangling reply_to_message_id {id} in conversation {conversation_id}"
            ))
        })?;
        walk.push(message);
        if walk.len() >= max_messages {
            break;
        }
        cursor = message.reply_to_message_id;
    }

    walk.reverse();
    Ok(walk
        .into_iter()
        .map(|m| BranchMessage {
            role: m.role,
            content: m.content.clone(),
        })
        .collect())
}

/// Persists a user message. A first-version message gets its own id
/// back-filled as the edit group id.
pub async fn append_user_message(
    conn: &mut DbConn,
    conversation_id: i64,
    content: &str,
    reply_to_message_id: Option<i64>,
    edit_group_id: Option<i64>,
    version_index: i32,
) -> Result<ChatMessage> {
    let inserted = messages::insert_user_message(
        conn,
        NewUserMessage {
            conversation_id,
            content,
            reply_to_message_id,
            edit_group_id,
            version_index,
            is_edited: version_index > 1,
        },
    )
    .await?;

    if inserted.edit_group_id.is_none() {
        return messages::set_edit_group_to_self(conn, inserted.id).await;
    }
    Ok(inserted)
}

/// Persists an assistant reply with its frozen retrieval fingerprint.
/// Assistant messages are always version 1 and never archived at birth.
pub async fn append_assistant_message(
    conn: &mut DbConn,
    conversation_id: i64,
    content: &str,
    reply_to_user_id: Option<i64>,
    sources: &[String],
    source_chunks: &[SourceChunk],
    prompt_snapshot: &str,
) -> Result<ChatMessage> {
    messages::insert_assistant_message(
        conn,
        NewAssistantMessage {
            conversation_id,
            content,
            reply_to_message_id: reply_to_user_id,
            sources: serde_json::to_value(sources)?,
            source_chunks: serde_json::to_value(source_chunks)?,
            prompt_snapshot,
        },
    )
    .await
}

/// Version index for the next member of an edit group.
pub async fn next_version_index(
    conn: &mut DbConn,
    conversation_id: i64,
    edit_group_id: i64,
) -> Result<i32> {
    let count = messages::count_edit_group_members(conn, conversation_id, edit_group_id).await?;
    Ok(count as i32 + 1)
}

/// Default read-API rendering: non-archived messages in creation order,
/// with sibling assistant replies exposed as `response_versions` on the
/// user message that anchors them.
pub async fn list_active_branch(
    conn: &mut DbConn,
    conversation_id: i64,
) -> Result<Vec<ChatMessageView>> {
    let all = messages::list_messages(conn, conversation_id).await?;

    let mut replies_by_parent: HashMap<i64, Vec<&ChatMessage>> = HashMap::new();
    for message in &all {
        if message.role == MessageRole::Assistant
            && let Some(parent) = message.reply_to_message_id
        {
            replies_by_parent.entry(parent).or_default().push(message);
        }
    }

    let mut views = Vec::new();
    for message in &all {
        if message.is_archived {
            continue;
        }

        let response_versions = if message.role == MessageRole::User {
            replies_by_parent.get(&message.id).map(|variants| {
                let mut variants = variants.clone();
                variants.sort_by_key(|v| (v.version_index, v.created_at));
                variants
                    .into_iter()
                    .map(|v| response_variant(v, &message.content))
                    .collect::<Vec<_>>()
            })
        } else {
            None
        };

        views.push(message_view(message, response_versions));
    }

    Ok(views)
}

/// Sibling assistant replies for one user message, oldest version first.
pub async fn response_variants_for_user(
    conn: &mut DbConn,
    user_message: &ChatMessage,
) -> Result<Vec<ResponseVariant>> {
    let all = messages::list_messages(conn, user_message.conversation_id).await?;
    let mut variants: Vec<&ChatMessage> = all
        .iter()
        .filter(|m| {
            m.role == MessageRole::Assistant && m.reply_to_message_id == Some(user_message.id)
        })
        .collect();
    variants.sort_by_key(|v| (v.version_index, v.created_at));
    Ok(variants
        .into_iter()
        .map(|v| response_variant(v, &user_message.content))
        .collect())
}

fn response_variant(message: &ChatMessage, anchor_content: &str) -> ResponseVariant {
    ResponseVariant {
        id: message.id,
        version_index: message.version_index,
        content: message.content.clone(),
        sources: message.source_list(),
        source_chunks: message
            .source_chunks
            .as_ref()
            .and_then(|v| serde_json::from_value(v.clone()).ok()),
        is_active: !message.is_archived,
        created_at: message.created_at,
        prompt_content: Some(
            message
                .prompt_snapshot
                .clone()
                .unwrap_or_else(|| anchor_content.to_string()),
        ),
    }
}

pub fn message_view(
    message: &ChatMessage,
    response_versions: Option<Vec<ResponseVariant>>,
) -> ChatMessageView {
    ChatMessageView {
        id: message.id,
        role: message.role,
        content: message.content.clone(),
        sources: message.source_list(),
        source_chunks: message
            .source_chunks
            .as_ref()
            .and_then(|v| serde_json::from_value(v.clone()).ok()),
        created_at: message.created_at,
        is_edited: message.is_edited,
        reply_to_message_id: message.reply_to_message_id,
        version_index: message.version_index,
        is_archived: message.is_archived,
        edit_group_id: message.edit_group_id,
        response_versions,
    }
}
