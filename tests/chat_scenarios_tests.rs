//! End-to-end chat scenarios over HTTP + Postgres: a linear turn, an edit
//! producing a sibling version, and the parent-required rule for
//! follow-ups. Chat turns run through a scripted provider so no model
//! server is needed.

mod common;

use std::sync::Arc;

use common::{ScriptedProvider, TestApp, TestAppOptions};
use docuchat::config::AiConfig;
use docuchat::models::conversation::LlmMode;
use docuchat::models::message::MessageRole;
use docuchat::models::sse::SseFrame;
use docuchat::queries;
use docuchat::services::llm::router::LlmRouter;

fn scripted_options(provider: &Arc<ScriptedProvider>) -> TestAppOptions {
    TestAppOptions {
        llm: Some(Arc::new(LlmRouter::with_providers(
            AiConfig::default(),
            provider.clone(),
            provider.clone(),
        ))),
        conversation_timeout_secs: None,
    }
}

#[tokio::test]
async fn test_linear_chat_persists_user_and_assistant_pair() {
    let provider = Arc::new(ScriptedProvider::new("Hello! How can I help?"));
    let app = TestApp::with_options(
        "test_linear_chat_persists_user_and_assistant_pair",
        scripted_options(&provider),
    )
    .await;
    let conversation = app.create_conversation("linear chat", LlmMode::Cloud).await;

    let frames = app
        .chat_stream_frames(&serde_json::json!({
            "message": "hello",
            "conversationId": conversation.id,
        }))
        .await;

    // First frame is meta with empty sources (no documents uploaded), then
    // at least one token, then the terminal done frame.
    match frames.first() {
        Some(SseFrame::Meta {
            sources,
            user_message_id,
            edit_group_id,
            ..
        }) => {
            assert!(sources.is_empty());
            assert!(user_message_id.is_some());
            assert_eq!(edit_group_id, user_message_id);
        }
        other => panic!("expected meta frame first, got {other:?}"),
    }
    assert!(frames.iter().any(|f| matches!(f, SseFrame::Token { .. })));
    match frames.last() {
        Some(SseFrame::Done {
            full_response,
            error,
            ..
        }) => {
            assert_eq!(full_response, "Hello! How can I help?");
            assert!(error.is_none());
        }
        other => panic!("expected done frame last, got {other:?}"),
    }

    let mut conn = app.get_connection().await;
    let rows = queries::messages::list_messages(&mut conn, conversation.id)
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);

    let user = &rows[0];
    assert_eq!(user.role, MessageRole::User);
    assert_eq!(user.version_index, 1);
    assert_eq!(user.edit_group_id, Some(user.id));

    let assistant = &rows[1];
    assert_eq!(assistant.role, MessageRole::Assistant);
    assert_eq!(assistant.reply_to_message_id, Some(user.id));
    assert_eq!(assistant.version_index, 1);
    assert!(!assistant.is_archived);
    assert_eq!(assistant.content, "Hello! How can I help?");
}

#[tokio::test]
async fn test_edit_creates_sibling_version_not_replacement() {
    let provider = Arc::new(ScriptedProvider::new("an answer"));
    let app = TestApp::with_options(
        "test_edit_creates_sibling_version_not_replacement",
        scripted_options(&provider),
    )
    .await;
    let conversation = app.create_conversation("editing", LlmMode::Cloud).await;

    app.chat_stream_frames(&serde_json::json!({
        "message": "hello",
        "conversationId": conversation.id,
    }))
    .await;

    let mut conn = app.get_connection().await;
    let rows = queries::messages::list_messages(&mut conn, conversation.id)
        .await
        .unwrap();
    let original_user = rows[0].clone();
    let original_assistant = rows[1].clone();
    drop(conn);

    let response = app
        .post_json(
            &format!("/api/v1/messages/{}", original_user.id),
            &serde_json::json!({ "content": "hi there", "regenerate": true }),
        )
        .await;
    assert_eq!(response.status(), 200);

    let mut conn = app.get_connection().await;
    let rows = queries::messages::list_messages(&mut conn, conversation.id)
        .await
        .unwrap();
    assert_eq!(rows.len(), 4);

    let new_user = rows
        .iter()
        .find(|m| m.role == MessageRole::User && m.id != original_user.id)
        .expect("a new user version should exist");
    assert_eq!(new_user.edit_group_id, Some(original_user.id));
    assert_eq!(new_user.version_index, 2);
    // Same parent as the original: a sibling branch, not a child.
    assert_eq!(
        new_user.reply_to_message_id,
        original_user.reply_to_message_id
    );
    assert!(new_user.is_edited);

    let new_assistant = rows
        .iter()
        .find(|m| {
            m.role == MessageRole::Assistant && m.reply_to_message_id == Some(new_user.id)
        })
        .expect("the new version should get its own reply");
    assert_eq!(new_assistant.version_index, 1);

    // The original pair stays active; nothing is archived by an edit.
    let original_user_now = rows.iter().find(|m| m.id == original_user.id).unwrap();
    let original_assistant_now = rows
        .iter()
        .find(|m| m.id == original_assistant.id)
        .unwrap();
    assert!(!original_user_now.is_archived);
    assert!(!original_assistant_now.is_archived);
}

#[tokio::test]
async fn test_follow_up_without_parent_is_rejected() {
    let provider = Arc::new(ScriptedProvider::new("an answer"));
    let app = TestApp::with_options(
        "test_follow_up_without_parent_is_rejected",
        scripted_options(&provider),
    )
    .await;
    let conversation = app.create_conversation("branching", LlmMode::Cloud).await;

    app.chat_stream_frames(&serde_json::json!({
        "message": "hello",
        "conversationId": conversation.id,
    }))
    .await;

    // Once an assistant reply exists, follow-ups must pin a parent.
    let response = app
        .post_json(
            "/api/v1/chat",
            &serde_json::json!({ "message": "more", "conversationId": conversation.id }),
        )
        .await;
    assert_eq!(response.status(), 400);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["code"], "PARENT_REQUIRED");

    // The same follow-up with an explicit parent goes through.
    let mut conn = app.get_connection().await;
    let rows = queries::messages::list_messages(&mut conn, conversation.id)
        .await
        .unwrap();
    let assistant_id = rows
        .iter()
        .find(|m| m.role == MessageRole::Assistant)
        .unwrap()
        .id;
    drop(conn);

    let response = app
        .post_json(
            "/api/v1/chat",
            &serde_json::json!({
                "message": "more",
                "conversationId": conversation.id,
                "parentMessageId": assistant_id,
            }),
        )
        .await;
    assert_eq!(response.status(), 200);
}
