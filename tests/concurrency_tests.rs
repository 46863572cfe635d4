//! Lock behavior across two real `/chat/stream` calls on the same
//! conversation: serialized provider calls in the happy path, and a Busy
//! error frame when the per-conversation lock times out.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{ScriptedProvider, TestApp, TestAppOptions};
use docuchat::config::AiConfig;
use docuchat::models::conversation::{Conversation, LlmMode};
use docuchat::models::message::ChatMessage;
use docuchat::models::sse::SseFrame;
use docuchat::services::branch;
use docuchat::services::llm::router::LlmRouter;

fn options(provider: &Arc<ScriptedProvider>, conversation_timeout_secs: Option<u64>) -> TestAppOptions {
    TestAppOptions {
        llm: Some(Arc::new(LlmRouter::with_providers(
            AiConfig::default(),
            provider.clone(),
            provider.clone(),
        ))),
        conversation_timeout_secs,
    }
}

/// Seeds one completed turn so concurrent follow-ups can pin an explicit
/// parent regardless of which request lands first.
async fn seed_turn(app: &TestApp, conversation: &Conversation) -> ChatMessage {
    let mut conn = app.get_connection().await;
    let user = branch::append_user_message(&mut conn, conversation.id, "seed question", None, None, 1)
        .await
        .unwrap();
    branch::append_assistant_message(
        &mut conn,
        conversation.id,
        "seed answer",
        Some(user.id),
        &[],
        &[],
        "seed question",
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn test_concurrent_turns_on_same_conversation_serialize() {
    let delay = Duration::from_millis(400);
    let provider = Arc::new(ScriptedProvider::new("serialized reply").with_delay(delay));
    let app = TestApp::with_options(
        "test_concurrent_turns_on_same_conversation_serialize",
        options(&provider, None),
    )
    .await;
    let conversation = app.create_conversation("contended", LlmMode::Cloud).await;
    let assistant = seed_turn(&app, &conversation).await;

    let body = serde_json::json!({
        "message": "follow up",
        "conversationId": conversation.id,
        "parentMessageId": assistant.id,
    });

    let started = Instant::now();
    let (frames_a, frames_b) =
        tokio::join!(app.chat_stream_frames(&body), app.chat_stream_frames(&body));
    let elapsed = started.elapsed();

    for frames in [&frames_a, &frames_b] {
        assert!(matches!(frames.first(), Some(SseFrame::Meta { .. })));
        assert!(matches!(
            frames.last(),
            Some(SseFrame::Done { error: None, .. })
        ));
    }

    // At most one in-flight provider call at any time, so two turns take at
    // least twice the single-turn generation time.
    assert_eq!(provider.max_concurrent_calls(), 1);
    assert!(
        elapsed >= delay * 2,
        "two serialized turns finished in {elapsed:?}"
    );
}

#[tokio::test]
async fn test_second_stream_gets_busy_when_lock_times_out() {
    let provider =
        Arc::new(ScriptedProvider::new("slow reply").with_delay(Duration::from_secs(3)));
    let app = TestApp::with_options(
        "test_second_stream_gets_busy_when_lock_times_out",
        options(&provider, Some(1)),
    )
    .await;
    let conversation = app.create_conversation("busy", LlmMode::Cloud).await;
    let assistant = seed_turn(&app, &conversation).await;

    let body = serde_json::json!({
        "message": "follow up",
        "conversationId": conversation.id,
        "parentMessageId": assistant.id,
    });

    let (frames_a, frames_b) = tokio::join!(app.chat_stream_frames(&body), async {
        // Let the first request take the conversation lock.
        tokio::time::sleep(Duration::from_millis(500)).await;
        app.chat_stream_frames(&body).await
    });

    // The holder finishes normally.
    assert!(matches!(
        frames_a.last(),
        Some(SseFrame::Done { error: None, .. })
    ));

    // The waiter times out: no meta frame, an error frame first, and a
    // terminal done carrying the persisted error reply.
    match frames_b.first() {
        Some(SseFrame::Error { message }) => {
            assert!(
                message.contains("Another request is in progress"),
                "unexpected busy message: {message}"
            );
        }
        other => panic!("expected error frame first, got {other:?}"),
    }
    match frames_b.last() {
        Some(SseFrame::Done {
            full_response,
            error,
            ..
        }) => {
            assert_eq!(error, &Some(true));
            assert!(full_response.starts_with("[Error:"));
        }
        other => panic!("expected done frame last, got {other:?}"),
    }
}
