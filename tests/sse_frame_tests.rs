//! Wire-shape tests for the chat streaming protocol: every frame is a
//! `data: <json>` event whose JSON matches the documented schemas.

use docuchat::models::message::SourceChunk;
use docuchat::models::sse::SseFrame;

fn to_json(frame: &SseFrame) -> serde_json::Value {
    serde_json::to_value(frame).expect("frame serializes")
}

#[test]
fn test_meta_frame_schema() {
    let frame = SseFrame::Meta {
        sources: vec!["paper.pdf".to_string(), "notes.txt".to_string()],
        source_chunks: vec![SourceChunk {
            index: 1,
            source: "paper.pdf".to_string(),
            chunk: "chunk preview".to_string(),
        }],
        user_message_id: Some(12),
        edit_group_id: Some(12),
    };

    let json = to_json(&frame);
    assert_eq!(json["type"], "meta");
    assert_eq!(json["sources"][1], "notes.txt");
    assert_eq!(json["sourceChunks"][0]["index"], 1);
    assert_eq!(json["sourceChunks"][0]["source"], "paper.pdf");
    assert_eq!(json["sourceChunks"][0]["chunk"], "chunk preview");
    assert_eq!(json["userMessageId"], 12);
    assert_eq!(json["editGroupId"], 12);
}

#[test]
fn test_meta_frame_nulls_for_fresh_conversations() {
    let frame = SseFrame::Meta {
        sources: vec![],
        source_chunks: vec![],
        user_message_id: None,
        edit_group_id: None,
    };
    let json = to_json(&frame);
    assert!(json["userMessageId"].is_null());
    assert!(json["editGroupId"].is_null());
    assert_eq!(json["sources"].as_array().unwrap().len(), 0);
}

#[test]
fn test_token_frame_schema() {
    let json = to_json(&SseFrame::Token {
        content: "hello ".to_string(),
    });
    assert_eq!(json["type"], "token");
    assert_eq!(json["content"], "hello ");
}

#[test]
fn test_error_frame_schema() {
    let json = to_json(&SseFrame::Error {
        message: "Another request is in progress for this conversation. Please wait for it to finish.".to_string(),
    });
    assert_eq!(json["type"], "error");
    assert!(
        json["message"]
            .as_str()
            .unwrap()
            .contains("Another request is in progress")
    );
}

#[test]
fn test_done_frame_schema_success_and_error() {
    let success = to_json(&SseFrame::Done {
        assistant_message_id: 44,
        full_response: "the full text".to_string(),
        error: None,
    });
    assert_eq!(success["type"], "done");
    assert_eq!(success["assistantMessageId"], 44);
    assert_eq!(success["fullResponse"], "the full text");
    assert!(success.get("error").is_none());

    let failure = to_json(&SseFrame::Done {
        assistant_message_id: 45,
        full_response: "[Error: provider unavailable]".to_string(),
        error: Some(true),
    });
    assert_eq!(failure["error"], true);
}

#[test]
fn test_frames_roundtrip() {
    let frames = vec![
        SseFrame::Meta {
            sources: vec!["a".to_string()],
            source_chunks: vec![],
            user_message_id: Some(1),
            edit_group_id: Some(1),
        },
        SseFrame::Token {
            content: "x".to_string(),
        },
        SseFrame::Done {
            assistant_message_id: 2,
            full_response: "x".to_string(),
            error: None,
        },
    ];

    for frame in frames {
        let json = serde_json::to_string(&frame).unwrap();
        let back: SseFrame = serde_json::from_str(&json).unwrap();
        assert_eq!(serde_json::to_string(&back).unwrap(), json);
    }
}
