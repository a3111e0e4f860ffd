// ABOUTME: Integration tests for the turn orchestration pipeline
// ABOUTME: Covers event ordering, persistence, titling, classification, and indexing
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Decoychat Contributors

mod common;

use std::sync::Arc;

use futures_util::StreamExt;

use common::{
    collect_events, event_tag, memory_store, orchestrator, turn, IndexOp, RecordingIndex,
    ScriptedAdversary, ScriptedProtection,
};
use decoychat::errors::ErrorCode;
use decoychat::index::IndexHit;
use decoychat::services::turn::TurnEvent;

#[tokio::test]
async fn test_first_turn_emits_events_in_pipeline_order() {
    let store = memory_store().await;
    let conversation = store.create_conversation("alice").await.expect("conversation");

    let protection = Arc::new(ScriptedProtection::benign());
    let index = Arc::new(RecordingIndex::new());
    let orchestrator = orchestrator(
        store,
        ScriptedAdversary::new("julia", &["Hi ", "there!"]),
        protection,
        index,
    );

    let stream = orchestrator
        .send_message("alice", turn(&conversation.id, "julia", false))
        .await
        .expect("stream");
    let events = collect_events(stream).await;

    let tags: Vec<&str> = events.iter().map(event_tag).collect();
    assert_eq!(
        tags,
        vec![
            "ai-response",
            "ai-response",
            "user-msg",
            "ai-msg",
            "new-conversation",
            "malicious-verdict",
        ]
    );
}

#[tokio::test]
async fn test_first_turn_titles_the_conversation_after_both_messages() {
    let store = memory_store().await;
    let conversation = store.create_conversation("alice").await.expect("conversation");
    assert!(conversation.title.is_none());

    let protection = Arc::new(ScriptedProtection::benign());
    let index = Arc::new(RecordingIndex::new());
    let orchestrator = orchestrator(
        Arc::clone(&store),
        ScriptedAdversary::new("julia", &["hello"]),
        protection,
        index,
    );

    let stream = orchestrator
        .send_message("alice", turn(&conversation.id, "julia", false))
        .await
        .expect("stream");
    let events = collect_events(stream).await;

    let conversation_event_pos = events
        .iter()
        .position(|e| matches!(e, TurnEvent::NewConversation(_)))
        .expect("new-conversation event");
    let ai_msg_pos = events
        .iter()
        .position(|e| matches!(e, TurnEvent::AiMsg(_)))
        .expect("ai-msg event");
    assert!(conversation_event_pos > ai_msg_pos);

    let TurnEvent::NewConversation(record) = &events[conversation_event_pos] else {
        unreachable!();
    };
    assert_eq!(record.title.as_deref(), Some("Scripted title"));

    let persisted = store
        .get_conversation(&conversation.id)
        .await
        .expect("query")
        .expect("row");
    assert_eq!(persisted.title.as_deref(), Some("Scripted title"));
}

#[tokio::test]
async fn test_later_turns_keep_the_title_stable() {
    let store = memory_store().await;
    let conversation = store.create_conversation("alice").await.expect("conversation");

    let protection = Arc::new(ScriptedProtection::benign());
    let index = Arc::new(RecordingIndex::new());
    let orchestrator = orchestrator(
        Arc::clone(&store),
        ScriptedAdversary::new("julia", &["hello"]),
        protection,
        index,
    );

    for _ in 0..2 {
        let stream = orchestrator
            .send_message("alice", turn(&conversation.id, "julia", false))
            .await
            .expect("stream");
        collect_events(stream).await;
    }

    let persisted = store
        .get_conversation(&conversation.id)
        .await
        .expect("query")
        .expect("row");
    assert_eq!(persisted.title.as_deref(), Some("Scripted title"));
}

#[tokio::test]
async fn test_each_turn_persists_user_then_assistant() {
    let store = memory_store().await;
    let conversation = store.create_conversation("alice").await.expect("conversation");

    let protection = Arc::new(ScriptedProtection::benign());
    let index = Arc::new(RecordingIndex::new());
    let orchestrator = orchestrator(
        Arc::clone(&store),
        ScriptedAdversary::new("julia", &["frag-a ", "frag-b"]),
        protection,
        index,
    );

    let stream = orchestrator
        .send_message("alice", turn(&conversation.id, "julia", false))
        .await
        .expect("stream");
    collect_events(stream).await;

    assert_eq!(store.message_count(&conversation.id).await.expect("count"), 2);

    let messages = store.get_messages(&conversation.id).await.expect("messages");
    assert_eq!(messages[0].role, "user");
    assert_eq!(messages[0].content, "hello there");
    assert_eq!(messages[1].role, "assistant");
    assert_eq!(messages[1].content, "frag-a frag-b");
    assert_eq!(messages[1].adversary_model, "julia");
}

#[tokio::test]
async fn test_malicious_verdict_indexes_the_assistant_reply() {
    let store = memory_store().await;
    let conversation = store.create_conversation("alice").await.expect("conversation");

    let protection = Arc::new(ScriptedProtection::malicious("asks for gift cards"));
    let index = Arc::new(RecordingIndex::new());
    let orchestrator = orchestrator(
        store,
        ScriptedAdversary::new("julia", &["buy me ", "gift cards"]),
        protection,
        Arc::clone(&index),
    );

    let stream = orchestrator
        .send_message("alice", turn(&conversation.id, "julia", false))
        .await
        .expect("stream");
    let events = collect_events(stream).await;

    let assistant_id = events
        .iter()
        .find_map(|e| match e {
            TurnEvent::AiMsg(record) => Some(record.id.clone()),
            _ => None,
        })
        .expect("ai-msg event");

    let verdict = events
        .iter()
        .find_map(|e| match e {
            TurnEvent::MaliciousVerdict(record) => Some(record.clone()),
            _ => None,
        })
        .expect("verdict event");
    assert!(verdict.is_threat);
    assert_eq!(verdict.description, "asks for gift cards");
    assert_eq!(verdict.message_id, assistant_id);

    assert_eq!(
        index.inserts(),
        vec![IndexOp::Insert {
            message_id: assistant_id,
            content: "buy me gift cards".to_owned(),
        }]
    );
}

#[tokio::test]
async fn test_benign_verdict_does_not_index() {
    let store = memory_store().await;
    let conversation = store.create_conversation("alice").await.expect("conversation");

    let protection = Arc::new(ScriptedProtection::benign());
    let index = Arc::new(RecordingIndex::new());
    let orchestrator = orchestrator(
        store,
        ScriptedAdversary::new("julia", &["nice weather"]),
        protection,
        Arc::clone(&index),
    );

    let stream = orchestrator
        .send_message("alice", turn(&conversation.id, "julia", false))
        .await
        .expect("stream");
    let events = collect_events(stream).await;

    let verdict = events
        .iter()
        .find_map(|e| match e {
            TurnEvent::MaliciousVerdict(record) => Some(record.clone()),
            _ => None,
        })
        .expect("verdict event");
    assert!(!verdict.is_threat);
    assert!(index.inserts().is_empty());
}

#[tokio::test]
async fn test_retrieval_disabled_inserts_without_searching() {
    let store = memory_store().await;
    let conversation = store.create_conversation("alice").await.expect("conversation");

    let protection = Arc::new(ScriptedProtection::malicious("phishing"));
    let index = Arc::new(RecordingIndex::new());
    let orchestrator = orchestrator(
        store,
        ScriptedAdversary::new("julia", &["click this link"]),
        Arc::clone(&protection),
        Arc::clone(&index),
    );

    let stream = orchestrator
        .send_message("alice", turn(&conversation.id, "julia", false))
        .await
        .expect("stream");
    collect_events(stream).await;

    let ops = index.ops();
    assert!(ops.iter().any(|op| matches!(op, IndexOp::Insert { .. })));
    assert!(!ops.iter().any(|op| matches!(op, IndexOp::Search { .. })));

    let calls = protection.classify_calls();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].retrieval_context.is_none());
}

#[tokio::test]
async fn test_retrieval_enabled_attaches_similar_content_to_classification() {
    let store = memory_store().await;
    let conversation = store.create_conversation("alice").await.expect("conversation");

    let protection = Arc::new(ScriptedProtection::malicious("known scam pattern"));
    let index = Arc::new(RecordingIndex::with_hits(vec![IndexHit {
        score: 0.93,
        content: "wire the customs fee".to_owned(),
    }]));
    let orchestrator = orchestrator(
        store,
        ScriptedAdversary::new("julia", &["pay the fee"]),
        Arc::clone(&protection),
        Arc::clone(&index),
    );

    let stream = orchestrator
        .send_message("alice", turn(&conversation.id, "julia", true))
        .await
        .expect("stream");
    collect_events(stream).await;

    assert!(index
        .ops()
        .iter()
        .any(|op| matches!(op, IndexOp::Search { query } if query == "pay the fee")));

    let calls = protection.classify_calls();
    assert_eq!(calls.len(), 1);
    let context = calls[0].retrieval_context.as_deref().expect("context");
    assert!(context.starts_with("SIMILAR MESSAGES WITH SIMILARITY SCORE:"));
    assert!(context.contains("wire the customs fee"));
}

#[tokio::test]
async fn test_retrieval_with_no_hits_classifies_without_context() {
    let store = memory_store().await;
    let conversation = store.create_conversation("alice").await.expect("conversation");

    let protection = Arc::new(ScriptedProtection::benign());
    let index = Arc::new(RecordingIndex::new());
    let orchestrator = orchestrator(
        store,
        ScriptedAdversary::new("julia", &["hello"]),
        Arc::clone(&protection),
        index,
    );

    let stream = orchestrator
        .send_message("alice", turn(&conversation.id, "julia", true))
        .await
        .expect("stream");
    collect_events(stream).await;

    let calls = protection.classify_calls();
    assert!(calls[0].retrieval_context.is_none());
}

#[tokio::test]
async fn test_classification_transcript_includes_the_user_message() {
    let store = memory_store().await;
    let conversation = store.create_conversation("alice").await.expect("conversation");

    let protection = Arc::new(ScriptedProtection::benign());
    let index = Arc::new(RecordingIndex::new());
    let orchestrator = orchestrator(
        store,
        ScriptedAdversary::new("julia", &["hello"]),
        Arc::clone(&protection),
        index,
    );

    let stream = orchestrator
        .send_message("alice", turn(&conversation.id, "julia", false))
        .await
        .expect("stream");
    collect_events(stream).await;

    let calls = protection.classify_calls();
    assert_eq!(calls[0].reply, "hello");
    assert!(calls[0].history.ends_with("User: hello there\n"));
}

#[tokio::test]
async fn test_second_turn_sees_the_first_exchange_as_history() {
    let store = memory_store().await;
    let conversation = store.create_conversation("alice").await.expect("conversation");

    let protection = Arc::new(ScriptedProtection::benign());
    let index = Arc::new(RecordingIndex::new());
    let orchestrator = orchestrator(
        store,
        ScriptedAdversary::new("julia", &["first reply"]),
        Arc::clone(&protection),
        index,
    );

    for _ in 0..2 {
        let stream = orchestrator
            .send_message("alice", turn(&conversation.id, "julia", false))
            .await
            .expect("stream");
        collect_events(stream).await;
    }

    let calls = protection.classify_calls();
    assert_eq!(calls.len(), 2);
    // The second classification sees the first exchange in chronological order
    assert!(calls[1]
        .history
        .starts_with("User: hello there\nJulia: first reply\n"));
}

#[tokio::test]
async fn test_classify_failure_ends_the_stream_with_one_internal_error() {
    let store = memory_store().await;
    let conversation = store.create_conversation("alice").await.expect("conversation");

    let protection = Arc::new(ScriptedProtection::classify_fails());
    let index = Arc::new(RecordingIndex::new());
    let orchestrator = orchestrator(
        Arc::clone(&store),
        ScriptedAdversary::new("julia", &["partial ", "reply"]),
        protection,
        Arc::clone(&index),
    );

    let mut stream = orchestrator
        .send_message("alice", turn(&conversation.id, "julia", false))
        .await
        .expect("stream");

    let mut tags = Vec::new();
    let mut terminal = None;
    while let Some(item) = stream.next().await {
        match item {
            Ok(event) => tags.push(event_tag(&event)),
            Err(error) => {
                terminal = Some(error);
                break;
            }
        }
    }

    // Everything up to classification streamed normally
    assert_eq!(
        tags,
        vec![
            "ai-response",
            "ai-response",
            "user-msg",
            "ai-msg",
            "new-conversation",
        ]
    );

    // One normalized error item, then the stream is done
    let error = terminal.expect("terminal error");
    assert_eq!(error.code, ErrorCode::InternalError);
    assert!(stream.next().await.is_none());

    // Partial persistence stands; no verdict was ever recorded
    assert_eq!(store.message_count(&conversation.id).await.expect("count"), 2);
    let messages = store.get_messages(&conversation.id).await.expect("messages");
    assert!(store
        .get_threat_indicator_by_message(&messages[1].id)
        .await
        .expect("query")
        .is_none());
    assert!(index.inserts().is_empty());
}

#[tokio::test]
async fn test_foreign_owner_is_rejected_before_any_event() {
    let store = memory_store().await;
    let conversation = store.create_conversation("alice").await.expect("conversation");

    let protection = Arc::new(ScriptedProtection::benign());
    let index = Arc::new(RecordingIndex::new());
    let orchestrator = orchestrator(
        store,
        ScriptedAdversary::new("julia", &["hello"]),
        protection,
        index,
    );

    // The stream type has no Debug impl, so unwrap the error by hand
    let Err(error) = orchestrator
        .send_message("mallory", turn(&conversation.id, "julia", false))
        .await
    else {
        panic!("foreign access must fail");
    };
    assert_eq!(error.code, ErrorCode::PermissionDenied);
}

#[tokio::test]
async fn test_unknown_conversation_is_not_found() {
    let store = memory_store().await;

    let protection = Arc::new(ScriptedProtection::benign());
    let index = Arc::new(RecordingIndex::new());
    let orchestrator = orchestrator(
        store,
        ScriptedAdversary::new("julia", &["hello"]),
        protection,
        index,
    );

    let Err(error) = orchestrator
        .send_message("alice", turn("missing-conversation", "julia", false))
        .await
    else {
        panic!("unknown conversation must fail");
    };
    assert_eq!(error.code, ErrorCode::ResourceNotFound);
}

#[tokio::test]
async fn test_unknown_adversary_is_not_found() {
    let store = memory_store().await;
    let conversation = store.create_conversation("alice").await.expect("conversation");

    let protection = Arc::new(ScriptedProtection::benign());
    let index = Arc::new(RecordingIndex::new());
    let orchestrator = orchestrator(
        store,
        ScriptedAdversary::new("julia", &["hello"]),
        protection,
        index,
    );

    let Err(error) = orchestrator
        .send_message("alice", turn(&conversation.id, "nonexistent", false))
        .await
    else {
        panic!("unknown adversary must fail");
    };
    assert_eq!(error.code, ErrorCode::ResourceNotFound);
}
