// ABOUTME: The message-turn orchestration pipeline, the core of the backend
// ABOUTME: Streams adversary reply fragments, persists the exchange, classifies, and indexes
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Decoychat Contributors

//! # Turn Orchestrator
//!
//! A turn is a single forward pass: load context, stream the adversary's
//! reply, persist the exchange, classify it, and record the verdict. The
//! caller receives a typed event stream whose order is guaranteed:
//!
//! 1. Zero or more reply fragments, forwarded as they arrive
//! 2. The persisted user message, then the persisted assistant message
//! 3. The conversation record, with a stable title after the first turn
//! 4. The classification verdict, always last
//!
//! Work that nothing downstream waits on (title generation, index insertion)
//! runs concurrently on spawned tasks and is joined before the events that
//! depend on it, or before the stream ends.
//!
//! There is no rollback: writes already issued when a later state fails stay
//! in place, and the stream terminates with a single error item. Domain
//! errors keep their codes; everything else is reported as an internal error.

use std::pin::Pin;
use std::sync::Arc;

use async_stream::stream;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio_stream::Stream;
use tracing::{error, info, instrument, warn};

use crate::agents::{AdversaryRegistry, ProtectionAgent};
use crate::database::{
    ChatStore, ConversationRecord, MessageRecord, MessageRole, NewMessage, ThreatIndicatorRecord,
};
use crate::errors::{AppError, AppResult};
use crate::history::format_history;
use crate::index::{format_hits, RetrievalIndex};

/// A user's message turn, as submitted by the caller
#[derive(Debug, Clone, Deserialize)]
pub struct NewTurn {
    /// Conversation to append the turn to
    pub conversation_id: String,
    /// The user's message text
    pub content: String,
    /// Optional image reference attached to the user message
    pub image_url: Option<String>,
    /// Persona name selecting the adversary agent
    pub adversary: String,
    /// Whether classification is augmented with similar indexed content
    pub use_retrieval: bool,
}

/// Events emitted over the turn stream, in pipeline order
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum TurnEvent {
    /// A fragment of the adversary's reply, forwarded as it arrives
    AiResponse(String),
    /// The persisted user message
    UserMsg(MessageRecord),
    /// The persisted assistant message holding the full reply
    AiMsg(MessageRecord),
    /// The conversation record, titled after the first turn completes
    NewConversation(ConversationRecord),
    /// The protection agent's verdict for this exchange
    MaliciousVerdict(ThreatIndicatorRecord),
}

/// Ordered stream of turn events; one error item terminates the stream
pub type TurnStream = Pin<Box<dyn Stream<Item = AppResult<TurnEvent>> + Send>>;

/// Domain errors cross the boundary unchanged; everything else is normalized
fn normalize(error: AppError) -> AppError {
    if error.is_domain() {
        error
    } else {
        error!(%error, "Turn pipeline failed");
        AppError::internal(error.to_string())
    }
}

/// Drives a message turn end to end
pub struct TurnOrchestrator {
    store: Arc<ChatStore>,
    adversaries: Arc<AdversaryRegistry>,
    protection: Arc<dyn ProtectionAgent>,
    index: Arc<dyn RetrievalIndex>,
    history_window: i64,
    retrieval_k: usize,
}

impl TurnOrchestrator {
    /// Create an orchestrator over the given collaborators
    #[must_use]
    pub fn new(
        store: Arc<ChatStore>,
        adversaries: Arc<AdversaryRegistry>,
        protection: Arc<dyn ProtectionAgent>,
        index: Arc<dyn RetrievalIndex>,
        history_window: i64,
        retrieval_k: usize,
    ) -> Self {
        Self {
            store,
            adversaries,
            protection,
            index,
            history_window,
            retrieval_k,
        }
    }

    /// Run a message turn and return its event stream.
    ///
    /// Ownership and adversary lookup are checked before any streaming
    /// starts, so access violations never leak pipeline events.
    ///
    /// # Errors
    ///
    /// Returns `ResourceNotFound` for an unknown conversation or adversary
    /// name and `PermissionDenied` when the conversation belongs to another
    /// user. Failures inside the running pipeline surface as the stream's
    /// terminal error item instead.
    #[instrument(skip(self, turn), fields(conversation_id = %turn.conversation_id, adversary = %turn.adversary))]
    pub async fn send_message(&self, user_id: &str, turn: NewTurn) -> AppResult<TurnStream> {
        let conversation = self
            .store
            .get_conversation(&turn.conversation_id)
            .await?
            .ok_or_else(|| AppError::not_found("conversation"))?;

        if conversation.user_id != user_id {
            return Err(AppError::forbidden("conversation belongs to another user"));
        }

        let adversary = self
            .adversaries
            .get(&turn.adversary)
            .ok_or_else(|| AppError::not_found("adversary agent"))?;

        let store = Arc::clone(&self.store);
        let protection = Arc::clone(&self.protection);
        let index = Arc::clone(&self.index);
        let history_window = self.history_window;
        let retrieval_k = self.retrieval_k;

        let guard_config = if turn.use_retrieval {
            format!("{}+retrieval", protection.name())
        } else {
            protection.name().to_owned()
        };

        let events = stream! {
            // LOAD_CONTEXT
            let window = match store
                .get_recent_messages(&turn.conversation_id, history_window)
                .await
            {
                Ok(window) => window,
                Err(e) => {
                    yield Err(normalize(e));
                    return;
                }
            };
            let first_turn = window.is_empty();
            let history = format_history(&window);

            // STREAM_REPLY: forward fragments as they arrive, accumulate the
            // full reply for persistence and classification
            let mut fragments = match adversary.respond(&turn.content, &history).await {
                Ok(fragments) => fragments,
                Err(e) => {
                    yield Err(normalize(e));
                    return;
                }
            };

            let mut reply = String::new();
            while let Some(fragment) = fragments.next().await {
                match fragment {
                    Ok(text) => {
                        reply.push_str(&text);
                        yield Ok(TurnEvent::AiResponse(text));
                    }
                    Err(e) => {
                        yield Err(normalize(e));
                        return;
                    }
                }
            }
            drop(fragments);

            // PERSIST_EXCHANGE: the title work does not depend on the message
            // inserts, so it runs concurrently and is joined after both
            let title_handle = {
                let store = Arc::clone(&store);
                let protection = Arc::clone(&protection);
                let conversation_id = turn.conversation_id.clone();
                let seed = turn.content.clone();
                tokio::spawn(async move {
                    if first_turn {
                        let title = protection.generate_title(&seed).await?;
                        info!(conversation_id = %conversation_id, title = %title, "Generated conversation title");
                        store.update_conversation_title(&conversation_id, &title).await
                    } else {
                        store.touch_conversation(&conversation_id).await
                    }
                })
            };

            let user_message = NewMessage {
                conversation_id: turn.conversation_id.clone(),
                adversary_model: adversary.name().to_owned(),
                guard_config: guard_config.clone(),
                kind: "text".to_owned(),
                content: turn.content.clone(),
                image_url: turn.image_url.clone(),
            };
            let user_record = match store.create_message(&user_message, MessageRole::User).await {
                Ok(record) => record,
                Err(e) => {
                    // Writes already issued run to completion, failed turn or not
                    let _ = title_handle.await;
                    yield Err(normalize(e));
                    return;
                }
            };
            yield Ok(TurnEvent::UserMsg(user_record));

            let assistant_message = NewMessage {
                conversation_id: turn.conversation_id.clone(),
                adversary_model: adversary.name().to_owned(),
                guard_config: guard_config.clone(),
                kind: "text".to_owned(),
                content: reply.clone(),
                image_url: None,
            };
            let assistant_record =
                match store.create_message(&assistant_message, MessageRole::Assistant).await {
                    Ok(record) => record,
                    Err(e) => {
                        let _ = title_handle.await;
                        yield Err(normalize(e));
                        return;
                    }
                };
            yield Ok(TurnEvent::AiMsg(assistant_record.clone()));

            let conversation = match title_handle.await {
                Ok(Ok(record)) => record,
                Ok(Err(e)) => {
                    yield Err(normalize(e));
                    return;
                }
                Err(e) => {
                    yield Err(normalize(AppError::internal(format!("title task panicked: {e}"))));
                    return;
                }
            };
            yield Ok(TurnEvent::NewConversation(conversation));

            // CLASSIFY: the transcript the protection agent sees includes the
            // user message that triggered this reply
            let transcript = format!("{history}User: {content}\n", content = turn.content);

            let retrieval_context = if turn.use_retrieval {
                match index.search(&reply, retrieval_k).await {
                    Ok(hits) => format_hits(&hits),
                    Err(e) => {
                        // Degraded classification beats a failed turn
                        warn!(%e, "Retrieval search failed; classifying without context");
                        None
                    }
                }
            } else {
                None
            };

            let verdict = match protection
                .classify(&reply, &transcript, retrieval_context.as_deref())
                .await
            {
                Ok(verdict) => verdict,
                Err(e) => {
                    yield Err(normalize(e));
                    return;
                }
            };

            // INDEX_AND_RECORD: index insertion overlaps the indicator write;
            // its outcome is logged, never emitted
            let index_handle = if verdict.is_malicious {
                let index = Arc::clone(&index);
                let message_id = assistant_record.id.clone();
                let content = reply.clone();
                Some(tokio::spawn(async move {
                    index.insert(&message_id, &content).await
                }))
            } else {
                None
            };

            let indicator = match store
                .create_threat_indicator(
                    &assistant_record.id,
                    verdict.is_malicious,
                    &verdict.explanation,
                )
                .await
            {
                Ok(indicator) => indicator,
                Err(e) => {
                    yield Err(normalize(e));
                    return;
                }
            };
            yield Ok(TurnEvent::MaliciousVerdict(indicator));

            if let Some(handle) = index_handle {
                match handle.await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!(%e, "Index insertion failed"),
                    Err(e) => warn!(%e, "Index insertion task panicked"),
                }
            }
        };

        Ok(Box::pin(events) as TurnStream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turn_event_serializes_with_kebab_case_tags() {
        let event = TurnEvent::AiResponse("hello".to_owned());
        let json = serde_json::to_value(&event).expect("serialize");
        assert_eq!(json["type"], "ai-response");
        assert_eq!(json["data"], "hello");
    }

    #[test]
    fn test_normalize_preserves_domain_errors() {
        let normalized = normalize(AppError::not_found("conversation"));
        assert_eq!(normalized.code, crate::errors::ErrorCode::ResourceNotFound);

        let normalized = normalize(AppError::database("insert failed"));
        assert_eq!(normalized.code, crate::errors::ErrorCode::InternalError);
    }
}
