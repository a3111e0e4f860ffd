// ABOUTME: Conversation-level operations with per-user access control
// ABOUTME: CRUD, message loading, threat toggling, and user threat descriptions
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Decoychat Contributors

//! # Conversation Service
//!
//! Everything a caller can do with a conversation outside of sending a turn.
//! Every operation takes the caller's user ID and enforces ownership before
//! touching any row: an unknown ID is `ResourceNotFound`, an ID owned by
//! another user is `PermissionDenied`.

use std::sync::Arc;

use tracing::{info, instrument};

use crate::database::{ChatStore, ConversationRecord, MessageRecord, ThreatIndicatorRecord};
use crate::errors::{AppError, AppResult};
use crate::index::RetrievalIndex;

/// Conversation-level operations above the persistence gateway
pub struct ConversationService {
    store: Arc<ChatStore>,
    index: Arc<dyn RetrievalIndex>,
}

impl ConversationService {
    /// Create a service over the store and the retrieval index
    #[must_use]
    pub fn new(store: Arc<ChatStore>, index: Arc<dyn RetrievalIndex>) -> Self {
        Self { store, index }
    }

    /// Fetch a conversation and verify the caller owns it
    async fn owned_conversation(
        &self,
        user_id: &str,
        conversation_id: &str,
    ) -> AppResult<ConversationRecord> {
        let conversation = self
            .store
            .get_conversation(conversation_id)
            .await?
            .ok_or_else(|| AppError::not_found("conversation"))?;

        if conversation.user_id != user_id {
            return Err(AppError::forbidden("conversation belongs to another user"));
        }

        Ok(conversation)
    }

    /// Start a new, untitled conversation for the caller
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    pub async fn create_conversation(&self, user_id: &str) -> AppResult<ConversationRecord> {
        self.store.create_conversation(user_id).await
    }

    /// List the caller's conversations, most recently updated first
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    pub async fn list_conversations(&self, user_id: &str) -> AppResult<Vec<ConversationRecord>> {
        self.store.list_conversations(user_id).await
    }

    /// Get one of the caller's conversations
    ///
    /// # Errors
    ///
    /// Returns `ResourceNotFound` or `PermissionDenied` per the ownership
    /// rules, otherwise database errors
    pub async fn get_conversation(
        &self,
        user_id: &str,
        conversation_id: &str,
    ) -> AppResult<ConversationRecord> {
        self.owned_conversation(user_id, conversation_id).await
    }

    /// Rename one of the caller's conversations
    ///
    /// An explicit user edit: unlike the automatic first-turn title, this can
    /// run any number of times.
    ///
    /// # Errors
    ///
    /// Returns `ResourceNotFound` or `PermissionDenied` per the ownership
    /// rules, otherwise database errors
    pub async fn rename_conversation(
        &self,
        user_id: &str,
        conversation_id: &str,
        title: &str,
    ) -> AppResult<ConversationRecord> {
        self.owned_conversation(user_id, conversation_id).await?;
        self.store
            .update_conversation_title(conversation_id, title)
            .await
    }

    /// Delete one of the caller's conversations and all of its messages
    ///
    /// # Errors
    ///
    /// Returns `ResourceNotFound` or `PermissionDenied` per the ownership
    /// rules, otherwise database errors
    #[instrument(skip(self))]
    pub async fn delete_conversation(&self, user_id: &str, conversation_id: &str) -> AppResult<()> {
        self.owned_conversation(user_id, conversation_id).await?;
        self.store.delete_conversation(conversation_id).await?;
        info!(conversation_id, "Deleted conversation");
        Ok(())
    }

    /// Load all messages of one of the caller's conversations, oldest first
    ///
    /// # Errors
    ///
    /// Returns `ResourceNotFound` or `PermissionDenied` per the ownership
    /// rules, otherwise database errors
    pub async fn load_messages(
        &self,
        user_id: &str,
        conversation_id: &str,
    ) -> AppResult<Vec<MessageRecord>> {
        self.owned_conversation(user_id, conversation_id).await?;
        self.store.get_messages(conversation_id).await
    }

    /// Flip the threat flag on a message's indicator.
    ///
    /// When the flag flips to non-threat, the message's content is withdrawn
    /// from the retrieval index. Flipping back to threat does not re-insert
    /// it; only the turn pipeline indexes content.
    ///
    /// # Errors
    ///
    /// Returns `ResourceNotFound` for an unknown message or a message with no
    /// indicator, `PermissionDenied` for a foreign conversation, and an
    /// external service error if the index withdrawal fails (the flipped flag
    /// stays persisted in that case).
    #[instrument(skip(self))]
    pub async fn toggle_threat(
        &self,
        user_id: &str,
        message_id: &str,
    ) -> AppResult<ThreatIndicatorRecord> {
        let message = self
            .store
            .get_message(message_id)
            .await?
            .ok_or_else(|| AppError::not_found("message"))?;
        self.owned_conversation(user_id, &message.conversation_id)
            .await?;

        let indicator = self.store.toggle_threat_indicator(message_id).await?;

        if !indicator.is_threat {
            self.index.delete(message_id).await?;
            info!(message_id, "Withdrew message from retrieval index");
        }

        Ok(indicator)
    }

    /// Set the caller's own description on a message's threat indicator
    ///
    /// # Errors
    ///
    /// Returns `ResourceNotFound` for an unknown message or a message with no
    /// indicator, `PermissionDenied` for a foreign conversation, otherwise
    /// database errors
    pub async fn describe_threat(
        &self,
        user_id: &str,
        message_id: &str,
        description: &str,
    ) -> AppResult<ThreatIndicatorRecord> {
        let message = self
            .store
            .get_message(message_id)
            .await?
            .ok_or_else(|| AppError::not_found("message"))?;
        self.owned_conversation(user_id, &message.conversation_id)
            .await?;

        self.store
            .set_threat_user_description(message_id, description)
            .await
    }
}
