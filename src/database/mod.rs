// ABOUTME: Database operations for conversations, messages, and threat indicators
// ABOUTME: Handles CRUD with per-user ownership columns and cascading deletes over SQLite
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Decoychat Contributors

use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use uuid::Uuid;

use crate::errors::{AppError, AppResult};

// ============================================================================
// Database Record Types
// ============================================================================

/// Role of a persisted chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// Message authored by the human user
    User,
    /// Message authored by the adversary agent
    Assistant,
}

impl MessageRole {
    /// String representation stored in the `role` column
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// Database representation of a conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationRecord {
    /// Unique conversation ID
    pub id: String,
    /// User ID who owns the conversation
    pub user_id: String,
    /// Title, unset until the first turn completes or the user edits it
    pub title: Option<String>,
    /// When the conversation was created (RFC 3339)
    pub created_at: String,
    /// When the conversation was last updated (RFC 3339)
    pub updated_at: String,
}

/// Database representation of a chat message
///
/// Messages are immutable after insert; only the paired threat indicator
/// changes state afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Unique message ID
    pub id: String,
    /// Conversation this message belongs to
    pub conversation_id: String,
    /// Role of the message author (`user` or `assistant`)
    pub role: String,
    /// Adversary model identifier used for this turn
    pub adversary_model: String,
    /// Protection/retrieval configuration active when the message was sent
    pub guard_config: String,
    /// Message type tag (currently `text`)
    pub kind: String,
    /// Message content
    pub content: String,
    /// Optional image reference
    pub image_url: Option<String>,
    /// When the message was created (RFC 3339)
    pub created_at: String,
    /// When the message was last updated (RFC 3339)
    pub updated_at: String,
}

/// Data for inserting a new message
#[derive(Debug, Clone)]
pub struct NewMessage {
    /// Conversation to append to
    pub conversation_id: String,
    /// Adversary model identifier for this turn
    pub adversary_model: String,
    /// Protection/retrieval configuration active for this turn
    pub guard_config: String,
    /// Message type tag
    pub kind: String,
    /// Message content
    pub content: String,
    /// Optional image reference
    pub image_url: Option<String>,
}

/// Database representation of a threat indicator (one per assistant message)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreatIndicatorRecord {
    /// Unique indicator ID
    pub id: String,
    /// Assistant message this indicator classifies
    pub message_id: String,
    /// Whether the message was judged malicious
    pub is_threat: bool,
    /// System-generated explanation from the protection agent
    pub description: String,
    /// Optional user-supplied override description
    pub user_description: Option<String>,
    /// When the indicator was created (RFC 3339)
    pub created_at: String,
}

/// Fixed-width RFC 3339 timestamp so lexicographic ordering matches time order
fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

// ============================================================================
// Chat Store
// ============================================================================

/// Persistence gateway over conversations, messages, and threat indicators
pub struct ChatStore {
    pool: SqlitePool,
}

impl ChatStore {
    /// Create a store over an existing pool (caller is responsible for migration)
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open a database, run migrations, and return a ready store
    ///
    /// # Errors
    ///
    /// Returns a config error for an invalid URL and database errors on
    /// connection or migration failure.
    pub async fn connect(database_url: &str) -> AppResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| AppError::config(format!("invalid database URL: {e}")))?
            .create_if_missing(true)
            .foreign_keys(true);

        // Single connection: keeps `sqlite::memory:` databases coherent and
        // SQLite serializes writers regardless
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| AppError::database(format!("Failed to open database: {e}")))?;

        let store = Self::new(pool);
        store.migrate().await?;
        Ok(store)
    }

    /// Create the schema if it does not exist
    ///
    /// # Errors
    ///
    /// Returns an error if a DDL statement fails
    pub async fn migrate(&self) -> AppResult<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                title TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to create conversations table: {e}")))?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
                role TEXT NOT NULL,
                adversary_model TEXT NOT NULL,
                guard_config TEXT NOT NULL,
                kind TEXT NOT NULL,
                content TEXT NOT NULL,
                image_url TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to create messages table: {e}")))?;

        sqlx::query(
            r"
            CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(conversation_id, created_at)
            ",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to create message index: {e}")))?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS threat_indicators (
                id TEXT PRIMARY KEY,
                message_id TEXT NOT NULL UNIQUE REFERENCES messages(id) ON DELETE CASCADE,
                is_threat INTEGER NOT NULL,
                description TEXT NOT NULL,
                user_description TEXT,
                created_at TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::database(format!("Failed to create threat_indicators table: {e}"))
        })?;

        Ok(())
    }

    // ========================================================================
    // Conversation Operations
    // ========================================================================

    /// Create a new conversation for a user (title unset until the first turn)
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    pub async fn create_conversation(&self, user_id: &str) -> AppResult<ConversationRecord> {
        let id = Uuid::new_v4().to_string();
        let now = now_rfc3339();

        sqlx::query(
            r"
            INSERT INTO conversations (id, user_id, title, created_at, updated_at)
            VALUES ($1, $2, NULL, $3, $3)
            ",
        )
        .bind(&id)
        .bind(user_id)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to create conversation: {e}")))?;

        Ok(ConversationRecord {
            id,
            user_id: user_id.to_owned(),
            title: None,
            created_at: now.clone(),
            updated_at: now,
        })
    }

    /// Get a conversation by ID
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    pub async fn get_conversation(&self, id: &str) -> AppResult<Option<ConversationRecord>> {
        let row = sqlx::query(
            r"
            SELECT id, user_id, title, created_at, updated_at
            FROM conversations
            WHERE id = $1
            ",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to get conversation: {e}")))?;

        Ok(row.map(|r| ConversationRecord {
            id: r.get("id"),
            user_id: r.get("user_id"),
            title: r.get("title"),
            created_at: r.get("created_at"),
            updated_at: r.get("updated_at"),
        }))
    }

    /// List a user's conversations, most recently updated first
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    pub async fn list_conversations(&self, user_id: &str) -> AppResult<Vec<ConversationRecord>> {
        let rows = sqlx::query(
            r"
            SELECT id, user_id, title, created_at, updated_at
            FROM conversations
            WHERE user_id = $1
            ORDER BY updated_at DESC
            ",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to list conversations: {e}")))?;

        Ok(rows
            .into_iter()
            .map(|r| ConversationRecord {
                id: r.get("id"),
                user_id: r.get("user_id"),
                title: r.get("title"),
                created_at: r.get("created_at"),
                updated_at: r.get("updated_at"),
            })
            .collect())
    }

    /// Set a conversation's title and return the updated record
    ///
    /// # Errors
    ///
    /// Returns `ResourceNotFound` if the conversation does not exist,
    /// otherwise database errors
    pub async fn update_conversation_title(
        &self,
        id: &str,
        title: &str,
    ) -> AppResult<ConversationRecord> {
        let now = now_rfc3339();

        let result = sqlx::query(
            r"
            UPDATE conversations
            SET title = $1, updated_at = $2
            WHERE id = $3
            ",
        )
        .bind(title)
        .bind(&now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to update conversation title: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found("conversation"));
        }

        self.get_conversation(id)
            .await?
            .ok_or_else(|| AppError::not_found("conversation"))
    }

    /// Bump a conversation's `updated_at` without touching the title
    ///
    /// # Errors
    ///
    /// Returns `ResourceNotFound` if the conversation does not exist,
    /// otherwise database errors
    pub async fn touch_conversation(&self, id: &str) -> AppResult<ConversationRecord> {
        let now = now_rfc3339();

        let result = sqlx::query(
            r"
            UPDATE conversations
            SET updated_at = $1
            WHERE id = $2
            ",
        )
        .bind(&now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to touch conversation: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found("conversation"));
        }

        self.get_conversation(id)
            .await?
            .ok_or_else(|| AppError::not_found("conversation"))
    }

    /// Delete a conversation and, via FK cascade, its messages and indicators
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    pub async fn delete_conversation(&self, id: &str) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM conversations WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to delete conversation: {e}")))?;

        Ok(result.rows_affected() > 0)
    }

    // ========================================================================
    // Message Operations
    // ========================================================================

    /// Insert a message into a conversation
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    pub async fn create_message(
        &self,
        data: &NewMessage,
        role: MessageRole,
    ) -> AppResult<MessageRecord> {
        let id = Uuid::new_v4().to_string();
        let now = now_rfc3339();
        let role_str = role.as_str();

        sqlx::query(
            r"
            INSERT INTO messages
                (id, conversation_id, role, adversary_model, guard_config, kind, content, image_url, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9)
            ",
        )
        .bind(&id)
        .bind(&data.conversation_id)
        .bind(role_str)
        .bind(&data.adversary_model)
        .bind(&data.guard_config)
        .bind(&data.kind)
        .bind(&data.content)
        .bind(&data.image_url)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to create message: {e}")))?;

        Ok(MessageRecord {
            id,
            conversation_id: data.conversation_id.clone(),
            role: role_str.to_owned(),
            adversary_model: data.adversary_model.clone(),
            guard_config: data.guard_config.clone(),
            kind: data.kind.clone(),
            content: data.content.clone(),
            image_url: data.image_url.clone(),
            created_at: now.clone(),
            updated_at: now,
        })
    }

    /// Get all messages for a conversation in chronological order
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    pub async fn get_messages(&self, conversation_id: &str) -> AppResult<Vec<MessageRecord>> {
        // rowid breaks ties between rows inserted in the same microsecond
        let rows = sqlx::query(
            r"
            SELECT id, conversation_id, role, adversary_model, guard_config, kind,
                   content, image_url, created_at, updated_at
            FROM messages
            WHERE conversation_id = $1
            ORDER BY created_at ASC, rowid ASC
            ",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to get messages: {e}")))?;

        Ok(rows.into_iter().map(map_message_row).collect())
    }

    /// Get the last N messages for a conversation, newest first
    ///
    /// The descending order is part of the gateway contract; the history
    /// formatter owns the reversal into chronological order.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    pub async fn get_recent_messages(
        &self,
        conversation_id: &str,
        limit: i64,
    ) -> AppResult<Vec<MessageRecord>> {
        let rows = sqlx::query(
            r"
            SELECT id, conversation_id, role, adversary_model, guard_config, kind,
                   content, image_url, created_at, updated_at
            FROM messages
            WHERE conversation_id = $1
            ORDER BY created_at DESC, rowid DESC
            LIMIT $2
            ",
        )
        .bind(conversation_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to get recent messages: {e}")))?;

        Ok(rows.into_iter().map(map_message_row).collect())
    }

    /// Get a message by ID
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    pub async fn get_message(&self, id: &str) -> AppResult<Option<MessageRecord>> {
        let row = sqlx::query(
            r"
            SELECT id, conversation_id, role, adversary_model, guard_config, kind,
                   content, image_url, created_at, updated_at
            FROM messages
            WHERE id = $1
            ",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to get message: {e}")))?;

        Ok(row.map(map_message_row))
    }

    /// Count messages in a conversation
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    pub async fn message_count(&self, conversation_id: &str) -> AppResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) as count FROM messages WHERE conversation_id = $1")
            .bind(conversation_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to count messages: {e}")))?;

        Ok(row.get("count"))
    }

    // ========================================================================
    // Threat Indicator Operations
    // ========================================================================

    /// Create the threat indicator for an assistant message
    ///
    /// At most one indicator exists per message (UNIQUE constraint); a second
    /// insert for the same message surfaces as `ResourceAlreadyExists`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    pub async fn create_threat_indicator(
        &self,
        message_id: &str,
        is_threat: bool,
        description: &str,
    ) -> AppResult<ThreatIndicatorRecord> {
        let id = Uuid::new_v4().to_string();
        let now = now_rfc3339();

        sqlx::query(
            r"
            INSERT INTO threat_indicators (id, message_id, is_threat, description, user_description, created_at)
            VALUES ($1, $2, $3, $4, NULL, $5)
            ",
        )
        .bind(&id)
        .bind(message_id)
        .bind(is_threat)
        .bind(description)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if e.as_database_error().is_some_and(sqlx::error::DatabaseError::is_unique_violation) {
                AppError::already_exists("threat indicator")
            } else {
                AppError::database(format!("Failed to create threat indicator: {e}"))
            }
        })?;

        Ok(ThreatIndicatorRecord {
            id,
            message_id: message_id.to_owned(),
            is_threat,
            description: description.to_owned(),
            user_description: None,
            created_at: now,
        })
    }

    /// Get the threat indicator for a message
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    pub async fn get_threat_indicator_by_message(
        &self,
        message_id: &str,
    ) -> AppResult<Option<ThreatIndicatorRecord>> {
        let row = sqlx::query(
            r"
            SELECT id, message_id, is_threat, description, user_description, created_at
            FROM threat_indicators
            WHERE message_id = $1
            ",
        )
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to get threat indicator: {e}")))?;

        Ok(row.map(map_indicator_row))
    }

    /// Flip a message's threat flag and return the updated indicator
    ///
    /// # Errors
    ///
    /// Returns `ResourceNotFound` if the message has no indicator yet,
    /// otherwise database errors
    pub async fn toggle_threat_indicator(
        &self,
        message_id: &str,
    ) -> AppResult<ThreatIndicatorRecord> {
        let result = sqlx::query(
            r"
            UPDATE threat_indicators
            SET is_threat = NOT is_threat
            WHERE message_id = $1
            ",
        )
        .bind(message_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to toggle threat indicator: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found("threat indicator"));
        }

        self.get_threat_indicator_by_message(message_id)
            .await?
            .ok_or_else(|| AppError::not_found("threat indicator"))
    }

    /// Set the user-supplied override description on a message's indicator
    ///
    /// # Errors
    ///
    /// Returns `ResourceNotFound` if the message has no indicator yet,
    /// otherwise database errors
    pub async fn set_threat_user_description(
        &self,
        message_id: &str,
        user_description: &str,
    ) -> AppResult<ThreatIndicatorRecord> {
        let result = sqlx::query(
            r"
            UPDATE threat_indicators
            SET user_description = $1
            WHERE message_id = $2
            ",
        )
        .bind(user_description)
        .bind(message_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to update threat description: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found("threat indicator"));
        }

        self.get_threat_indicator_by_message(message_id)
            .await?
            .ok_or_else(|| AppError::not_found("threat indicator"))
    }
}

fn map_message_row(r: sqlx::sqlite::SqliteRow) -> MessageRecord {
    MessageRecord {
        id: r.get("id"),
        conversation_id: r.get("conversation_id"),
        role: r.get("role"),
        adversary_model: r.get("adversary_model"),
        guard_config: r.get("guard_config"),
        kind: r.get("kind"),
        content: r.get("content"),
        image_url: r.get("image_url"),
        created_at: r.get("created_at"),
        updated_at: r.get("updated_at"),
    }
}

fn map_indicator_row(r: sqlx::sqlite::SqliteRow) -> ThreatIndicatorRecord {
    ThreatIndicatorRecord {
        id: r.get("id"),
        message_id: r.get("message_id"),
        is_threat: r.get("is_threat"),
        description: r.get("description"),
        user_description: r.get("user_description"),
        created_at: r.get("created_at"),
    }
}
