// ABOUTME: Chat and message store over SQLite with append-only message writes
// ABOUTME: Idempotent per-message-id appends, quota counting, and stream handle records
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Colloquy Contributors

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use uuid::Uuid;

use crate::errors::{AppError, AppResult};
use crate::models::{ChatRecord, MessagePart, MessageRecord, MessageRole, NewMessage, Visibility};

/// Chat store over a `SQLite` pool
#[derive(Clone)]
pub struct ChatStore {
    pool: SqlitePool,
}

impl ChatStore {
    /// Create a new chat store
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    // ========================================================================
    // Chat operations
    // ========================================================================

    /// Create a chat owned by a user
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub async fn create_chat(
        &self,
        id: Uuid,
        user_id: Uuid,
        title: &str,
        visibility: Visibility,
    ) -> AppResult<ChatRecord> {
        let now = Utc::now();

        sqlx::query(
            r"
            INSERT INTO chats (id, user_id, title, visibility, last_context, created_at)
            VALUES ($1, $2, $3, $4, NULL, $5)
            ",
        )
        .bind(id.to_string())
        .bind(user_id.to_string())
        .bind(title)
        .bind(visibility.as_str())
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to create chat: {e}")))?;

        Ok(ChatRecord {
            id,
            user_id,
            title: title.to_owned(),
            visibility,
            last_context: None,
            created_at: now,
        })
    }

    /// Get a chat by id
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a stored value is malformed.
    pub async fn get_chat(&self, id: Uuid) -> AppResult<Option<ChatRecord>> {
        let row = sqlx::query(
            r"
            SELECT id, user_id, title, visibility, last_context, created_at
            FROM chats
            WHERE id = $1
            ",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to get chat: {e}")))?;

        row.map(|r| chat_from_row(&r)).transpose()
    }

    /// List a user's chats, most recently created first
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn list_chats(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> AppResult<Vec<ChatRecord>> {
        let rows = sqlx::query(
            r"
            SELECT id, user_id, title, visibility, last_context, created_at
            FROM chats
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            ",
        )
        .bind(user_id.to_string())
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to list chats: {e}")))?;

        rows.iter().map(chat_from_row).collect()
    }

    /// Overwrite the chat's usage context (last-write-wins)
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn update_last_context(&self, chat_id: Uuid, context: &Value) -> AppResult<()> {
        let serialized = serde_json::to_string(context)
            .map_err(|e| AppError::internal(format!("Failed to serialize usage context: {e}")))?;

        sqlx::query(
            r"
            UPDATE chats SET last_context = $1 WHERE id = $2
            ",
        )
        .bind(serialized)
        .bind(chat_id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to update usage context: {e}")))?;

        Ok(())
    }

    /// Delete a chat with its messages and stream handles, returning the record
    ///
    /// # Errors
    ///
    /// Returns `not_found` if the chat does not exist, or a database error.
    pub async fn delete_chat(&self, id: Uuid) -> AppResult<ChatRecord> {
        let chat = self
            .get_chat(id)
            .await?
            .ok_or_else(|| AppError::not_found("Chat"))?;

        let id_text = id.to_string();
        sqlx::query("DELETE FROM messages WHERE chat_id = $1")
            .bind(&id_text)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to delete messages: {e}")))?;
        sqlx::query("DELETE FROM stream_ids WHERE chat_id = $1")
            .bind(&id_text)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to delete stream handles: {e}")))?;
        sqlx::query("DELETE FROM chats WHERE id = $1")
            .bind(&id_text)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to delete chat: {e}")))?;

        Ok(chat)
    }

    // ========================================================================
    // Message operations
    // ========================================================================

    /// Append messages, idempotent per message id
    ///
    /// Re-appending an already-persisted id is a no-op, so a retried turn
    /// cannot duplicate the user message.
    ///
    /// # Errors
    ///
    /// Returns an error if an insert fails.
    pub async fn append_messages(&self, messages: &[NewMessage]) -> AppResult<()> {
        let base = Utc::now();

        for (index, message) in messages.iter().enumerate() {
            let parts = serde_json::to_string(&message.parts)
                .map_err(|e| AppError::internal(format!("Failed to serialize parts: {e}")))?;
            // Microsecond offsets keep batch members in insertion order.
            let created_at = base + Duration::microseconds(index as i64);

            sqlx::query(
                r"
                INSERT INTO messages (id, chat_id, role, parts, created_at)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (id) DO NOTHING
                ",
            )
            .bind(message.id.to_string())
            .bind(message.chat_id.to_string())
            .bind(message.role.as_str())
            .bind(parts)
            .bind(created_at)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to append message: {e}")))?;
        }

        Ok(())
    }

    /// Get all messages of a chat in creation order
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a stored value is malformed.
    pub async fn get_messages(&self, chat_id: Uuid) -> AppResult<Vec<MessageRecord>> {
        let rows = sqlx::query(
            r"
            SELECT id, chat_id, role, parts, created_at
            FROM messages
            WHERE chat_id = $1
            ORDER BY created_at ASC
            ",
        )
        .bind(chat_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to get messages: {e}")))?;

        rows.iter().map(message_from_row).collect()
    }

    /// Count of messages in a chat
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn count_messages(&self, chat_id: Uuid) -> AppResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM messages WHERE chat_id = $1")
            .bind(chat_id.to_string())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to count messages: {e}")))?;
        Ok(row.get("count"))
    }

    /// Count a user's messages with a given role over a trailing window
    ///
    /// Used by the entitlement gate with `role = user` and a 24 h window.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn count_user_messages_since(
        &self,
        user_id: Uuid,
        role: MessageRole,
        window: Duration,
    ) -> AppResult<i64> {
        let cutoff: DateTime<Utc> = Utc::now() - window;

        let row = sqlx::query(
            r"
            SELECT COUNT(m.id) AS count
            FROM messages m
            JOIN chats c ON c.id = m.chat_id
            WHERE c.user_id = $1 AND m.role = $2 AND m.created_at > $3
            ",
        )
        .bind(user_id.to_string())
        .bind(role.as_str())
        .bind(cutoff)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to count user messages: {e}")))?;

        Ok(row.get("count"))
    }

    // ========================================================================
    // Stream handle operations
    // ========================================================================

    /// Record a stream handle for a chat
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub async fn record_stream_id(&self, stream_id: Uuid, chat_id: Uuid) -> AppResult<()> {
        sqlx::query(
            r"
            INSERT INTO stream_ids (id, chat_id, created_at)
            VALUES ($1, $2, $3)
            ",
        )
        .bind(stream_id.to_string())
        .bind(chat_id.to_string())
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to record stream handle: {e}")))?;

        Ok(())
    }

    /// Most recently recorded stream handle for a chat
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn latest_stream_id(&self, chat_id: Uuid) -> AppResult<Option<Uuid>> {
        let row = sqlx::query(
            r"
            SELECT id FROM stream_ids
            WHERE chat_id = $1
            ORDER BY created_at DESC
            LIMIT 1
            ",
        )
        .bind(chat_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to get stream handle: {e}")))?;

        row.map(|r| parse_uuid(&r.get::<String, _>("id"))).transpose()
    }
}

// ============================================================================
// Row mapping
// ============================================================================

fn parse_uuid(raw: &str) -> AppResult<Uuid> {
    Uuid::parse_str(raw)
        .map_err(|e| AppError::database(format!("Malformed id in database: {e}")))
}

fn chat_from_row(row: &sqlx::sqlite::SqliteRow) -> AppResult<ChatRecord> {
    let last_context: Option<String> = row.get("last_context");
    let last_context = last_context
        .map(|raw| {
            serde_json::from_str(&raw)
                .map_err(|e| AppError::database(format!("Malformed usage context: {e}")))
        })
        .transpose()?;

    Ok(ChatRecord {
        id: parse_uuid(&row.get::<String, _>("id"))?,
        user_id: parse_uuid(&row.get::<String, _>("user_id"))?,
        title: row.get("title"),
        visibility: Visibility::from_str(&row.get::<String, _>("visibility"))
            .map_err(|e| AppError::database(format!("Malformed visibility: {e}")))?,
        last_context,
        created_at: row.get("created_at"),
    })
}

fn message_from_row(row: &sqlx::sqlite::SqliteRow) -> AppResult<MessageRecord> {
    let parts: Vec<MessagePart> = serde_json::from_str(&row.get::<String, _>("parts"))
        .map_err(|e| AppError::database(format!("Malformed message parts: {e}")))?;

    Ok(MessageRecord {
        id: parse_uuid(&row.get::<String, _>("id"))?,
        chat_id: parse_uuid(&row.get::<String, _>("chat_id"))?,
        role: MessageRole::from_str(&row.get::<String, _>("role"))
            .map_err(|e| AppError::database(format!("Malformed role: {e}")))?,
        parts,
        created_at: row.get("created_at"),
    })
}
