// ABOUTME: Document store backing the create/update/suggestions tools
// ABOUTME: Versioned rows keyed by (id, created_at); latest version wins on read
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Colloquy Contributors

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::errors::{AppError, AppResult};

/// A persisted document version
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    /// Document id, stable across versions
    pub id: Uuid,
    /// Owning user id
    pub user_id: Uuid,
    /// Document title
    pub title: String,
    /// Document kind (text, code, ...)
    pub kind: String,
    /// Document content
    pub content: String,
    /// Version timestamp
    pub created_at: DateTime<Utc>,
}

/// Document store over a `SQLite` pool
#[derive(Clone)]
pub struct DocumentStore {
    pool: SqlitePool,
}

impl DocumentStore {
    /// Create a new document store
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Persist a document version
    ///
    /// The first write for an id creates the document; subsequent writes
    /// with the same id append versions.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub async fn save(
        &self,
        id: Uuid,
        user_id: Uuid,
        title: &str,
        kind: &str,
        content: &str,
    ) -> AppResult<DocumentRecord> {
        let now = Utc::now();

        sqlx::query(
            r"
            INSERT INTO documents (id, user_id, title, kind, content, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ",
        )
        .bind(id.to_string())
        .bind(user_id.to_string())
        .bind(title)
        .bind(kind)
        .bind(content)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to save document: {e}")))?;

        Ok(DocumentRecord {
            id,
            user_id,
            title: title.to_owned(),
            kind: kind.to_owned(),
            content: content.to_owned(),
            created_at: now,
        })
    }

    /// Latest version of a document
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a stored value is malformed.
    pub async fn get_latest(&self, id: Uuid) -> AppResult<Option<DocumentRecord>> {
        let row = sqlx::query(
            r"
            SELECT id, user_id, title, kind, content, created_at
            FROM documents
            WHERE id = $1
            ORDER BY created_at DESC
            LIMIT 1
            ",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to get document: {e}")))?;

        row.map(|r| {
            Ok(DocumentRecord {
                id: parse_uuid(&r.get::<String, _>("id"))?,
                user_id: parse_uuid(&r.get::<String, _>("user_id"))?,
                title: r.get("title"),
                kind: r.get("kind"),
                content: r.get("content"),
                created_at: r.get("created_at"),
            })
        })
        .transpose()
    }
}

fn parse_uuid(raw: &str) -> AppResult<Uuid> {
    Uuid::parse_str(raw)
        .map_err(|e| AppError::database(format!("Malformed id in database: {e}")))
}
