// ABOUTME: Embedded SQLite schema and startup migration
// ABOUTME: Idempotent DDL creating chats, messages, stream_ids, and documents tables
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Colloquy Contributors

use sqlx::SqlitePool;

use crate::errors::{AppError, AppResult};

/// Idempotent schema statements, applied in order on startup
const SCHEMA: &[&str] = &[
    r"
    CREATE TABLE IF NOT EXISTS chats (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        title TEXT NOT NULL,
        visibility TEXT NOT NULL DEFAULT 'private',
        last_context TEXT,
        created_at TEXT NOT NULL
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS messages (
        id TEXT PRIMARY KEY,
        chat_id TEXT NOT NULL,
        role TEXT NOT NULL,
        parts TEXT NOT NULL,
        created_at TEXT NOT NULL
    )
    ",
    r"
    CREATE INDEX IF NOT EXISTS idx_messages_chat_created
        ON messages(chat_id, created_at)
    ",
    r"
    CREATE INDEX IF NOT EXISTS idx_chats_user ON chats(user_id)
    ",
    r"
    CREATE TABLE IF NOT EXISTS stream_ids (
        id TEXT PRIMARY KEY,
        chat_id TEXT NOT NULL,
        created_at TEXT NOT NULL
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS documents (
        id TEXT NOT NULL,
        user_id TEXT NOT NULL,
        title TEXT NOT NULL,
        kind TEXT NOT NULL,
        content TEXT NOT NULL,
        created_at TEXT NOT NULL,
        PRIMARY KEY (id, created_at)
    )
    ",
];

/// Apply the embedded schema to a pool
///
/// # Errors
///
/// Returns an error if any DDL statement fails.
pub async fn migrate(pool: &SqlitePool) -> AppResult<()> {
    for statement in SCHEMA {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(|e| AppError::database(format!("Schema migration failed: {e}")))?;
    }
    Ok(())
}
