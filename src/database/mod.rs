// ABOUTME: Persistence layer for chats, messages, stream handles, and documents
// ABOUTME: SQLite via sqlx with append-only message writes and embedded schema setup
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Colloquy Contributors

//! Database layer
//!
//! All message writes are append-only and idempotent per message id; chat
//! metadata updates are last-write-wins.

/// Chat and message store operations
pub mod chat;
/// Document store operations backing the document tools
pub mod documents;
/// Embedded schema definition and migration
pub mod schema;

pub use chat::ChatStore;
pub use documents::{DocumentRecord, DocumentStore};
pub use schema::migrate;
