// ABOUTME: Document creation and update tools with side-effect stream events
// ABOUTME: Ownership-checked writes; each version is emitted as a data-document event
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Colloquy Contributors

use serde_json::{json, Value};
use uuid::Uuid;

use super::ToolContext;
use crate::database::DocumentRecord;
use crate::errors::AppResult;
use crate::streams::TurnEvent;

/// Create a new document owned by the caller
///
/// The document lands in the store and on the stream as a `data-document`
/// event, so the client renders the artifact while generation continues.
///
/// # Errors
///
/// Returns an error if the store write fails.
pub async fn create_document(ctx: &ToolContext, args: &Value) -> AppResult<Value> {
    let title = string_arg(args, "title").unwrap_or_else(|| "Untitled".to_owned());
    let kind = string_arg(args, "kind").unwrap_or_else(|| "text".to_owned());
    let content = string_arg(args, "content").unwrap_or_default();

    let document = ctx
        .documents
        .save(Uuid::new_v4(), ctx.user_id, &title, &kind, &content)
        .await?;

    emit_document_event(ctx, &document).await;

    Ok(json!({
        "id": document.id,
        "title": document.title,
        "kind": document.kind,
        "message": "A document was created and is now visible to the user"
    }))
}

/// Update an existing document with new content
///
/// Appends a new version; the previous version remains in the store.
///
/// # Errors
///
/// Returns an error if the store read or write fails.
pub async fn update_document(ctx: &ToolContext, args: &Value) -> AppResult<Value> {
    let Some(id) = string_arg(args, "id").and_then(|raw| Uuid::parse_str(&raw).ok()) else {
        return Ok(json!({"error": "A valid document id is required"}));
    };
    let content = string_arg(args, "content").unwrap_or_default();

    let Some(existing) = ctx.documents.get_latest(id).await? else {
        return Ok(json!({"error": "Document not found"}));
    };
    if existing.user_id != ctx.user_id {
        return Ok(json!({"error": "Document belongs to another user"}));
    }

    let document = ctx
        .documents
        .save(id, ctx.user_id, &existing.title, &existing.kind, &content)
        .await?;

    emit_document_event(ctx, &document).await;

    Ok(json!({
        "id": document.id,
        "title": document.title,
        "kind": document.kind,
        "message": "The document has been updated"
    }))
}

async fn emit_document_event(ctx: &ToolContext, document: &DocumentRecord) {
    ctx.emitter
        .emit(&TurnEvent::DataDocument {
            data: json!({
                "id": document.id,
                "title": document.title,
                "kind": document.kind,
                "content": document.content,
            }),
        })
        .await;
}

fn string_arg(args: &Value, key: &str) -> Option<String> {
    args.get(key).and_then(Value::as_str).map(ToOwned::to_owned)
}
