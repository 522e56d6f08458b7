// ABOUTME: Suggestion generation tool consulting the backend over a stored document
// ABOUTME: Non-streaming completion parsed into a list of improvement suggestions
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Colloquy Contributors

use serde_json::{json, Value};
use uuid::Uuid;

use super::ToolContext;
use crate::errors::AppResult;
use crate::llm::{LlmMessage, StepRequest};

const SUGGESTIONS_PROMPT: &str = "\
You are a writing assistant. Given a document, list concrete improvement \
suggestions, one per line, at most five. Respond with the suggestions only.";

/// Ask the backend for improvement suggestions on a document
///
/// # Errors
///
/// Returns an error if the store read or the backend completion fails.
pub async fn request_suggestions(ctx: &ToolContext, args: &Value) -> AppResult<Value> {
    let Some(id) = args
        .get("documentId")
        .and_then(Value::as_str)
        .and_then(|raw| Uuid::parse_str(raw).ok())
    else {
        return Ok(json!({"error": "A valid documentId is required"}));
    };

    let Some(document) = ctx.documents.get_latest(id).await? else {
        return Ok(json!({"error": "Document not found"}));
    };
    if document.user_id != ctx.user_id {
        return Ok(json!({"error": "Document belongs to another user"}));
    }

    let request = StepRequest::new(
        vec![
            LlmMessage::system(SUGGESTIONS_PROMPT),
            LlmMessage::user(document.content),
        ],
        ctx.backend_model.clone(),
    );

    let response = ctx.provider.complete(&request).await?;

    let suggestions: Vec<String> = response
        .content
        .lines()
        .map(|line| line.trim_start_matches(['-', '*', ' ']).trim().to_owned())
        .filter(|line| !line.is_empty())
        .take(5)
        .collect();

    Ok(json!({
        "documentId": id,
        "suggestions": suggestions,
    }))
}
