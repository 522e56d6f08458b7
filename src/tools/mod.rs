// ABOUTME: Closed tool dispatch table exposed to the model during generation
// ABOUTME: Fixed enumeration of tool names, declared schemas, and sequential execution
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Colloquy Contributors

//! # Tool Surface
//!
//! The model selects among a fixed set of named tools. Dispatch is a closed
//! tagged enumeration: an unknown name coming back from the backend is a
//! fatal turn error, never silently ignored. Execution is strictly
//! sequential within a turn; handlers emit side-effect events onto the
//! turn's stream so the client observes tool activity in real time.

mod documents;
mod suggestions;
mod weather;

use serde_json::{json, Value};
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::database::DocumentStore;
use crate::errors::{AppError, AppResult};
use crate::llm::{LlmProvider, ToolDeclaration, ToolInvocation};
use crate::models::RequestHints;
use crate::streams::TurnEmitter;

/// The closed set of tools the model may invoke
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolName {
    /// Forecast lookup
    GetWeather,
    /// Create a document artifact
    CreateDocument,
    /// Update an existing document artifact
    UpdateDocument,
    /// Generate improvement suggestions for a document
    RequestSuggestions,
}

impl ToolName {
    /// Every tool, in declaration order
    pub const ALL: [Self; 4] = [
        Self::GetWeather,
        Self::CreateDocument,
        Self::UpdateDocument,
        Self::RequestSuggestions,
    ];

    /// Wire name the model uses
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::GetWeather => "get_weather",
            Self::CreateDocument => "create_document",
            Self::UpdateDocument => "update_document",
            Self::RequestSuggestions => "request_suggestions",
        }
    }
}

impl FromStr for ToolName {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "get_weather" => Ok(Self::GetWeather),
            "create_document" => Ok(Self::CreateDocument),
            "update_document" => Ok(Self::UpdateDocument),
            "request_suggestions" => Ok(Self::RequestSuggestions),
            other => Err(AppError::internal(format!(
                "Backend requested unknown tool: {other}"
            ))),
        }
    }
}

/// Per-turn context handed to tool handlers
pub struct ToolContext {
    /// Document store for the document tools
    pub documents: Arc<DocumentStore>,
    /// Backend provider for tools that consult the model
    pub provider: Arc<dyn LlmProvider>,
    /// Backend model id for provider-consulting tools
    pub backend_model: String,
    /// Caller identity; documents are owned
    pub user_id: Uuid,
    /// Request hints (weather falls back to caller coordinates)
    pub hints: RequestHints,
    /// Write side of the turn's stream for side-effect events
    pub emitter: TurnEmitter,
}

/// Tool declarations and dispatch
pub struct ToolRegistry {
    http: reqwest::Client,
}

impl ToolRegistry {
    /// Create a registry with its own HTTP client
    #[must_use]
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    /// Declarations shipped to the backend with each step
    #[must_use]
    pub fn declarations() -> Vec<ToolDeclaration> {
        vec![
            ToolDeclaration {
                name: ToolName::GetWeather.as_str().to_owned(),
                description: "Get the current weather and forecast for a location".to_owned(),
                parameters: Some(json!({
                    "type": "object",
                    "properties": {
                        "latitude": {"type": "number"},
                        "longitude": {"type": "number"}
                    }
                })),
            },
            ToolDeclaration {
                name: ToolName::CreateDocument.as_str().to_owned(),
                description: "Create a document for writing or content creation activities"
                    .to_owned(),
                parameters: Some(json!({
                    "type": "object",
                    "properties": {
                        "title": {"type": "string"},
                        "kind": {"type": "string", "enum": ["text", "code"]},
                        "content": {"type": "string"}
                    },
                    "required": ["title", "content"]
                })),
            },
            ToolDeclaration {
                name: ToolName::UpdateDocument.as_str().to_owned(),
                description: "Update an existing document with new content".to_owned(),
                parameters: Some(json!({
                    "type": "object",
                    "properties": {
                        "id": {"type": "string"},
                        "content": {"type": "string"}
                    },
                    "required": ["id", "content"]
                })),
            },
            ToolDeclaration {
                name: ToolName::RequestSuggestions.as_str().to_owned(),
                description: "Request improvement suggestions for an existing document".to_owned(),
                parameters: Some(json!({
                    "type": "object",
                    "properties": {
                        "documentId": {"type": "string"}
                    },
                    "required": ["documentId"]
                })),
            },
        ]
    }

    /// Execute one tool invocation
    ///
    /// # Errors
    ///
    /// Returns an error for unknown tool names and for systemic failures
    /// (store or backend errors). Recoverable lookup failures are returned
    /// as `{"error": ...}` results so the model can react.
    pub async fn execute(&self, ctx: &ToolContext, call: &ToolInvocation) -> AppResult<Value> {
        let name = ToolName::from_str(&call.name)?;
        info!(tool = name.as_str(), "Executing tool");

        match name {
            ToolName::GetWeather => {
                Ok(weather::get_weather(&self.http, &call.args, &ctx.hints).await)
            }
            ToolName::CreateDocument => documents::create_document(ctx, &call.args).await,
            ToolName::UpdateDocument => documents::update_document(ctx, &call.args).await,
            ToolName::RequestSuggestions => suggestions::request_suggestions(ctx, &call.args).await,
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
