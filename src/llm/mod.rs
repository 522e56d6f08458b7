// ABOUTME: LLM backend abstraction with streaming steps and tool calling
// ABOUTME: Defines the provider contract consumed by the turn orchestrator
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Colloquy Contributors

//! # LLM Backend Interface
//!
//! One *step* is a single streaming completion request. The orchestrator
//! chains steps: when a step finishes with tool calls, their results are
//! folded back into the message list and the next step begins.
//!
//! ## Key Concepts
//!
//! - **`LlmMessage`**: role-based message sent to the backend
//! - **`StepRequest`**: model, messages, and tool declarations for one step
//! - **`StepEvent`**: incremental output (text delta, tool call, finish)
//! - **`LlmProvider`**: async trait implemented by backends

mod openai_compatible;
/// System prompt construction
pub mod prompts;
/// Shared SSE line-buffering parser for backend streams
pub mod sse_parser;

pub use openai_compatible::{OpenAiCompatibleConfig, OpenAiCompatibleProvider};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::pin::Pin;
use tokio_stream::Stream;

use crate::errors::AppError;

// ============================================================================
// Message Types
// ============================================================================

/// Role of a message sent to the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmRole {
    /// System instruction message
    System,
    /// User input message
    User,
    /// Assistant response message
    Assistant,
}

impl LlmRole {
    /// String representation for API calls
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// A single message in a backend conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmMessage {
    /// Role of the sender
    pub role: LlmRole,
    /// Message content
    pub content: String,
}

impl LlmMessage {
    /// Create a new message
    #[must_use]
    pub fn new(role: LlmRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    /// Create a system message
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(LlmRole::System, content)
    }

    /// Create a user message
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(LlmRole::User, content)
    }

    /// Create an assistant message
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(LlmRole::Assistant, content)
    }

    /// Fold a tool result back into the conversation for the next step
    #[must_use]
    pub fn tool_result(tool_name: &str, output: &Value) -> Self {
        let serialized = serde_json::to_string(output).unwrap_or_else(|_| "{}".to_owned());
        Self::user(format!("[Tool Result for {tool_name}]: {serialized}"))
    }
}

// ============================================================================
// Tool Declarations
// ============================================================================

/// A tool made available to the backend for one step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDeclaration {
    /// Tool name the model invokes
    pub name: String,
    /// Human-readable description guiding tool selection
    pub description: String,
    /// JSON schema of the arguments
    pub parameters: Option<Value>,
}

/// A complete tool invocation emitted by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    /// Backend-assigned correlation id
    pub id: String,
    /// Tool name as emitted by the model
    pub name: String,
    /// Parsed arguments
    pub args: Value,
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Configuration for one generation step
#[derive(Debug, Clone)]
pub struct StepRequest {
    /// Conversation messages
    pub messages: Vec<LlmMessage>,
    /// Backend model identifier
    pub model: String,
    /// Tools offered to the model; empty disables tool calling
    pub tools: Vec<ToolDeclaration>,
    /// Temperature for response randomness
    pub temperature: Option<f32>,
    /// Maximum tokens to generate
    pub max_tokens: Option<u32>,
}

impl StepRequest {
    /// Create a step request with messages and a model
    #[must_use]
    pub const fn new(messages: Vec<LlmMessage>, model: String) -> Self {
        Self {
            messages,
            model,
            tools: Vec::new(),
            temperature: None,
            max_tokens: None,
        }
    }

    /// Offer tools to the model
    #[must_use]
    pub fn with_tools(mut self, tools: Vec<ToolDeclaration>) -> Self {
        self.tools = tools;
        self
    }
}

/// Token usage statistics reported by the backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Number of tokens in the prompt
    pub prompt_tokens: u32,
    /// Number of tokens in the completion
    pub completion_tokens: u32,
    /// Total tokens used
    pub total_tokens: u32,
}

impl TokenUsage {
    /// Accumulate usage across steps of one turn
    pub fn accumulate(&mut self, other: Self) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// Incremental output of a streaming step
#[derive(Debug, Clone, PartialEq)]
pub enum StepEvent {
    /// A fragment of generated text
    TextDelta(String),
    /// A complete tool invocation (emitted once all argument fragments arrive)
    ToolCall(ToolInvocation),
    /// Step finished
    Finish {
        /// Usage for this step, if reported
        usage: Option<TokenUsage>,
        /// Backend finish reason (stop, `tool_calls`, length, ...)
        finish_reason: Option<String>,
    },
}

/// Non-streaming completion response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    /// Generated content
    pub content: String,
    /// Usage, if reported
    pub usage: Option<TokenUsage>,
    /// Finish reason
    pub finish_reason: Option<String>,
}

/// Stream of step events
pub type StepStream = Pin<Box<dyn Stream<Item = Result<StepEvent, AppError>> + Send>>;

// ============================================================================
// Provider Trait
// ============================================================================

/// LLM backend contract
///
/// Implement this trait to drive turns against a new backend. The design
/// follows the async trait pattern for compatibility with the tokio runtime.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Unique provider identifier (e.g. "openai-compatible")
    fn name(&self) -> &'static str;

    /// Run one streaming generation step
    ///
    /// # Errors
    ///
    /// Returns an error if the backend request cannot be started. Errors
    /// after the stream begins are carried inside the stream items.
    async fn stream_step(&self, request: &StepRequest) -> Result<StepStream, AppError>;

    /// Perform a non-streaming completion (used by tools that consult the model)
    ///
    /// # Errors
    ///
    /// Returns an error if the backend call fails.
    async fn complete(&self, request: &StepRequest) -> Result<CompletionResponse, AppError>;

    /// Check that the backend is reachable and credentials are valid
    ///
    /// # Errors
    ///
    /// Returns an error if the health probe cannot be performed.
    async fn health_check(&self) -> Result<bool, AppError>;
}
