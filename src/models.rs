// ABOUTME: Core domain types for chats, messages, message parts, and request hints
// ABOUTME: Wire-format and database-record shapes shared across routes and stores
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Colloquy Contributors

//! Domain model types
//!
//! A chat is a titled, owned conversation; a message is an immutable ordered
//! sequence of content parts. Parts carry generated text, tool invocations,
//! tool results, and file attachments.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::errors::AppError;

/// Maximum length of a derived chat title
const MAX_TITLE_CHARS: usize = 80;

// ============================================================================
// Chat
// ============================================================================

/// Chat visibility
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    /// Visible to the owner only
    Private,
    /// Readable by anyone with the id
    Public,
}

impl Visibility {
    /// String representation for storage
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Private => "private",
            Self::Public => "public",
        }
    }
}

impl FromStr for Visibility {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "private" => Ok(Self::Private),
            "public" => Ok(Self::Public),
            other => Err(AppError::bad_request(format!(
                "Unrecognized visibility: {other}"
            ))),
        }
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted chat record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRecord {
    /// Chat id
    pub id: Uuid,
    /// Owning user id
    pub user_id: Uuid,
    /// Title derived from the first user message
    pub title: String,
    /// Visibility
    pub visibility: Visibility,
    /// Usage summary of the most recent completed turn, if any
    pub last_context: Option<Value>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Messages
// ============================================================================

/// Role of a message in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// User input message
    User,
    /// Assistant response message
    Assistant,
    /// Tool output message
    Tool,
}

impl MessageRole {
    /// String representation for storage and API calls
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

impl FromStr for MessageRole {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "tool" => Ok(Self::Tool),
            other => Err(AppError::bad_request(format!("Unrecognized role: {other}"))),
        }
    }
}

/// One content part of a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum MessagePart {
    /// Plain text content
    Text {
        /// The text
        text: String,
    },
    /// A tool invocation requested by the model
    ToolCall {
        /// Correlation id for the invocation
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        /// Tool name
        #[serde(rename = "toolName")]
        tool_name: String,
        /// Arguments as supplied by the model
        args: Value,
    },
    /// The result of a tool invocation
    ToolResult {
        /// Correlation id matching the invocation
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        /// Tool name
        #[serde(rename = "toolName")]
        tool_name: String,
        /// Tool output
        output: Value,
    },
    /// A file attachment reference
    File {
        /// Where the file lives
        url: String,
        /// MIME type
        #[serde(rename = "mediaType")]
        media_type: String,
        /// Display name
        #[serde(default)]
        name: Option<String>,
    },
}

impl MessagePart {
    /// Text content of this part, if it is a text part
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// A persisted message record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Message id
    pub id: Uuid,
    /// Parent chat id
    pub chat_id: Uuid,
    /// Role of the sender
    pub role: MessageRole,
    /// Ordered content parts
    pub parts: Vec<MessagePart>,
    /// Creation timestamp; sequence order within a chat
    pub created_at: DateTime<Utc>,
}

/// A message to be appended, before persistence assigns a timestamp
#[derive(Debug, Clone)]
pub struct NewMessage {
    /// Message id (client-assigned for user messages, generated otherwise)
    pub id: Uuid,
    /// Parent chat id
    pub chat_id: Uuid,
    /// Role of the sender
    pub role: MessageRole,
    /// Ordered content parts
    pub parts: Vec<MessagePart>,
}

/// Derive a chat title from the first user message
///
/// Takes the first text part, collapses whitespace, and truncates on a word
/// boundary. Falls back to a fixed title when the message has no text.
#[must_use]
pub fn derive_title(parts: &[MessagePart]) -> String {
    let Some(text) = parts.iter().find_map(MessagePart::as_text) else {
        return "New chat".to_owned();
    };

    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return "New chat".to_owned();
    }
    if collapsed.chars().count() <= MAX_TITLE_CHARS {
        return collapsed;
    }

    let mut title = String::new();
    for word in collapsed.split(' ') {
        if title.chars().count() + word.chars().count() + 1 > MAX_TITLE_CHARS {
            break;
        }
        if !title.is_empty() {
            title.push(' ');
        }
        title.push_str(word);
    }
    if title.is_empty() {
        // Single word longer than the cap
        collapsed.chars().take(MAX_TITLE_CHARS).collect()
    } else {
        title
    }
}

// ============================================================================
// Chat model selection
// ============================================================================

/// The chat model surface exposed to clients
///
/// Client-facing identifiers are decoupled from backend model ids, which are
/// configured per deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChatModel {
    /// Default chat model
    #[serde(rename = "chat-model")]
    Default,
    /// Reasoning-capable chat model
    #[serde(rename = "chat-model-reasoning")]
    Reasoning,
}

impl ChatModel {
    /// Client-facing identifier
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Default => "chat-model",
            Self::Reasoning => "chat-model-reasoning",
        }
    }
}

impl FromStr for ChatModel {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chat-model" => Ok(Self::Default),
            "chat-model-reasoning" => Ok(Self::Reasoning),
            other => Err(AppError::bad_request(format!(
                "Unrecognized chat model: {other}"
            ))),
        }
    }
}

// ============================================================================
// Request hints
// ============================================================================

/// Request-derived hints threaded into the system prompt
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestHints {
    /// Caller city from forwarding headers
    pub city: Option<String>,
    /// Caller country from forwarding headers
    pub country: Option<String>,
    /// Caller latitude from forwarding headers
    pub latitude: Option<f64>,
    /// Caller longitude from forwarding headers
    pub longitude: Option<f64>,
    /// Preferred locale from `Accept-Language`
    pub locale: Option<String>,
}
