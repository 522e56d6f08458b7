// ABOUTME: Turn orchestrator driving the bounded generation/tool loop for one chat turn
// ABOUTME: Owns the per-chat lease, the 5-step ceiling, completion persistence, and failure events
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Colloquy Contributors

//! # Turn Orchestration
//!
//! A turn moves through `validating → authorizing → loading-context →
//! generating(0..5) → {completing | failing}`. The first three phases live
//! in the route handler; this module owns generation onward.
//!
//! Each generation step is one streaming backend request. A step ending in
//! tool calls has them executed strictly sequentially, their results folded
//! back into the context, and the next step begins, up to
//! [`MAX_GENERATION_STEPS`]. Completion persists all produced parts as one
//! assistant message and reconciles usage; any failure after streaming
//! began emits a single generic error event and persists nothing.

use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::StreamExt;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::context::ServerResources;
use crate::errors::{AppError, AppResult};
use crate::llm::{LlmMessage, StepEvent, StepRequest, StepStream, TokenUsage, ToolInvocation};
use crate::models::{ChatModel, MessagePart, MessageRecord, MessageRole, NewMessage, RequestHints};
use crate::streams::{TurnEmitter, TurnEvent};
use crate::tools::{ToolContext, ToolRegistry};
use crate::usage;

/// Step-count ceiling per turn; forces termination even under unbounded
/// tool chaining by the model
pub const MAX_GENERATION_STEPS: usize = 5;

// ============================================================================
// Turn state machine
// ============================================================================

/// Phase of a turn, for tracing and diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    /// Request body is being validated
    Validating,
    /// Caller identity and quota are being checked
    Authorizing,
    /// Chat record and history are being loaded
    LoadingContext,
    /// Generation step `n` is running
    Generating(usize),
    /// Persisting the assistant message and usage
    Completing,
    /// Emitting the terminal error event
    Failing,
}

impl fmt::Display for TurnPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validating => f.write_str("validating"),
            Self::Authorizing => f.write_str("authorizing"),
            Self::LoadingContext => f.write_str("loading-context"),
            Self::Generating(step) => write!(f, "generating({step})"),
            Self::Completing => f.write_str("completing"),
            Self::Failing => f.write_str("failing"),
        }
    }
}

// ============================================================================
// Per-chat turn leases
// ============================================================================

/// In-process per-chat mutual exclusion for turns
///
/// Two concurrent turns on one chat id are not arbitrated by the store; the
/// lease rejects the second with `conflict` instead of racing the last
/// assistant message.
#[derive(Clone, Default)]
pub struct TurnLeases {
    inner: Arc<DashMap<Uuid, Uuid>>,
}

impl TurnLeases {
    /// Create an empty lease table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lease for a chat
    ///
    /// # Errors
    ///
    /// Returns `conflict` if another turn holds the lease.
    pub fn acquire(&self, chat_id: Uuid, stream_id: Uuid) -> AppResult<TurnLease> {
        match self.inner.entry(chat_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(AppError::conflict(
                "A turn is already in progress for this chat",
            )),
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(stream_id);
                Ok(TurnLease {
                    map: self.inner.clone(),
                    chat_id,
                })
            }
        }
    }
}

/// Held lease for one chat's in-flight turn; released on drop
pub struct TurnLease {
    map: Arc<DashMap<Uuid, Uuid>>,
    chat_id: Uuid,
}

impl Drop for TurnLease {
    fn drop(&mut self) {
        self.map.remove(&self.chat_id);
    }
}

// ============================================================================
// Turn parameters and context building
// ============================================================================

/// Inputs to one turn's generation loop
pub struct TurnParams {
    /// Chat the turn belongs to
    pub chat_id: Uuid,
    /// Caller identity
    pub user_id: Uuid,
    /// Client-facing model selection
    pub model: ChatModel,
    /// Resolved backend model id
    pub backend_model: String,
    /// Request-derived hints
    pub hints: RequestHints,
}

/// Assemble backend messages from the system prompt, prior history, and the
/// new user message
#[must_use]
pub fn build_llm_messages(
    system_prompt: &str,
    history: &[MessageRecord],
    new_message_parts: &[MessagePart],
) -> Vec<LlmMessage> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(LlmMessage::system(system_prompt));

    for record in history {
        let text = joined_text(&record.parts);
        if text.is_empty() {
            continue;
        }
        match record.role {
            MessageRole::User => messages.push(LlmMessage::user(text)),
            MessageRole::Assistant => messages.push(LlmMessage::assistant(text)),
            MessageRole::Tool => {}
        }
    }

    messages.push(LlmMessage::user(joined_text(new_message_parts)));
    messages
}

fn joined_text(parts: &[MessagePart]) -> String {
    parts
        .iter()
        .filter_map(MessagePart::as_text)
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Build the backend request for one step
#[must_use]
pub fn step_request(params: &TurnParams, messages: &[LlmMessage]) -> StepRequest {
    let request = StepRequest::new(messages.to_vec(), params.backend_model.clone());
    match params.model {
        // The reasoning surface runs without tools.
        ChatModel::Reasoning => request,
        ChatModel::Default => request.with_tools(ToolRegistry::declarations()),
    }
}

// ============================================================================
// Generation loop
// ============================================================================

#[derive(Default)]
struct StepOutcome {
    text: String,
    tool_calls: Vec<ToolInvocation>,
    usage: Option<TokenUsage>,
    finish_reason: Option<String>,
}

/// Relay one step's stream to the client while accumulating its outcome
async fn consume_step(mut stream: StepStream, emitter: &TurnEmitter) -> AppResult<StepOutcome> {
    let mut outcome = StepOutcome::default();

    while let Some(event) = stream.next().await {
        match event? {
            StepEvent::TextDelta(delta) => {
                emitter
                    .emit(&TurnEvent::TextDelta {
                        delta: delta.clone(),
                    })
                    .await;
                outcome.text.push_str(&delta);
            }
            StepEvent::ToolCall(call) => outcome.tool_calls.push(call),
            StepEvent::Finish {
                usage,
                finish_reason,
            } => {
                outcome.usage = usage;
                outcome.finish_reason = finish_reason;
            }
        }
    }

    Ok(outcome)
}

/// Drive a turn to its terminal state
///
/// Runs in a spawned task detached from the HTTP response: a client
/// disconnect does not cancel generation, so persistence and usage
/// accounting still happen. The wall-clock ceiling is the only abort.
pub async fn run_turn(
    resources: Arc<ServerResources>,
    params: TurnParams,
    messages: Vec<LlmMessage>,
    emitter: TurnEmitter,
    first_stream: StepStream,
    lease: TurnLease,
) {
    let ceiling = Duration::from_secs(resources.config.limits.max_turn_secs);
    let result = tokio::time::timeout(
        ceiling,
        drive_turn(&resources, &params, messages, &emitter, first_stream),
    )
    .await;

    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            debug!(phase = %TurnPhase::Failing, "turn phase");
            warn!(chat_id = %params.chat_id, "Turn failed mid-stream: {e}");
            emitter.emit(&TurnEvent::generic_error()).await;
        }
        Err(_) => {
            debug!(phase = %TurnPhase::Failing, "turn phase");
            warn!(chat_id = %params.chat_id, "Turn exceeded the wall-clock ceiling");
            emitter.emit(&TurnEvent::generic_error()).await;
        }
    }

    drop(lease);
}

async fn drive_turn(
    resources: &Arc<ServerResources>,
    params: &TurnParams,
    mut messages: Vec<LlmMessage>,
    emitter: &TurnEmitter,
    first_stream: StepStream,
) -> AppResult<()> {
    let tool_ctx = ToolContext {
        documents: resources.documents.clone(),
        provider: resources.provider.clone(),
        backend_model: params.backend_model.clone(),
        user_id: params.user_id,
        hints: params.hints.clone(),
        emitter: emitter.clone(),
    };

    let mut parts: Vec<MessagePart> = Vec::new();
    let mut total_usage = TokenUsage::default();
    let mut final_reason: Option<String> = None;
    let mut pending_stream = Some(first_stream);

    for step in 0..MAX_GENERATION_STEPS {
        debug!(phase = %TurnPhase::Generating(step), "turn phase");

        let stream = match pending_stream.take() {
            Some(stream) => stream,
            None => {
                resources
                    .provider
                    .stream_step(&step_request(params, &messages))
                    .await?
            }
        };

        let outcome = consume_step(stream, emitter).await?;

        if let Some(usage) = outcome.usage {
            total_usage.accumulate(usage);
        }
        final_reason = outcome.finish_reason;

        if !outcome.text.is_empty() {
            parts.push(MessagePart::Text {
                text: outcome.text.clone(),
            });
            messages.push(LlmMessage::assistant(outcome.text));
        }

        if outcome.tool_calls.is_empty() {
            break;
        }

        for call in &outcome.tool_calls {
            emitter
                .emit(&TurnEvent::ToolCall {
                    tool_call_id: call.id.clone(),
                    tool_name: call.name.clone(),
                    args: call.args.clone(),
                })
                .await;
            parts.push(MessagePart::ToolCall {
                tool_call_id: call.id.clone(),
                tool_name: call.name.clone(),
                args: call.args.clone(),
            });

            let output = resources.tools.execute(&tool_ctx, call).await?;

            emitter
                .emit(&TurnEvent::ToolResult {
                    tool_call_id: call.id.clone(),
                    tool_name: call.name.clone(),
                    output: output.clone(),
                })
                .await;
            messages.push(LlmMessage::tool_result(&call.name, &output));
            parts.push(MessagePart::ToolResult {
                tool_call_id: call.id.clone(),
                tool_name: call.name.clone(),
                output,
            });
        }

        if step == MAX_GENERATION_STEPS - 1 {
            // Ceiling reached with tool calls still pending a model response.
            final_reason = Some("max-steps".to_owned());
        }
    }

    debug!(phase = %TurnPhase::Completing, "turn phase");

    if parts.is_empty() {
        parts.push(MessagePart::Text {
            text: String::new(),
        });
    }

    let catalog = resources.catalog.get().await;
    let summary = usage::reconcile(&params.backend_model, total_usage, catalog.as_deref());

    emitter
        .emit(&TurnEvent::DataUsage {
            data: summary.clone(),
        })
        .await;

    resources
        .store
        .append_messages(&[NewMessage {
            id: Uuid::new_v4(),
            chat_id: params.chat_id,
            role: MessageRole::Assistant,
            parts,
        }])
        .await?;

    let context_value = serde_json::to_value(&summary)
        .map_err(|e| AppError::internal(format!("Failed to serialize usage summary: {e}")))?;
    resources
        .store
        .update_last_context(params.chat_id, &context_value)
        .await?;

    debug!(
        chat_id = %params.chat_id,
        reason = final_reason.as_deref().unwrap_or("stop"),
        "Turn completed"
    );
    emitter.emit(&TurnEvent::Finish {}).await;

    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use chrono::Utc;

    fn record(role: MessageRole, text: &str) -> MessageRecord {
        MessageRecord {
            id: Uuid::new_v4(),
            chat_id: Uuid::new_v4(),
            role,
            parts: vec![MessagePart::Text {
                text: text.to_owned(),
            }],
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_build_messages_orders_system_history_user() {
        let history = vec![
            record(MessageRole::User, "first question"),
            record(MessageRole::Assistant, "first answer"),
        ];
        let new_parts = vec![MessagePart::Text {
            text: "second question".to_owned(),
        }];

        let messages = build_llm_messages("be helpful", &history, &new_parts);
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].content, "be helpful");
        assert_eq!(messages[1].content, "first question");
        assert_eq!(messages[2].content, "first answer");
        assert_eq!(messages[3].content, "second question");
    }

    #[test]
    fn test_build_messages_skips_tool_records() {
        let history = vec![record(MessageRole::Tool, "tool output")];
        let messages = build_llm_messages("sys", &history, &[]);
        assert_eq!(messages.len(), 2);
    }

    #[test]
    fn test_reasoning_model_gets_no_tools() {
        let params = TurnParams {
            chat_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            model: ChatModel::Reasoning,
            backend_model: "o1-mini".to_owned(),
            hints: RequestHints::default(),
        };
        let request = step_request(&params, &[]);
        assert!(request.tools.is_empty());
    }

    #[test]
    fn test_lease_blocks_second_acquire_until_drop() {
        let leases = TurnLeases::new();
        let chat_id = Uuid::new_v4();

        let lease = leases.acquire(chat_id, Uuid::new_v4()).unwrap();
        assert!(leases.acquire(chat_id, Uuid::new_v4()).is_err());

        drop(lease);
        assert!(leases.acquire(chat_id, Uuid::new_v4()).is_ok());
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(TurnPhase::Generating(3).to_string(), "generating(3)");
        assert_eq!(TurnPhase::LoadingContext.to_string(), "loading-context");
    }
}
