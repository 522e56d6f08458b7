// ABOUTME: Chat turn route handlers: create/continue, resume, history, get, delete
// ABOUTME: Validator and gate phases live here; generation is spawned detached from the response
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Colloquy Contributors

//! Chat routes
//!
//! `POST /api/chat` runs the full turn pipeline: validate, authorize,
//! load/create the chat, persist the user message, then spawn generation
//! and answer with the turn's event stream. The generation task outlives
//! the response connection, so a client disconnect never loses the
//! transcript.

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::HeaderMap,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::{Stream, StreamExt};
use tracing::debug;
use uuid::Uuid;

use crate::context::ServerResources;
use crate::entitlements::Entitlements;
use crate::errors::{AppError, ErrorCode};
use crate::llm::prompts::system_prompt;
use crate::models::{
    derive_title, ChatModel, ChatRecord, MessagePart, MessageRecord, MessageRole, NewMessage,
    RequestHints, Visibility,
};
use crate::services::turn::{
    build_llm_messages, run_turn, step_request, TurnParams, TurnPhase,
};
use crate::streams::{StreamEntry, TurnEmitter, TurnEvent};

/// Trailing window for the daily message quota
const QUOTA_WINDOW_HOURS: i64 = 24;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Body of a create/continue turn request
#[derive(Debug, Deserialize)]
pub struct TurnRequestBody {
    /// Chat id; created on first turn if absent
    pub id: Uuid,
    /// The new user message
    pub message: IncomingMessage,
    /// Client-facing model selection
    #[serde(rename = "selectedChatModel")]
    pub selected_chat_model: String,
    /// Visibility for a newly created chat
    #[serde(rename = "selectedVisibilityType")]
    pub selected_visibility_type: String,
}

/// The message carried by a turn request
#[derive(Debug, Deserialize)]
pub struct IncomingMessage {
    /// Client-assigned message id (idempotency key)
    pub id: Uuid,
    /// Must be `user`
    pub role: String,
    /// Ordered content parts
    pub parts: Vec<MessagePart>,
}

/// Chat metadata with its ordered messages
#[derive(Debug, Serialize, Deserialize)]
pub struct ChatWithMessages {
    /// The chat record
    pub chat: ChatRecord,
    /// Messages in creation order
    pub messages: Vec<MessageRecord>,
}

/// Query parameters for the history listing
#[derive(Debug, Deserialize, Default)]
pub struct HistoryQuery {
    /// Maximum chats to return
    #[serde(default = "default_limit")]
    pub limit: i64,
    /// Offset for pagination
    #[serde(default)]
    pub offset: i64,
}

const fn default_limit() -> i64 {
    20
}

// ============================================================================
// Chat Routes
// ============================================================================

/// Chat routes handler
pub struct ChatRoutes;

impl ChatRoutes {
    /// Create all chat routes
    pub fn routes(resources: Arc<ServerResources>) -> Router {
        Router::new()
            .route("/api/chat", post(Self::create_turn))
            .route(
                "/api/chat/:chat_id",
                get(Self::get_chat).delete(Self::delete_chat),
            )
            .route("/api/chat/:chat_id/stream", get(Self::resume_stream))
            .route("/api/history", get(Self::list_history))
            .with_state(resources)
    }

    // ========================================================================
    // Turn handler
    // ========================================================================

    /// Create or continue a turn, answering with the turn's event stream
    async fn create_turn(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        body: Result<Json<TurnRequestBody>, JsonRejection>,
    ) -> Result<Response, AppError> {
        debug!(phase = %TurnPhase::Validating, "turn phase");
        let Json(body) =
            body.map_err(|e| AppError::bad_request(format!("Malformed turn request: {e}")))?;

        let model: ChatModel = body.selected_chat_model.parse()?;
        let visibility: Visibility = body.selected_visibility_type.parse()?;
        let role: MessageRole = body.message.role.parse()?;
        if role != MessageRole::User {
            return Err(AppError::bad_request("Turn message role must be user"));
        }
        if body.message.parts.is_empty() {
            return Err(AppError::bad_request(
                "Turn message must carry at least one part",
            ));
        }

        debug!(phase = %TurnPhase::Authorizing, "turn phase");
        let auth = resources.auth.authenticate(&headers)?;

        let entitlements = Entitlements::for_user_type(auth.user_type, &resources.config.limits);
        let message_count = resources
            .store
            .count_user_messages_since(
                auth.user_id,
                MessageRole::User,
                Duration::hours(QUOTA_WINDOW_HOURS),
            )
            .await?;
        if message_count >= entitlements.max_messages_per_day {
            return Err(AppError::rate_limit(format!(
                "Daily limit of {} messages reached",
                entitlements.max_messages_per_day
            )));
        }

        debug!(phase = %TurnPhase::LoadingContext, "turn phase");
        let history = match resources.store.get_chat(body.id).await? {
            Some(chat) => {
                // Ownership is checked before any history read.
                if chat.user_id != auth.user_id {
                    return Err(AppError::forbidden("Chat belongs to another user"));
                }
                resources.store.get_messages(body.id).await?
            }
            None => {
                let title = derive_title(&body.message.parts);
                resources
                    .store
                    .create_chat(body.id, auth.user_id, &title, visibility)
                    .await?;
                Vec::new()
            }
        };

        // One turn per chat at a time; the lease travels with the
        // generation task and is released at its terminal state.
        let stream_id = Uuid::new_v4();
        let lease = resources.leases.acquire(body.id, stream_id)?;

        resources
            .store
            .append_messages(&[NewMessage {
                id: body.message.id,
                chat_id: body.id,
                role: MessageRole::User,
                parts: body.message.parts.clone(),
            }])
            .await?;

        resources.store.record_stream_id(stream_id, body.id).await?;
        let entry = match &resources.streams {
            Some(registry) => registry.register(stream_id, body.id).await,
            // Degraded mode: a live-only stream nobody can re-attach to.
            None => StreamEntry::new(resources.config.streams.channel_capacity),
        };
        let emitter = TurnEmitter::new(entry.clone());

        let hints = request_hints(&headers);
        let prompt = system_prompt(model, &hints);
        let messages = build_llm_messages(&prompt, &history, &body.message.parts);
        let params = TurnParams {
            chat_id: body.id,
            user_id: auth.user_id,
            model,
            backend_model: resources.backend_model(model),
            hints,
        };

        // The first backend request happens before any stream bytes are
        // sent; a failure here is a whole-turn `offline` error.
        let first_stream = match resources
            .provider
            .stream_step(&step_request(&params, &messages))
            .await
        {
            Ok(stream) => stream,
            Err(e) => {
                // Terminate the registered stream so a later re-attach
                // does not wait on a turn that never started.
                entry.publish(&TurnEvent::generic_error()).await;
                return Err(AppError::new(ErrorCode::Offline, e.message));
            }
        };

        tokio::spawn(run_turn(
            resources.clone(),
            params,
            messages,
            emitter,
            first_stream,
            lease,
        ));

        Ok(Sse::new(sse_stream(&entry, None))
            .keep_alive(KeepAlive::default())
            .into_response())
    }

    // ========================================================================
    // Stream resumption
    // ========================================================================

    /// Re-attach to the chat's in-flight turn stream
    ///
    /// Honors `Last-Event-ID` so a reconnecting client receives only the
    /// suffix it has not seen.
    async fn resume_stream(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        Path(chat_id): Path<Uuid>,
    ) -> Result<Response, AppError> {
        let auth = resources.auth.authenticate(&headers)?;

        let chat = resources
            .store
            .get_chat(chat_id)
            .await?
            .ok_or_else(|| AppError::not_found("Chat"))?;
        if chat.user_id != auth.user_id {
            return Err(AppError::forbidden("Chat belongs to another user"));
        }

        let registry = resources
            .streams
            .as_ref()
            .ok_or_else(|| AppError::not_found("Resumable stream"))?;
        let (stream_id, entry) = registry
            .current_for_chat(chat_id)
            .await
            .ok_or_else(|| AppError::not_found("Active stream"))?;

        let after = last_event_id(&headers);
        debug!(%chat_id, %stream_id, ?after, "Re-attaching to stream");

        Ok(Sse::new(sse_stream(&entry, after))
            .keep_alive(KeepAlive::default())
            .into_response())
    }

    // ========================================================================
    // Chat handlers
    // ========================================================================

    /// Get a chat with its messages
    async fn get_chat(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        Path(chat_id): Path<Uuid>,
    ) -> Result<Json<ChatWithMessages>, AppError> {
        let auth = resources.auth.authenticate(&headers)?;

        let chat = resources
            .store
            .get_chat(chat_id)
            .await?
            .ok_or_else(|| AppError::not_found("Chat"))?;
        if chat.user_id != auth.user_id && chat.visibility != Visibility::Public {
            return Err(AppError::forbidden("Chat belongs to another user"));
        }

        let messages = resources.store.get_messages(chat_id).await?;
        Ok(Json(ChatWithMessages { chat, messages }))
    }

    /// List the caller's chats, most recent first
    async fn list_history(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        Query(query): Query<HistoryQuery>,
    ) -> Result<Json<Vec<ChatRecord>>, AppError> {
        let auth = resources.auth.authenticate(&headers)?;

        let chats = resources
            .store
            .list_chats(auth.user_id, query.limit, query.offset)
            .await?;
        Ok(Json(chats))
    }

    /// Delete a chat; owner only; returns the deleted record
    async fn delete_chat(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        Path(chat_id): Path<Uuid>,
    ) -> Result<Json<ChatRecord>, AppError> {
        let auth = resources.auth.authenticate(&headers)?;

        let chat = resources
            .store
            .get_chat(chat_id)
            .await?
            .ok_or_else(|| AppError::not_found("Chat"))?;
        if chat.user_id != auth.user_id {
            return Err(AppError::forbidden("Chat belongs to another user"));
        }

        let deleted = resources.store.delete_chat(chat_id).await?;
        Ok(Json(deleted))
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Convert a subscribed stream into SSE events carrying sequence ids
fn sse_stream(
    entry: &Arc<StreamEntry>,
    after: Option<u64>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    entry
        .subscribe(after)
        .map(|item| Ok(Event::default().id(item.seq.to_string()).data(item.payload)))
}

/// Parse the SSE `Last-Event-ID` reconnection header
fn last_event_id(headers: &HeaderMap) -> Option<u64> {
    headers
        .get("last-event-id")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok())
}

/// Extract request hints from forwarding headers
fn request_hints(headers: &HeaderMap) -> RequestHints {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(ToOwned::to_owned)
    };

    RequestHints {
        city: header("x-geo-city"),
        country: header("x-geo-country"),
        latitude: header("x-geo-latitude").and_then(|raw| raw.parse().ok()),
        longitude: header("x-geo-longitude").and_then(|raw| raw.parse().ok()),
        locale: header("accept-language")
            .and_then(|raw| raw.split(',').next().map(|tag| tag.trim().to_owned())),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_request_hints_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-geo-city", HeaderValue::from_static("Lisbon"));
        headers.insert("x-geo-latitude", HeaderValue::from_static("38.72"));
        headers.insert(
            "accept-language",
            HeaderValue::from_static("pt-PT,pt;q=0.9,en;q=0.8"),
        );

        let hints = request_hints(&headers);
        assert_eq!(hints.city.as_deref(), Some("Lisbon"));
        assert_eq!(hints.latitude, Some(38.72));
        assert_eq!(hints.locale.as_deref(), Some("pt-PT"));
        assert!(hints.country.is_none());
    }

    #[test]
    fn test_last_event_id_parsing() {
        let mut headers = HeaderMap::new();
        headers.insert("last-event-id", HeaderValue::from_static("41"));
        assert_eq!(last_event_id(&headers), Some(41));

        headers.insert("last-event-id", HeaderValue::from_static("nonsense"));
        assert_eq!(last_event_id(&headers), None);
    }
}
