// ABOUTME: Integration tests for the turn pipeline: validation, gating, generation, persistence
// ABOUTME: Drives the chat routes end to end against a scripted backend
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod common;
mod helpers;

use common::{setup, setup_with, turn_body, ScriptedStep};
use helpers::axum_test::AxumTestRequest;

use axum::http::StatusCode;
use serde_json::json;
use uuid::Uuid;

use colloquy_server::models::{MessagePart, MessageRole, Visibility};
use colloquy_server::routes::chat::ChatWithMessages;

// ============================================================================
// Happy path
// ============================================================================

#[tokio::test]
async fn test_successful_turn_persists_user_and_assistant_messages() {
    let env = setup(vec![ScriptedStep::Text(vec!["Hello", ", world"])]).await;
    let chat_id = Uuid::new_v4();

    let response = AxumTestRequest::post("/api/chat")
        .header("authorization", &env.auth_header)
        .json(&turn_body(chat_id, "Say hello"))
        .send(env.router.clone())
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);

    let types = response.sse_event_types();
    assert_eq!(types.first().map(String::as_str), Some("text-delta"));
    assert!(types.contains(&"data-usage".to_owned()));
    assert_eq!(types.last().map(String::as_str), Some("finish"));

    // Exactly one chat, exactly two messages (user + assistant).
    let chat = env.resources.store.get_chat(chat_id).await.unwrap().unwrap();
    assert_eq!(chat.user_id, env.user_id);
    assert_eq!(chat.title, "Say hello");

    let messages = env.resources.store.get_messages(chat_id).await.unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, MessageRole::User);
    assert_eq!(messages[1].role, MessageRole::Assistant);
    assert_eq!(
        messages[1].parts,
        vec![MessagePart::Text {
            text: "Hello, world".to_owned()
        }]
    );

    // The chat's usage context reflects the reported usage.
    let context = chat.last_context.expect("usage context should be set");
    assert_eq!(context["inputTokens"], 10);
    assert_eq!(context["outputTokens"], 5);
    assert_eq!(context["modelId"], "test-model");
}

#[tokio::test]
async fn test_turn_on_existing_chat_appends_history() {
    let env = setup(vec![
        ScriptedStep::Text(vec!["first answer"]),
        ScriptedStep::Text(vec!["second answer"]),
    ])
    .await;
    let chat_id = Uuid::new_v4();

    for prompt in ["first question", "second question"] {
        let response = AxumTestRequest::post("/api/chat")
            .header("authorization", &env.auth_header)
            .json(&turn_body(chat_id, prompt))
            .send(env.router.clone())
            .await;
        assert_eq!(response.status_code(), StatusCode::OK);
    }

    let messages = env.resources.store.get_messages(chat_id).await.unwrap();
    assert_eq!(messages.len(), 4);
    // Title derives from the first user message only.
    let chat = env.resources.store.get_chat(chat_id).await.unwrap().unwrap();
    assert_eq!(chat.title, "first question");
}

#[tokio::test]
async fn test_duplicate_message_id_is_idempotent() {
    let env = setup(vec![
        ScriptedStep::Text(vec!["a"]),
        ScriptedStep::Text(vec!["b"]),
    ])
    .await;
    let chat_id = Uuid::new_v4();
    let body = turn_body(chat_id, "same message twice");

    for _ in 0..2 {
        let response = AxumTestRequest::post("/api/chat")
            .header("authorization", &env.auth_header)
            .json(&body)
            .send(env.router.clone())
            .await;
        assert_eq!(response.status_code(), StatusCode::OK);
    }

    let messages = env.resources.store.get_messages(chat_id).await.unwrap();
    let user_messages = messages
        .iter()
        .filter(|m| m.role == MessageRole::User)
        .count();
    // The second turn reuses the message id; the append is a no-op.
    assert_eq!(user_messages, 1);
    assert_eq!(messages.len(), 3);
}

// ============================================================================
// Validation
// ============================================================================

#[tokio::test]
async fn test_malformed_body_is_bad_request() {
    let env = setup(vec![]).await;

    let response = AxumTestRequest::post("/api/chat")
        .header("authorization", &env.auth_header)
        .json(&json!({"not": "a turn request"}))
        .send(env.router.clone())
        .await;

    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json();
    assert_eq!(body["code"], "bad_request");
}

#[tokio::test]
async fn test_unknown_model_is_bad_request() {
    let env = setup(vec![]).await;
    let mut body = turn_body(Uuid::new_v4(), "hi");
    body["selectedChatModel"] = json!("gpt-99");

    let response = AxumTestRequest::post("/api/chat")
        .header("authorization", &env.auth_header)
        .json(&body)
        .send(env.router.clone())
        .await;

    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_non_user_role_is_bad_request() {
    let env = setup(vec![]).await;
    let mut body = turn_body(Uuid::new_v4(), "hi");
    body["message"]["role"] = json!("assistant");

    let response = AxumTestRequest::post("/api/chat")
        .header("authorization", &env.auth_header)
        .json(&body)
        .send(env.router.clone())
        .await;

    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_visibility_is_bad_request() {
    let env = setup(vec![]).await;
    let mut body = turn_body(Uuid::new_v4(), "hi");
    body["selectedVisibilityType"] = json!("secret");

    let response = AxumTestRequest::post("/api/chat")
        .header("authorization", &env.auth_header)
        .json(&body)
        .send(env.router.clone())
        .await;

    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
}

// ============================================================================
// Gate: identity, quota, ownership
// ============================================================================

#[tokio::test]
async fn test_missing_token_is_unauthorized() {
    let env = setup(vec![]).await;

    let response = AxumTestRequest::post("/api/chat")
        .json(&turn_body(Uuid::new_v4(), "hi"))
        .send(env.router.clone())
        .await;

    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
    let body: serde_json::Value = response.json();
    assert_eq!(body["code"], "unauthorized");
}

#[tokio::test]
async fn test_quota_at_cap_is_rate_limited_and_persists_nothing() {
    let env = setup_with(vec![], |config| {
        config.limits.regular_messages_per_day = 0;
    })
    .await;
    let chat_id = Uuid::new_v4();

    let response = AxumTestRequest::post("/api/chat")
        .header("authorization", &env.auth_header)
        .json(&turn_body(chat_id, "over quota"))
        .send(env.router.clone())
        .await;

    assert_eq!(response.status_code(), StatusCode::TOO_MANY_REQUESTS);
    let body: serde_json::Value = response.json();
    assert_eq!(body["code"], "rate_limit");

    assert!(env.resources.store.get_chat(chat_id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_quota_counts_accumulate_to_rejection() {
    let env = setup_with(
        vec![
            ScriptedStep::Text(vec!["one"]),
            ScriptedStep::Text(vec!["two"]),
        ],
        |config| {
            config.limits.regular_messages_per_day = 2;
        },
    )
    .await;

    for prompt in ["first", "second"] {
        let response = AxumTestRequest::post("/api/chat")
            .header("authorization", &env.auth_header)
            .json(&turn_body(Uuid::new_v4(), prompt))
            .send(env.router.clone())
            .await;
        assert_eq!(response.status_code(), StatusCode::OK);
    }

    let response = AxumTestRequest::post("/api/chat")
        .header("authorization", &env.auth_header)
        .json(&turn_body(Uuid::new_v4(), "third"))
        .send(env.router.clone())
        .await;
    assert_eq!(response.status_code(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_foreign_chat_is_forbidden() {
    let env = setup(vec![]).await;
    let (other_user, _) = env.other_user_header();

    // Chat owned by someone else.
    let chat_id = Uuid::new_v4();
    env.resources
        .store
        .create_chat(chat_id, other_user, "theirs", Visibility::Private)
        .await
        .unwrap();

    let response = AxumTestRequest::post("/api/chat")
        .header("authorization", &env.auth_header)
        .json(&turn_body(chat_id, "let me in"))
        .send(env.router.clone())
        .await;

    assert_eq!(response.status_code(), StatusCode::FORBIDDEN);
    let body: serde_json::Value = response.json();
    assert_eq!(body["code"], "forbidden");

    // Nothing was appended to the foreign chat.
    let messages = env.resources.store.get_messages(chat_id).await.unwrap();
    assert!(messages.is_empty());
}

// ============================================================================
// Failure semantics
// ============================================================================

#[tokio::test]
async fn test_setup_failure_returns_offline_and_keeps_user_message() {
    let env = setup(vec![ScriptedStep::FailSetup]).await;
    let chat_id = Uuid::new_v4();

    let response = AxumTestRequest::post("/api/chat")
        .header("authorization", &env.auth_header)
        .json(&turn_body(chat_id, "doomed"))
        .send(env.router.clone())
        .await;

    assert_eq!(response.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    let body: serde_json::Value = response.json();
    assert_eq!(body["code"], "offline");

    // Chat and user message exist; no assistant message was written.
    let messages = env.resources.store.get_messages(chat_id).await.unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].role, MessageRole::User);
}

#[tokio::test]
async fn test_mid_stream_failure_ends_with_error_event_and_discards_partial() {
    let env = setup(vec![ScriptedStep::FailMidStream(vec!["partial "])]).await;
    let chat_id = Uuid::new_v4();

    let response = AxumTestRequest::post("/api/chat")
        .header("authorization", &env.auth_header)
        .json(&turn_body(chat_id, "fail mid-stream"))
        .send(env.router.clone())
        .await;

    // Status was committed before the failure; the error rides the stream.
    assert_eq!(response.status_code(), StatusCode::OK);
    let types = response.sse_event_types();
    assert_eq!(types.first().map(String::as_str), Some("text-delta"));
    assert_eq!(types.last().map(String::as_str), Some("error"));

    // Only the user message persists; the partial output is discarded.
    let messages = env.resources.store.get_messages(chat_id).await.unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].role, MessageRole::User);

    let chat = env.resources.store.get_chat(chat_id).await.unwrap().unwrap();
    assert!(chat.last_context.is_none());
}

#[tokio::test]
async fn test_concurrent_turn_on_same_chat_conflicts() {
    let env = setup(vec![ScriptedStep::Text(vec!["hi"])]).await;
    let chat_id = Uuid::new_v4();
    env.resources
        .store
        .create_chat(chat_id, env.user_id, "mine", Visibility::Private)
        .await
        .unwrap();

    // Simulate an in-flight turn holding the lease.
    let lease = env
        .resources
        .leases
        .acquire(chat_id, Uuid::new_v4())
        .unwrap();

    let response = AxumTestRequest::post("/api/chat")
        .header("authorization", &env.auth_header)
        .json(&turn_body(chat_id, "second turn"))
        .send(env.router.clone())
        .await;

    assert_eq!(response.status_code(), StatusCode::CONFLICT);
    let body: serde_json::Value = response.json();
    assert_eq!(body["code"], "conflict");

    drop(lease);
}

// ============================================================================
// Tool loop
// ============================================================================

#[tokio::test]
async fn test_tool_turn_interleaves_tool_events_and_persists_parts() {
    let env = setup(vec![
        ScriptedStep::ToolCall {
            name: "create_document",
            args: json!({"title": "Essay", "kind": "text", "content": "Draft one."}),
        },
        ScriptedStep::Text(vec!["I created the essay for you."]),
    ])
    .await;
    let chat_id = Uuid::new_v4();

    let response = AxumTestRequest::post("/api/chat")
        .header("authorization", &env.auth_header)
        .json(&turn_body(chat_id, "Write an essay"))
        .send(env.router.clone())
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);

    let types = response.sse_event_types();
    let tool_call_pos = types.iter().position(|t| t == "tool-call").unwrap();
    let document_pos = types.iter().position(|t| t == "data-document").unwrap();
    let tool_result_pos = types.iter().position(|t| t == "tool-result").unwrap();
    let text_pos = types.iter().position(|t| t == "text-delta").unwrap();
    // The client observes tool activity in real time, before the final text.
    assert!(tool_call_pos < document_pos);
    assert!(document_pos < tool_result_pos);
    assert!(tool_result_pos < text_pos);
    assert_eq!(types.last().map(String::as_str), Some("finish"));

    // The assistant message carries the full interleaved part sequence.
    let messages = env.resources.store.get_messages(chat_id).await.unwrap();
    assert_eq!(messages.len(), 2);
    let parts = &messages[1].parts;
    assert!(matches!(parts[0], MessagePart::ToolCall { .. }));
    assert!(matches!(parts[1], MessagePart::ToolResult { .. }));
    assert!(matches!(parts[2], MessagePart::Text { .. }));

    // Usage accumulated across both steps.
    let chat = env.resources.store.get_chat(chat_id).await.unwrap().unwrap();
    let context = chat.last_context.unwrap();
    assert_eq!(context["inputTokens"], 20);
    assert_eq!(context["outputTokens"], 10);
}

#[tokio::test]
async fn test_generation_is_bounded_to_five_steps() {
    let tool_step = || ScriptedStep::ToolCall {
        name: "create_document",
        args: json!({"title": "Loop", "content": "again"}),
    };
    // The backend would chain tools forever; the orchestrator must stop it.
    let env = setup((0..10).map(|_| tool_step()).collect()).await;
    let chat_id = Uuid::new_v4();

    let response = AxumTestRequest::post("/api/chat")
        .header("authorization", &env.auth_header)
        .json(&turn_body(chat_id, "never stop"))
        .send(env.router.clone())
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let types = response.sse_event_types();
    assert_eq!(types.last().map(String::as_str), Some("finish"));

    // Exactly the step ceiling, not one more.
    assert_eq!(env.backend.stream_calls(), 5);

    // The turn still completed: user + assistant persisted.
    let messages = env.resources.store.get_messages(chat_id).await.unwrap();
    assert_eq!(messages.len(), 2);
}

#[tokio::test]
async fn test_unknown_tool_name_fails_the_turn() {
    let env = setup(vec![ScriptedStep::ToolCall {
        name: "drop_tables",
        args: json!({}),
    }])
    .await;
    let chat_id = Uuid::new_v4();

    let response = AxumTestRequest::post("/api/chat")
        .header("authorization", &env.auth_header)
        .json(&turn_body(chat_id, "misbehave"))
        .send(env.router.clone())
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let types = response.sse_event_types();
    assert_eq!(types.last().map(String::as_str), Some("error"));

    // No assistant message for the failed turn.
    let messages = env.resources.store.get_messages(chat_id).await.unwrap();
    assert_eq!(messages.len(), 1);
}

// ============================================================================
// Chat surface: get, history, delete
// ============================================================================

#[tokio::test]
async fn test_get_chat_returns_messages_in_order() {
    let env = setup(vec![ScriptedStep::Text(vec!["answer"])]).await;
    let chat_id = Uuid::new_v4();

    AxumTestRequest::post("/api/chat")
        .header("authorization", &env.auth_header)
        .json(&turn_body(chat_id, "question"))
        .send(env.router.clone())
        .await;

    let response = AxumTestRequest::get(&format!("/api/chat/{chat_id}"))
        .header("authorization", &env.auth_header)
        .send(env.router.clone())
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let body: ChatWithMessages = response.json();
    assert_eq!(body.chat.id, chat_id);
    assert_eq!(body.messages.len(), 2);
    assert_eq!(body.messages[0].role, MessageRole::User);
}

#[tokio::test]
async fn test_public_chat_is_readable_by_others() {
    let env = setup(vec![ScriptedStep::Text(vec!["shared"])]).await;
    let chat_id = Uuid::new_v4();

    let mut body = turn_body(chat_id, "make it public");
    body["selectedVisibilityType"] = json!("public");
    AxumTestRequest::post("/api/chat")
        .header("authorization", &env.auth_header)
        .json(&body)
        .send(env.router.clone())
        .await;

    let (_, other_header) = env.other_user_header();
    let response = AxumTestRequest::get(&format!("/api/chat/{chat_id}"))
        .header("authorization", &other_header)
        .send(env.router.clone())
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);

    // But a private chat is not.
    let private_id = Uuid::new_v4();
    AxumTestRequest::post("/api/chat")
        .header("authorization", &env.auth_header)
        .json(&turn_body(private_id, "keep it private"))
        .send(env.router.clone())
        .await;

    let response = AxumTestRequest::get(&format!("/api/chat/{private_id}"))
        .header("authorization", &other_header)
        .send(env.router.clone())
        .await;
    assert_eq!(response.status_code(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_history_lists_own_chats_only() {
    let env = setup(vec![
        ScriptedStep::Text(vec!["a"]),
        ScriptedStep::Text(vec!["b"]),
    ])
    .await;

    for prompt in ["chat one", "chat two"] {
        AxumTestRequest::post("/api/chat")
            .header("authorization", &env.auth_header)
            .json(&turn_body(Uuid::new_v4(), prompt))
            .send(env.router.clone())
            .await;
    }

    let response = AxumTestRequest::get("/api/history")
        .header("authorization", &env.auth_header)
        .send(env.router.clone())
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let chats: Vec<serde_json::Value> = response.json();
    assert_eq!(chats.len(), 2);

    let (_, other_header) = env.other_user_header();
    let response = AxumTestRequest::get("/api/history")
        .header("authorization", &other_header)
        .send(env.router.clone())
        .await;
    let chats: Vec<serde_json::Value> = response.json();
    assert!(chats.is_empty());
}

#[tokio::test]
async fn test_delete_chat_returns_record_and_removes_it() {
    let env = setup(vec![ScriptedStep::Text(vec!["gone soon"])]).await;
    let chat_id = Uuid::new_v4();

    AxumTestRequest::post("/api/chat")
        .header("authorization", &env.auth_header)
        .json(&turn_body(chat_id, "delete me"))
        .send(env.router.clone())
        .await;

    let response = AxumTestRequest::delete(&format!("/api/chat/{chat_id}"))
        .header("authorization", &env.auth_header)
        .send(env.router.clone())
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let deleted: serde_json::Value = response.json();
    assert_eq!(deleted["id"], chat_id.to_string());

    let response = AxumTestRequest::get(&format!("/api/chat/{chat_id}"))
        .header("authorization", &env.auth_header)
        .send(env.router.clone())
        .await;
    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_delete_foreign_chat_is_forbidden() {
    let env = setup(vec![ScriptedStep::Text(vec!["mine"])]).await;
    let chat_id = Uuid::new_v4();

    AxumTestRequest::post("/api/chat")
        .header("authorization", &env.auth_header)
        .json(&turn_body(chat_id, "my chat"))
        .send(env.router.clone())
        .await;

    let (_, other_header) = env.other_user_header();
    let response = AxumTestRequest::delete(&format!("/api/chat/{chat_id}"))
        .header("authorization", &other_header)
        .send(env.router.clone())
        .await;
    assert_eq!(response.status_code(), StatusCode::FORBIDDEN);

    // Still there.
    assert!(env.resources.store.get_chat(chat_id).await.unwrap().is_some());
}
