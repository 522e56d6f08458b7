// ABOUTME: Store-level tests for chats, messages, stream handles, and documents
// ABOUTME: Exercises append-only semantics, quota counting, and delete cascades
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

use chrono::Duration;
use sqlx::sqlite::SqlitePoolOptions;
use tempfile::TempDir;
use uuid::Uuid;

use colloquy_server::database::{self, ChatStore, DocumentStore};
use colloquy_server::models::{MessagePart, MessageRole, NewMessage, Visibility};

async fn stores() -> (ChatStore, DocumentStore, TempDir) {
    let tmp = TempDir::new().unwrap();
    let url = format!("sqlite://{}/store.db?mode=rwc", tmp.path().display());
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await
        .unwrap();
    database::migrate(&pool).await.unwrap();
    (ChatStore::new(pool.clone()), DocumentStore::new(pool), tmp)
}

fn text_message(chat_id: Uuid, role: MessageRole, text: &str) -> NewMessage {
    NewMessage {
        id: Uuid::new_v4(),
        chat_id,
        role,
        parts: vec![MessagePart::Text {
            text: text.to_owned(),
        }],
    }
}

#[tokio::test]
async fn test_append_is_idempotent_per_message_id() {
    let (store, _, _tmp) = stores().await;
    let user_id = Uuid::new_v4();
    let chat_id = Uuid::new_v4();
    store
        .create_chat(chat_id, user_id, "idempotency", Visibility::Private)
        .await
        .unwrap();

    let message = text_message(chat_id, MessageRole::User, "once");
    store.append_messages(&[message.clone()]).await.unwrap();
    store.append_messages(&[message]).await.unwrap();

    assert_eq!(store.count_messages(chat_id).await.unwrap(), 1);
}

#[tokio::test]
async fn test_messages_come_back_in_append_order() {
    let (store, _, _tmp) = stores().await;
    let user_id = Uuid::new_v4();
    let chat_id = Uuid::new_v4();
    store
        .create_chat(chat_id, user_id, "ordering", Visibility::Private)
        .await
        .unwrap();

    store
        .append_messages(&[
            text_message(chat_id, MessageRole::User, "q1"),
            text_message(chat_id, MessageRole::Assistant, "a1"),
            text_message(chat_id, MessageRole::User, "q2"),
        ])
        .await
        .unwrap();

    let messages = store.get_messages(chat_id).await.unwrap();
    let texts: Vec<&str> = messages
        .iter()
        .flat_map(|m| m.parts.iter().filter_map(MessagePart::as_text))
        .collect();
    assert_eq!(texts, vec!["q1", "a1", "q2"]);
}

#[tokio::test]
async fn test_quota_count_scopes_to_user_and_role() {
    let (store, _, _tmp) = stores().await;
    let user_a = Uuid::new_v4();
    let user_b = Uuid::new_v4();

    for (user, chat_title) in [(user_a, "a"), (user_b, "b")] {
        let chat_id = Uuid::new_v4();
        store
            .create_chat(chat_id, user, chat_title, Visibility::Private)
            .await
            .unwrap();
        store
            .append_messages(&[
                text_message(chat_id, MessageRole::User, "question"),
                text_message(chat_id, MessageRole::Assistant, "answer"),
            ])
            .await
            .unwrap();
    }

    let count = store
        .count_user_messages_since(user_a, MessageRole::User, Duration::hours(24))
        .await
        .unwrap();
    // Only user A's user-role messages count; the assistant reply does not.
    assert_eq!(count, 1);
}

#[tokio::test]
async fn test_delete_chat_cascades_and_returns_record() {
    let (store, _, _tmp) = stores().await;
    let user_id = Uuid::new_v4();
    let chat_id = Uuid::new_v4();
    store
        .create_chat(chat_id, user_id, "to delete", Visibility::Private)
        .await
        .unwrap();
    store
        .append_messages(&[text_message(chat_id, MessageRole::User, "bye")])
        .await
        .unwrap();
    store
        .record_stream_id(Uuid::new_v4(), chat_id)
        .await
        .unwrap();

    let deleted = store.delete_chat(chat_id).await.unwrap();
    assert_eq!(deleted.title, "to delete");

    assert!(store.get_chat(chat_id).await.unwrap().is_none());
    assert_eq!(store.count_messages(chat_id).await.unwrap(), 0);
    assert!(store.latest_stream_id(chat_id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_latest_stream_id_wins() {
    let (store, _, _tmp) = stores().await;
    let user_id = Uuid::new_v4();
    let chat_id = Uuid::new_v4();
    store
        .create_chat(chat_id, user_id, "streams", Visibility::Private)
        .await
        .unwrap();

    let first = Uuid::new_v4();
    let second = Uuid::new_v4();
    store.record_stream_id(first, chat_id).await.unwrap();
    // Later handle supersedes on read.
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    store.record_stream_id(second, chat_id).await.unwrap();

    assert_eq!(store.latest_stream_id(chat_id).await.unwrap(), Some(second));
}

#[tokio::test]
async fn test_usage_context_is_last_write_wins() {
    let (store, _, _tmp) = stores().await;
    let user_id = Uuid::new_v4();
    let chat_id = Uuid::new_v4();
    store
        .create_chat(chat_id, user_id, "usage", Visibility::Private)
        .await
        .unwrap();

    store
        .update_last_context(chat_id, &serde_json::json!({"totalTokens": 10}))
        .await
        .unwrap();
    store
        .update_last_context(chat_id, &serde_json::json!({"totalTokens": 25}))
        .await
        .unwrap();

    let chat = store.get_chat(chat_id).await.unwrap().unwrap();
    assert_eq!(chat.last_context.unwrap()["totalTokens"], 25);
}

#[tokio::test]
async fn test_document_versions_latest_wins() {
    let (_, documents, _tmp) = stores().await;
    let user_id = Uuid::new_v4();
    let doc_id = Uuid::new_v4();

    documents
        .save(doc_id, user_id, "Essay", "text", "first draft")
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    documents
        .save(doc_id, user_id, "Essay", "text", "second draft")
        .await
        .unwrap();

    let latest = documents.get_latest(doc_id).await.unwrap().unwrap();
    assert_eq!(latest.content, "second draft");
}
