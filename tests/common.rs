// ABOUTME: Shared integration test environment with a scripted mock LLM backend
// ABOUTME: Builds tempfile-backed resources, a router, and an authenticated test user
#![allow(dead_code)]
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use async_trait::async_trait;
use serde_json::{json, Value};
use sqlx::sqlite::SqlitePoolOptions;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use uuid::Uuid;

use colloquy_server::{
    config::environment::{
        AuthConfig, CatalogConfig, LimitConfig, LlmConfig, ServerConfig, StreamConfig,
    },
    context::ServerResources,
    database,
    entitlements::UserType,
    errors::AppError,
    llm::{
        CompletionResponse, LlmProvider, StepEvent, StepRequest, StepStream, TokenUsage,
        ToolInvocation,
    },
    routes,
};

/// Usage reported by every scripted step
pub const STEP_USAGE: TokenUsage = TokenUsage {
    prompt_tokens: 10,
    completion_tokens: 5,
    total_tokens: 15,
};

/// One scripted backend generation step
pub enum ScriptedStep {
    /// Stream these text deltas, then finish cleanly
    Text(Vec<&'static str>),
    /// Emit one tool call, then finish with reason `tool_calls`
    ToolCall {
        /// Tool name the model "chose"
        name: &'static str,
        /// Arguments it supplied
        args: Value,
    },
    /// Fail before the stream starts (setup-time failure)
    FailSetup,
    /// Stream some deltas, then fail mid-stream
    FailMidStream(Vec<&'static str>),
}

/// Scripted LLM backend for integration tests
pub struct MockBackend {
    script: Mutex<VecDeque<ScriptedStep>>,
    stream_calls: AtomicUsize,
}

impl MockBackend {
    pub fn new(script: Vec<ScriptedStep>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            stream_calls: AtomicUsize::new(0),
        }
    }

    /// How many generation steps the backend has served
    pub fn stream_calls(&self) -> usize {
        self.stream_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmProvider for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn stream_step(&self, _request: &StepRequest) -> Result<StepStream, AppError> {
        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(ScriptedStep::Text(vec!["ok"]));

        let call_index = self.stream_calls.fetch_add(1, Ordering::SeqCst);

        let events: Vec<Result<StepEvent, AppError>> = match step {
            ScriptedStep::Text(deltas) => deltas
                .into_iter()
                .map(|delta| Ok(StepEvent::TextDelta(delta.to_owned())))
                .chain(std::iter::once(Ok(StepEvent::Finish {
                    usage: Some(STEP_USAGE),
                    finish_reason: Some("stop".to_owned()),
                })))
                .collect(),
            ScriptedStep::ToolCall { name, args } => vec![
                Ok(StepEvent::ToolCall(ToolInvocation {
                    id: format!("call_{call_index}"),
                    name: name.to_owned(),
                    args,
                })),
                Ok(StepEvent::Finish {
                    usage: Some(STEP_USAGE),
                    finish_reason: Some("tool_calls".to_owned()),
                }),
            ],
            ScriptedStep::FailSetup => {
                return Err(AppError::offline("backend is down"));
            }
            ScriptedStep::FailMidStream(deltas) => deltas
                .into_iter()
                .map(|delta| Ok(StepEvent::TextDelta(delta.to_owned())))
                .chain(std::iter::once(Err(AppError::offline(
                    "backend dropped the stream",
                ))))
                .collect(),
        };

        Ok(Box::pin(tokio_stream::iter(events)))
    }

    async fn complete(&self, _request: &StepRequest) -> Result<CompletionResponse, AppError> {
        Ok(CompletionResponse {
            content: "- Tighten the introduction\n- Fix the typos".to_owned(),
            usage: Some(STEP_USAGE),
            finish_reason: Some("stop".to_owned()),
        })
    }

    async fn health_check(&self) -> Result<bool, AppError> {
        Ok(true)
    }
}

/// Everything a route-level test needs
pub struct TestEnv {
    pub resources: Arc<ServerResources>,
    pub router: axum::Router,
    pub user_id: Uuid,
    pub auth_header: String,
    pub backend: Arc<MockBackend>,
    _tmp: TempDir,
}

impl TestEnv {
    /// An auth header for a second, different user
    pub fn other_user_header(&self) -> (Uuid, String) {
        let user_id = Uuid::new_v4();
        let token = self
            .resources
            .auth
            .generate_token(user_id, "other@example.com", UserType::Regular)
            .unwrap();
        (user_id, format!("Bearer {token}"))
    }
}

/// Baseline configuration for tests
pub fn test_config() -> ServerConfig {
    ServerConfig {
        http_port: 0,
        database_url: String::new(),
        auth: AuthConfig {
            jwt_secret: "test-secret".to_owned(),
            jwt_expiry_hours: 24,
        },
        llm: LlmConfig {
            base_url: "http://127.0.0.1:0/v1".to_owned(),
            api_key: None,
            default_model: "test-model".to_owned(),
            reasoning_model: "test-reasoning".to_owned(),
            request_timeout_secs: 5,
        },
        catalog: CatalogConfig {
            url: None,
            ttl_secs: 60,
        },
        streams: StreamConfig {
            enabled: true,
            max_entries: 100,
            channel_capacity: 64,
        },
        limits: LimitConfig {
            max_turn_secs: 10,
            guest_messages_per_day: 20,
            regular_messages_per_day: 100,
        },
    }
}

/// Build a test environment with a scripted backend
pub async fn setup(script: Vec<ScriptedStep>) -> TestEnv {
    setup_with(script, |_| {}).await
}

/// Build a test environment, adjusting configuration first
pub async fn setup_with(
    script: Vec<ScriptedStep>,
    configure: impl FnOnce(&mut ServerConfig),
) -> TestEnv {
    let tmp = TempDir::new().unwrap();
    let db_path = tmp.path().join("test.db");
    let url = format!("sqlite://{}?mode=rwc", db_path.display());

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await
        .unwrap();
    database::migrate(&pool).await.unwrap();

    let mut config = test_config();
    configure(&mut config);

    let backend = Arc::new(MockBackend::new(script));
    let resources = Arc::new(ServerResources::new(
        pool,
        backend.clone(),
        Arc::new(config),
    ));

    let user_id = Uuid::new_v4();
    let token = resources
        .auth
        .generate_token(user_id, "user@example.com", UserType::Regular)
        .unwrap();

    let router = routes::router(resources.clone());

    TestEnv {
        resources,
        router,
        user_id,
        auth_header: format!("Bearer {token}"),
        backend,
        _tmp: tmp,
    }
}

/// A well-formed turn request body
pub fn turn_body(chat_id: Uuid, text: &str) -> Value {
    json!({
        "id": chat_id,
        "message": {
            "id": Uuid::new_v4(),
            "role": "user",
            "parts": [{"type": "text", "text": text}]
        },
        "selectedChatModel": "chat-model",
        "selectedVisibilityType": "private"
    })
}
