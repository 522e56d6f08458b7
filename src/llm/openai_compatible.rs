// ABOUTME: OpenAI-compatible LLM backend with streaming tool-call support
// ABOUTME: Accumulates tool-call argument fragments across SSE chunks into complete invocations
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Colloquy Contributors

//! # `OpenAI`-Compatible Backend
//!
//! Works against any endpoint implementing the `OpenAI` chat completions
//! API, cloud or local. Streaming requests set
//! `stream_options.include_usage` so the final chunk carries token counts.
//!
//! Tool calls arrive fragmented in streaming mode: each SSE chunk may carry
//! a partial `arguments` string keyed by call index. The accumulator stitches
//! the fragments and emits complete [`ToolInvocation`]s after the text
//! deltas, before the final [`StepEvent::Finish`].

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, error, warn};

use super::sse_parser::{SseEvent, SseLineBuffer};
use super::{
    CompletionResponse, LlmMessage, LlmProvider, StepEvent, StepRequest, StepStream,
    TokenUsage, ToolDeclaration, ToolInvocation,
};
use crate::config::environment::LlmConfig;
use crate::errors::{AppError, ErrorCode};

/// Connection timeout for the backend
const CONNECT_TIMEOUT_SECS: u64 = 30;

// ============================================================================
// API Request/Response Types (OpenAI-compatible format)
// ============================================================================

#[derive(Debug, Serialize)]
struct OaiRequest {
    model: String,
    messages: Vec<OaiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<OaiStreamOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<OaiTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<String>,
}

#[derive(Debug, Serialize)]
struct OaiStreamOptions {
    include_usage: bool,
}

#[derive(Debug, Clone, Serialize)]
struct OaiTool {
    #[serde(rename = "type")]
    tool_type: String,
    function: OaiFunction,
}

#[derive(Debug, Clone, Serialize)]
struct OaiFunction {
    name: String,
    description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OaiMessage {
    role: String,
    content: String,
}

impl From<&LlmMessage> for OaiMessage {
    fn from(msg: &LlmMessage) -> Self {
        Self {
            role: msg.role.as_str().to_owned(),
            content: msg.content.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct OaiResponse {
    choices: Vec<OaiChoice>,
    #[serde(default)]
    usage: Option<OaiUsage>,
}

#[derive(Debug, Deserialize)]
struct OaiChoice {
    message: OaiResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OaiResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OaiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

impl From<OaiUsage> for TokenUsage {
    fn from(u: OaiUsage) -> Self {
        Self {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }
    }
}

#[derive(Debug, Deserialize)]
struct OaiStreamChunk {
    #[serde(default)]
    choices: Vec<OaiStreamChoice>,
    #[serde(default)]
    usage: Option<OaiUsage>,
}

#[derive(Debug, Deserialize)]
struct OaiStreamChoice {
    delta: OaiDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OaiDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<OaiToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct OaiToolCallDelta {
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<OaiFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct OaiFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OaiErrorResponse {
    error: OaiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct OaiErrorDetail {
    message: String,
    #[serde(rename = "type")]
    error_type: Option<String>,
}

// ============================================================================
// Tool-call fragment accumulation
// ============================================================================

/// Stitches streamed tool-call fragments into complete invocations
#[derive(Debug, Default)]
struct ToolCallAccumulator {
    pending: BTreeMap<usize, PendingCall>,
}

#[derive(Debug, Default)]
struct PendingCall {
    id: String,
    name: String,
    arguments: String,
}

impl ToolCallAccumulator {
    fn feed(&mut self, deltas: Vec<OaiToolCallDelta>) {
        for delta in deltas {
            let entry = self.pending.entry(delta.index).or_default();
            if let Some(id) = delta.id {
                entry.id = id;
            }
            if let Some(function) = delta.function {
                if let Some(name) = function.name {
                    entry.name.push_str(&name);
                }
                if let Some(arguments) = function.arguments {
                    entry.arguments.push_str(&arguments);
                }
            }
        }
    }

    fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Drain accumulated calls in index order
    fn finish(&mut self) -> Vec<ToolInvocation> {
        std::mem::take(&mut self.pending)
            .into_values()
            .map(|call| {
                let args: Value = if call.arguments.trim().is_empty() {
                    Value::Object(serde_json::Map::new())
                } else {
                    serde_json::from_str(&call.arguments).unwrap_or_else(|e| {
                        warn!("Unparseable tool arguments for {}: {e}", call.name);
                        Value::Object(serde_json::Map::new())
                    })
                };
                ToolInvocation {
                    id: call.id,
                    name: call.name,
                    args,
                }
            })
            .collect()
    }
}

// ============================================================================
// Provider Configuration
// ============================================================================

/// Configuration for the `OpenAI`-compatible backend
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleConfig {
    /// Base URL, e.g. `https://api.openai.com/v1`
    pub base_url: String,
    /// Bearer API key (optional for local servers)
    pub api_key: Option<String>,
    /// Per-request timeout
    pub request_timeout: Duration,
}

impl From<&LlmConfig> for OpenAiCompatibleConfig {
    fn from(config: &LlmConfig) -> Self {
        Self {
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
        }
    }
}

// ============================================================================
// Provider Implementation
// ============================================================================

/// Generic `OpenAI`-compatible LLM backend
pub struct OpenAiCompatibleProvider {
    client: Client,
    config: OpenAiCompatibleConfig,
}

impl OpenAiCompatibleProvider {
    /// Create a new provider
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(config: OpenAiCompatibleConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| AppError::internal(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    fn api_url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), endpoint)
    }

    fn add_auth_header(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(ref api_key) = self.config.api_key {
            request.header("Authorization", format!("Bearer {api_key}"))
        } else {
            request
        }
    }

    fn convert_tools(tools: &[ToolDeclaration]) -> Vec<OaiTool> {
        tools
            .iter()
            .map(|tool| OaiTool {
                tool_type: "function".to_owned(),
                function: OaiFunction {
                    name: tool.name.clone(),
                    description: tool.description.clone(),
                    parameters: tool.parameters.clone(),
                },
            })
            .collect()
    }

    fn build_request(request: &StepRequest, stream: bool) -> OaiRequest {
        let tools = (!request.tools.is_empty()).then(|| Self::convert_tools(&request.tools));
        OaiRequest {
            model: request.model.clone(),
            messages: request.messages.iter().map(OaiMessage::from).collect(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream: Some(stream),
            stream_options: stream.then_some(OaiStreamOptions {
                include_usage: true,
            }),
            tool_choice: tools.as_ref().map(|_| "auto".to_owned()),
            tools,
        }
    }

    fn connect_error(&self, e: &reqwest::Error) -> AppError {
        error!("Backend request to {} failed: {e}", self.config.base_url);
        if e.is_connect() || e.is_timeout() {
            AppError::offline(format!(
                "Cannot reach model backend at {}",
                self.config.base_url
            ))
        } else {
            AppError::offline(format!("Model backend request failed: {e}"))
        }
    }

    fn parse_error_response(status: reqwest::StatusCode, body: &str) -> AppError {
        if let Ok(error_response) = serde_json::from_str::<OaiErrorResponse>(body) {
            let error_type = error_response
                .error
                .error_type
                .unwrap_or_else(|| "unknown".to_owned());

            match status.as_u16() {
                401 => AppError::offline(format!(
                    "Backend authentication failed: {}",
                    error_response.error.message
                )),
                429 => AppError::new(
                    ErrorCode::Offline,
                    format!("Backend rate limited: {}", error_response.error.message),
                ),
                400 => AppError::bad_request(format!(
                    "Backend rejected the request: {}",
                    error_response.error.message
                )),
                404 => AppError::offline(format!(
                    "Model or endpoint not found: {}",
                    error_response.error.message
                )),
                _ => AppError::offline(format!(
                    "{error_type} - {}",
                    error_response.error.message
                )),
            }
        } else {
            AppError::offline(format!(
                "Backend error ({status}): {}",
                body.chars().take(200).collect::<String>()
            ))
        }
    }

    /// Translate one parsed SSE data payload into step events
    fn chunk_events(
        json_str: &str,
        accumulator: &mut ToolCallAccumulator,
        usage: &mut Option<TokenUsage>,
        finish_reason: &mut Option<String>,
    ) -> Vec<StepEvent> {
        let chunk: OaiStreamChunk = match serde_json::from_str(json_str) {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!("Failed to parse stream chunk: {e}");
                return Vec::new();
            }
        };

        if let Some(chunk_usage) = chunk.usage {
            *usage = Some(chunk_usage.into());
        }

        let mut events = Vec::new();
        for choice in chunk.choices {
            if let Some(content) = choice.delta.content {
                if !content.is_empty() {
                    events.push(StepEvent::TextDelta(content));
                }
            }
            if let Some(tool_calls) = choice.delta.tool_calls {
                accumulator.feed(tool_calls);
            }
            if let Some(reason) = choice.finish_reason {
                *finish_reason = Some(reason);
            }
        }
        events
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &'static str {
        "openai-compatible"
    }

    async fn stream_step(&self, request: &StepRequest) -> Result<StepStream, AppError> {
        debug!(
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Starting streaming step"
        );

        let oai_request = Self::build_request(request, true);

        let http_request = self
            .client
            .post(self.api_url("chat/completions"))
            .header("Content-Type", "application/json")
            .json(&oai_request);

        let response = self
            .add_auth_header(http_request)
            .send()
            .await
            .map_err(|e| self.connect_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::parse_error_response(status, &body));
        }

        let mut byte_stream = Box::pin(response.bytes_stream());

        let stream = async_stream::stream! {
            let mut parser = SseLineBuffer::new();
            let mut accumulator = ToolCallAccumulator::default();
            let mut usage: Option<TokenUsage> = None;
            let mut finish_reason: Option<String> = None;

            while let Some(chunk_result) = byte_stream.next().await {
                match chunk_result {
                    Ok(bytes) => {
                        for event in parser.feed(&bytes) {
                            match event {
                                SseEvent::Data(json_str) => {
                                    for step_event in Self::chunk_events(
                                        &json_str,
                                        &mut accumulator,
                                        &mut usage,
                                        &mut finish_reason,
                                    ) {
                                        yield Ok(step_event);
                                    }
                                }
                                SseEvent::Done => {}
                            }
                        }
                    }
                    Err(e) => {
                        yield Err(AppError::offline(format!("Stream read error: {e}")));
                        return;
                    }
                }
            }

            for event in parser.flush() {
                if let SseEvent::Data(json_str) = event {
                    for step_event in Self::chunk_events(
                        &json_str,
                        &mut accumulator,
                        &mut usage,
                        &mut finish_reason,
                    ) {
                        yield Ok(step_event);
                    }
                }
            }

            if !accumulator.is_empty() {
                for call in accumulator.finish() {
                    yield Ok(StepEvent::ToolCall(call));
                }
            }

            yield Ok(StepEvent::Finish { usage, finish_reason });
        };

        Ok(Box::pin(stream))
    }

    async fn complete(&self, request: &StepRequest) -> Result<CompletionResponse, AppError> {
        let oai_request = Self::build_request(request, false);

        let http_request = self
            .client
            .post(self.api_url("chat/completions"))
            .header("Content-Type", "application/json")
            .json(&oai_request);

        let response = self
            .add_auth_header(http_request)
            .send()
            .await
            .map_err(|e| self.connect_error(&e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AppError::offline(format!("Failed to read backend response: {e}")))?;

        if !status.is_success() {
            return Err(Self::parse_error_response(status, &body));
        }

        let oai_response: OaiResponse = serde_json::from_str(&body).map_err(|e| {
            error!(
                "Failed to parse backend response: {e} - body: {}",
                body.chars().take(500).collect::<String>()
            );
            AppError::offline(format!("Failed to parse backend response: {e}"))
        })?;

        let choice = oai_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AppError::offline("Backend returned no choices"))?;

        Ok(CompletionResponse {
            content: choice.message.content.unwrap_or_default(),
            usage: oai_response.usage.map(TokenUsage::from),
            finish_reason: choice.finish_reason,
        })
    }

    async fn health_check(&self) -> Result<bool, AppError> {
        let http_request = self.client.get(self.api_url("models"));

        let response = self
            .add_auth_header(http_request)
            .send()
            .await
            .map_err(|e| self.connect_error(&e))?;

        Ok(response.status().is_success())
    }
}
