// ABOUTME: Axum HTTP testing utilities for integration tests
// ABOUTME: Builds requests and reads full responses, including terminated SSE streams

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tower::ServiceExt;

/// Upper bound when collecting response bodies
const BODY_LIMIT: usize = 4 * 1024 * 1024;

/// Helper to build and execute HTTP requests against axum routers
pub struct AxumTestRequest {
    method: Method,
    uri: String,
    headers: Vec<(String, String)>,
    body: Option<String>,
}

impl AxumTestRequest {
    /// Create a new GET request
    pub fn get(uri: &str) -> Self {
        Self::new(Method::GET, uri)
    }

    /// Create a new POST request
    pub fn post(uri: &str) -> Self {
        Self::new(Method::POST, uri)
    }

    /// Create a new DELETE request
    #[allow(dead_code)]
    pub fn delete(uri: &str) -> Self {
        Self::new(Method::DELETE, uri)
    }

    fn new(method: Method, uri: &str) -> Self {
        Self {
            method,
            uri: uri.to_owned(),
            headers: Vec::new(),
            body: None,
        }
    }

    /// Add a header to the request
    pub fn header(mut self, key: &str, value: &str) -> Self {
        self.headers.push((key.to_owned(), value.to_owned()));
        self
    }

    /// Add a JSON body to the request
    pub fn json<T: Serialize>(mut self, data: &T) -> Self {
        self.body = Some(serde_json::to_string(data).expect("Failed to serialize JSON"));
        self.headers.push((
            header::CONTENT_TYPE.as_str().to_owned(),
            "application/json".to_owned(),
        ));
        self
    }

    /// Execute the request against a router, reading the body to the end
    ///
    /// Turn streams terminate after their final event, so reading to the
    /// end also waits for the turn to reach a terminal state.
    pub async fn send(self, app: Router) -> AxumTestResponse {
        let mut builder = Request::builder().method(self.method).uri(self.uri);

        for (key, value) in self.headers {
            builder = builder.header(key, value);
        }

        let request = builder
            .body(Body::from(self.body.unwrap_or_default()))
            .expect("Failed to build request");

        let response = app.oneshot(request).await.expect("Failed to execute request");

        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), BODY_LIMIT)
            .await
            .expect("Failed to read response body");

        AxumTestResponse {
            status,
            body: String::from_utf8_lossy(&bytes).into_owned(),
        }
    }
}

/// A fully-read response
pub struct AxumTestResponse {
    status: StatusCode,
    body: String,
}

impl AxumTestResponse {
    /// Response status code
    pub fn status_code(&self) -> StatusCode {
        self.status
    }

    /// Raw body text
    #[allow(dead_code)]
    pub fn text(&self) -> &str {
        &self.body
    }

    /// Deserialize the body as JSON
    pub fn json<T: DeserializeOwned>(&self) -> T {
        serde_json::from_str(&self.body)
            .unwrap_or_else(|e| panic!("Failed to parse response JSON: {e}\nbody: {}", self.body))
    }

    /// Parse the body as a sequence of SSE `data:` records
    pub fn sse_events(&self) -> Vec<Value> {
        self.body
            .lines()
            .filter_map(|line| line.strip_prefix("data: "))
            .filter(|payload| !payload.trim().is_empty())
            .map(|payload| {
                serde_json::from_str(payload)
                    .unwrap_or_else(|e| panic!("Unparseable SSE payload: {e}\npayload: {payload}"))
            })
            .collect()
    }

    /// Event types in delivery order
    pub fn sse_event_types(&self) -> Vec<String> {
        self.sse_events()
            .iter()
            .filter_map(|event| event.get("type").and_then(Value::as_str))
            .map(ToOwned::to_owned)
            .collect()
    }
}
