// ABOUTME: Liveness endpoint reporting service status and version
// ABOUTME: No authentication; used by deploy probes
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Colloquy Contributors

use axum::{routing::get, Json, Router};
use serde::Serialize;

/// Health probe response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Always "ok" when the process is serving
    pub status: &'static str,
    /// Crate version
    pub version: &'static str,
}

/// Health routes
#[must_use]
pub fn routes() -> Router {
    Router::new().route("/health", get(health))
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
