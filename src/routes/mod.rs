// ABOUTME: HTTP route assembly for the chat turn API
// ABOUTME: Merges chat and health routers and applies tracing and CORS layers
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Colloquy Contributors

//! HTTP routes

/// Chat turn, resume, history, and delete handlers
pub mod chat;
/// Liveness endpoint
pub mod health;

use axum::Router;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::context::ServerResources;

/// Build the full application router
#[must_use]
pub fn router(resources: Arc<ServerResources>) -> Router {
    Router::new()
        .merge(chat::ChatRoutes::routes(resources))
        .merge(health::routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
