// ABOUTME: Centralized resource container for dependency injection
// ABOUTME: Holds the store, auth, backend provider, stream registry, and catalog singletons
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Colloquy Contributors

//! # Server Resources
//!
//! Process-scoped singletons are built once at startup and injected into
//! routes via axum state, never referenced ad hoc. The catalog client and
//! stream registry initialize lazily internally and need no teardown.

use sqlx::SqlitePool;
use std::sync::Arc;

use crate::auth::AuthManager;
use crate::config::ServerConfig;
use crate::database::{ChatStore, DocumentStore};
use crate::llm::LlmProvider;
use crate::models::ChatModel;
use crate::services::turn::TurnLeases;
use crate::streams::StreamRegistry;
use crate::tools::ToolRegistry;
use crate::usage::CatalogClient;

/// Centralized resource container for dependency injection
pub struct ServerResources {
    /// Chat and message store
    pub store: ChatStore,
    /// Document store backing the document tools
    pub documents: Arc<DocumentStore>,
    /// JWT session manager
    pub auth: Arc<AuthManager>,
    /// LLM backend
    pub provider: Arc<dyn LlmProvider>,
    /// Resumable stream registry; `None` degrades to live-only streams
    pub streams: Option<Arc<StreamRegistry>>,
    /// Cached model pricing catalog
    pub catalog: Arc<CatalogClient>,
    /// Tool declarations and dispatch
    pub tools: Arc<ToolRegistry>,
    /// Per-chat turn leases
    pub leases: TurnLeases,
    /// Server configuration
    pub config: Arc<ServerConfig>,
}

impl ServerResources {
    /// Assemble resources around a database pool and backend provider
    #[must_use]
    pub fn new(pool: SqlitePool, provider: Arc<dyn LlmProvider>, config: Arc<ServerConfig>) -> Self {
        let streams = config
            .streams
            .enabled
            .then(|| Arc::new(StreamRegistry::new(&config.streams)));

        Self {
            store: ChatStore::new(pool.clone()),
            documents: Arc::new(DocumentStore::new(pool)),
            auth: Arc::new(AuthManager::new(
                config.auth.jwt_secret.as_bytes(),
                config.auth.jwt_expiry_hours,
            )),
            provider,
            streams,
            catalog: Arc::new(CatalogClient::new(&config.catalog)),
            tools: Arc::new(ToolRegistry::new()),
            leases: TurnLeases::new(),
            config,
        }
    }

    /// Backend model id for a client-facing chat model
    #[must_use]
    pub fn backend_model(&self, model: ChatModel) -> String {
        match model {
            ChatModel::Default => self.config.llm.default_model.clone(),
            ChatModel::Reasoning => self.config.llm.reasoning_model.clone(),
        }
    }
}
