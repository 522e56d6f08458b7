// ABOUTME: Library entry point for the colloquy chat turn server
// ABOUTME: Exposes the turn pipeline modules for the binary and integration tests
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Colloquy Contributors

#![deny(unsafe_code)]

//! # Colloquy Server
//!
//! An HTTP service that orchestrates AI chat turns: it validates a turn
//! request, gates it on identity and a daily quota, loads or creates the
//! conversation, drives a streaming LLM backend through a bounded tool
//! loop, and relays the output as a resumable server-sent-event stream
//! while keeping the persisted transcript consistent with what the client
//! observed.
//!
//! ## Architecture
//!
//! - **Routes**: thin axum handlers for validation, gating, and transport
//! - **Services**: the turn orchestrator and its per-chat leases
//! - **LLM**: backend abstraction over an `OpenAI`-compatible endpoint
//! - **Tools**: a closed dispatch table the model may invoke mid-turn
//! - **Streams**: replay-buffered registry backing stream resumption
//! - **Database**: append-only chat/message store over `SQLite`
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use colloquy_server::config::ServerConfig;
//! use colloquy_server::errors::AppResult;
//!
//! fn main() -> AppResult<()> {
//!     std::env::set_var("COLLOQUY_JWT_SECRET", "dev-secret");
//!     let config = ServerConfig::from_env()?;
//!     println!("colloquy-server will listen on port {}", config.http_port);
//!     Ok(())
//! }
//! ```

/// Authentication and session management
pub mod auth;

/// Configuration management
pub mod config;

/// Dependency injection container
pub mod context;

/// Persistence layer
pub mod database;

/// Per-user-type entitlement quotas
pub mod entitlements;

/// Unified error handling system
pub mod errors;

/// LLM backend abstraction
pub mod llm;

/// Logging configuration
pub mod logging;

/// Core domain types
pub mod models;

/// HTTP routes
pub mod routes;

/// Domain services
pub mod services;

/// Resumable stream registry
pub mod streams;

/// Tool dispatch surface
pub mod tools;

/// Usage reconciliation
pub mod usage;
