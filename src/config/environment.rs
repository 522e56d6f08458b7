// ABOUTME: Environment variable configuration with validation and defaults
// ABOUTME: Single source of truth for ports, database URL, auth, backend, and limits
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Colloquy Contributors

//! # Server Configuration
//!
//! Environment-only configuration. Every knob has a default suitable for
//! local development except the JWT secret, which must be provided.

use std::env;

use crate::errors::{AppError, AppResult};

/// Top-level server configuration loaded from the environment
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP listen port
    pub http_port: u16,
    /// `SQLite` database URL
    pub database_url: String,
    /// Authentication settings
    pub auth: AuthConfig,
    /// LLM backend settings
    pub llm: LlmConfig,
    /// Model pricing catalog settings
    pub catalog: CatalogConfig,
    /// Resumable stream registry settings
    pub streams: StreamConfig,
    /// Turn limits and quotas
    pub limits: LimitConfig,
}

/// JWT authentication configuration
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// HS256 signing secret
    pub jwt_secret: String,
    /// Token lifetime in hours
    pub jwt_expiry_hours: i64,
}

/// LLM backend configuration (OpenAI-compatible endpoint)
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Base URL, e.g. `https://api.openai.com/v1`
    pub base_url: String,
    /// Bearer API key (optional for local servers)
    pub api_key: Option<String>,
    /// Backend model id for the default chat model
    pub default_model: String,
    /// Backend model id for the reasoning chat model
    pub reasoning_model: String,
    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,
}

/// Model pricing catalog configuration
#[derive(Debug, Clone)]
pub struct CatalogConfig {
    /// Catalog endpoint URL; `None` disables enrichment entirely
    pub url: Option<String>,
    /// Cache lifetime in seconds
    pub ttl_secs: u64,
}

/// Resumable stream registry configuration
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Whether the registry is enabled; disabled degrades to live-only streams
    pub enabled: bool,
    /// Maximum number of retained stream handles
    pub max_entries: usize,
    /// Broadcast channel capacity per stream
    pub channel_capacity: usize,
}

/// Turn limits and entitlement quotas
#[derive(Debug, Clone)]
pub struct LimitConfig {
    /// Wall-clock ceiling for one turn in seconds
    pub max_turn_secs: u64,
    /// Daily message cap for guest users
    pub guest_messages_per_day: i64,
    /// Daily message cap for regular users
    pub regular_messages_per_day: i64,
}

const DEFAULT_HTTP_PORT: u16 = 8080;
const DEFAULT_DATABASE_URL: &str = "sqlite:colloquy.db?mode=rwc";
const DEFAULT_JWT_EXPIRY_HOURS: i64 = 24;
const DEFAULT_LLM_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_CHAT_MODEL: &str = "gpt-4o";
const DEFAULT_REASONING_MODEL: &str = "o1-mini";
const DEFAULT_LLM_TIMEOUT_SECS: u64 = 300;
const DEFAULT_CATALOG_TTL_SECS: u64 = 24 * 60 * 60;
const DEFAULT_STREAM_MAX_ENTRIES: usize = 1000;
const DEFAULT_STREAM_CHANNEL_CAPACITY: usize = 256;
const DEFAULT_MAX_TURN_SECS: u64 = 60;
const DEFAULT_GUEST_MESSAGES_PER_DAY: i64 = 20;
const DEFAULT_REGULAR_MESSAGES_PER_DAY: i64 = 100;

impl ServerConfig {
    /// Load configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if `COLLOQUY_JWT_SECRET` is unset or a numeric
    /// variable fails to parse.
    pub fn from_env() -> AppResult<Self> {
        let jwt_secret = env::var("COLLOQUY_JWT_SECRET")
            .map_err(|_| AppError::config("COLLOQUY_JWT_SECRET is required"))?;

        Ok(Self {
            http_port: parse_or_default("COLLOQUY_HTTP_PORT", DEFAULT_HTTP_PORT)?,
            database_url: env_or_default("COLLOQUY_DATABASE_URL", DEFAULT_DATABASE_URL),
            auth: AuthConfig {
                jwt_secret,
                jwt_expiry_hours: parse_or_default(
                    "COLLOQUY_JWT_EXPIRY_HOURS",
                    DEFAULT_JWT_EXPIRY_HOURS,
                )?,
            },
            llm: LlmConfig {
                base_url: env_or_default("COLLOQUY_LLM_BASE_URL", DEFAULT_LLM_BASE_URL),
                api_key: env::var("COLLOQUY_LLM_API_KEY").ok().filter(|k| !k.is_empty()),
                default_model: env_or_default("COLLOQUY_CHAT_MODEL", DEFAULT_CHAT_MODEL),
                reasoning_model: env_or_default(
                    "COLLOQUY_REASONING_MODEL",
                    DEFAULT_REASONING_MODEL,
                ),
                request_timeout_secs: parse_or_default(
                    "COLLOQUY_LLM_TIMEOUT_SECS",
                    DEFAULT_LLM_TIMEOUT_SECS,
                )?,
            },
            catalog: CatalogConfig {
                url: env::var("COLLOQUY_CATALOG_URL").ok().filter(|u| !u.is_empty()),
                ttl_secs: parse_or_default("COLLOQUY_CATALOG_TTL_SECS", DEFAULT_CATALOG_TTL_SECS)?,
            },
            streams: StreamConfig {
                enabled: env_or_default("COLLOQUY_STREAMS_ENABLED", "true") != "false",
                max_entries: parse_or_default(
                    "COLLOQUY_STREAM_MAX_ENTRIES",
                    DEFAULT_STREAM_MAX_ENTRIES,
                )?,
                channel_capacity: parse_or_default(
                    "COLLOQUY_STREAM_CHANNEL_CAPACITY",
                    DEFAULT_STREAM_CHANNEL_CAPACITY,
                )?,
            },
            limits: LimitConfig {
                max_turn_secs: parse_or_default("COLLOQUY_MAX_TURN_SECS", DEFAULT_MAX_TURN_SECS)?,
                guest_messages_per_day: parse_or_default(
                    "COLLOQUY_GUEST_MESSAGES_PER_DAY",
                    DEFAULT_GUEST_MESSAGES_PER_DAY,
                )?,
                regular_messages_per_day: parse_or_default(
                    "COLLOQUY_REGULAR_MESSAGES_PER_DAY",
                    DEFAULT_REGULAR_MESSAGES_PER_DAY,
                )?,
            },
        })
    }

    /// One-line summary for startup logging
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "port={} db={} llm={} model={} streams={}",
            self.http_port,
            self.database_url,
            self.llm.base_url,
            self.llm.default_model,
            if self.streams.enabled { "on" } else { "off" }
        )
    }
}

fn env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn parse_or_default<T: std::str::FromStr>(key: &str, default: T) -> AppResult<T> {
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| AppError::config(format!("{key} is not a valid value: {raw}"))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::panic)]

    use super::*;

    #[test]
    fn test_defaults_without_env() {
        // Only the secret is mandatory; everything else has a default.
        std::env::set_var("COLLOQUY_JWT_SECRET", "test-secret");
        let config = ServerConfig::from_env().unwrap_or_else(|e| panic!("config: {e}"));
        assert_eq!(config.limits.max_turn_secs, DEFAULT_MAX_TURN_SECS);
        assert_eq!(config.catalog.ttl_secs, DEFAULT_CATALOG_TTL_SECS);
        assert!(config.streams.enabled);
    }
}
