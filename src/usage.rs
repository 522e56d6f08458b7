// ABOUTME: Usage reconciliation with best-effort model pricing enrichment
// ABOUTME: Catalog lookups are cached for a fixed interval and allowed to fail silently
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Colloquy Contributors

//! # Usage Reconciler
//!
//! After a turn completes, raw token counts from the backend are normalized
//! into an [`AppUsage`] summary. When a pricing catalog is configured, the
//! summary is enriched with dollar costs; the catalog is fetched over HTTP
//! at most once per TTL and a failed fetch falls back to raw usage. The
//! reconciler never fails a turn.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::config::environment::CatalogConfig;
use crate::llm::TokenUsage;

/// Normalized usage summary attached to the chat after a turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppUsage {
    /// Backend model id the turn ran against
    #[serde(rename = "modelId")]
    pub model_id: String,
    /// Tokens in the prompt(s)
    #[serde(rename = "inputTokens")]
    pub input_tokens: u32,
    /// Tokens generated
    #[serde(rename = "outputTokens")]
    pub output_tokens: u32,
    /// Total tokens
    #[serde(rename = "totalTokens")]
    pub total_tokens: u32,
    /// Prompt cost in USD, when pricing is known
    #[serde(rename = "inputCostUsd", skip_serializing_if = "Option::is_none")]
    pub input_cost_usd: Option<f64>,
    /// Completion cost in USD, when pricing is known
    #[serde(rename = "outputCostUsd", skip_serializing_if = "Option::is_none")]
    pub output_cost_usd: Option<f64>,
    /// Total cost in USD, when pricing is known
    #[serde(rename = "totalCostUsd", skip_serializing_if = "Option::is_none")]
    pub total_cost_usd: Option<f64>,
}

/// Per-token pricing for one model
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ModelPricing {
    /// USD per prompt token
    pub input_cost_per_token: f64,
    /// USD per completion token
    pub output_cost_per_token: f64,
}

/// Model pricing catalog as served by the catalog endpoint
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelCatalog {
    /// Pricing keyed by backend model id
    pub models: HashMap<String, ModelPricing>,
}

struct CachedCatalog {
    fetched_at: Instant,
    catalog: Arc<ModelCatalog>,
}

/// Cached, best-effort catalog client
///
/// Process-scoped singleton: construct once at startup and inject. The
/// first `get()` after the TTL elapses refetches; concurrent callers during
/// a refetch serialize on the write lock.
pub struct CatalogClient {
    http: reqwest::Client,
    url: Option<String>,
    ttl: Duration,
    cache: RwLock<Option<CachedCatalog>>,
}

impl CatalogClient {
    /// Create a client from catalog configuration
    #[must_use]
    pub fn new(config: &CatalogConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: config.url.clone(),
            ttl: Duration::from_secs(config.ttl_secs),
            cache: RwLock::new(None),
        }
    }

    /// Current catalog, fetching if stale
    ///
    /// Returns `None` when no catalog URL is configured or the fetch fails;
    /// failures are logged and swallowed.
    pub async fn get(&self) -> Option<Arc<ModelCatalog>> {
        let url = self.url.as_deref()?;

        {
            let cache = self.cache.read().await;
            if let Some(ref cached) = *cache {
                if cached.fetched_at.elapsed() < self.ttl {
                    return Some(cached.catalog.clone());
                }
            }
        }

        let mut cache = self.cache.write().await;
        // Another caller may have refreshed while we waited for the lock.
        if let Some(ref cached) = *cache {
            if cached.fetched_at.elapsed() < self.ttl {
                return Some(cached.catalog.clone());
            }
        }

        match self.fetch(url).await {
            Ok(catalog) => {
                let catalog = Arc::new(catalog);
                *cache = Some(CachedCatalog {
                    fetched_at: Instant::now(),
                    catalog: catalog.clone(),
                });
                Some(catalog)
            }
            Err(e) => {
                warn!("Model catalog unavailable, skipping enrichment: {e}");
                // Keep serving a stale catalog over nothing.
                cache.as_ref().map(|cached| cached.catalog.clone())
            }
        }
    }

    async fn fetch(&self, url: &str) -> Result<ModelCatalog, reqwest::Error> {
        debug!("Fetching model catalog from {url}");
        self.http
            .get(url)
            .timeout(Duration::from_secs(10))
            .send()
            .await?
            .error_for_status()?
            .json::<ModelCatalog>()
            .await
    }
}

/// Normalize raw usage, merging catalog pricing when available
#[must_use]
pub fn reconcile(model_id: &str, usage: TokenUsage, catalog: Option<&ModelCatalog>) -> AppUsage {
    let pricing = catalog.and_then(|c| c.models.get(model_id));

    let input_cost_usd = pricing.map(|p| p.input_cost_per_token * f64::from(usage.prompt_tokens));
    let output_cost_usd =
        pricing.map(|p| p.output_cost_per_token * f64::from(usage.completion_tokens));
    let total_cost_usd = match (input_cost_usd, output_cost_usd) {
        (Some(input), Some(output)) => Some(input + output),
        _ => None,
    };

    AppUsage {
        model_id: model_id.to_owned(),
        input_tokens: usage.prompt_tokens,
        output_tokens: usage.completion_tokens,
        total_tokens: usage.total_tokens,
        input_cost_usd,
        output_cost_usd,
        total_cost_usd,
    }
}
