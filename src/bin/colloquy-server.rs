// ABOUTME: Server binary: config load, logging init, database setup, and axum serve
// ABOUTME: Shuts down gracefully on ctrl-c while detached turns finish persistence
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Colloquy Contributors

//! # Colloquy Server Binary
//!
//! Starts the chat turn orchestration service: loads environment
//! configuration, connects and migrates the database, builds the shared
//! resources, and serves the HTTP API.

use anyhow::Result;
use clap::Parser;
use colloquy_server::{
    config::ServerConfig,
    context::ServerResources,
    database,
    llm::{OpenAiCompatibleConfig, OpenAiCompatibleProvider},
    logging, routes,
};
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "colloquy-server")]
#[command(about = "AI chat turn orchestration server")]
struct Args {
    /// Override HTTP port
    #[arg(long)]
    http_port: Option<u16>,

    /// Override database URL
    #[arg(long)]
    database_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = ServerConfig::from_env()?;
    if let Some(http_port) = args.http_port {
        config.http_port = http_port;
    }
    if let Some(database_url) = args.database_url {
        config.database_url = database_url;
    }

    logging::init_from_env()?;

    info!("Starting colloquy-server");
    info!("{}", config.summary());

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;
    database::migrate(&pool).await?;
    info!("Database ready: {}", config.database_url);

    let provider = Arc::new(OpenAiCompatibleProvider::new(OpenAiCompatibleConfig::from(
        &config.llm,
    ))?);

    let config = Arc::new(config);
    let resources = Arc::new(ServerResources::new(pool, provider, config.clone()));
    let app = routes::router(resources);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.http_port)).await?;
    info!("Listening on port {}", config.http_port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to install shutdown handler: {e}");
    }
}
