// ABOUTME: Shared helper modules for integration tests
// ABOUTME: Request builder utilities for driving axum routers without a server

/// Axum HTTP testing utilities
pub mod axum_test;
