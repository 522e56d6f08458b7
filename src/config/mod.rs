// ABOUTME: Configuration management for the colloquy server
// ABOUTME: Environment-only configuration with typed sub-structs and defaults
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Colloquy Contributors

//! Configuration management

/// Environment-driven server configuration
pub mod environment;

pub use environment::ServerConfig;
