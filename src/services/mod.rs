// ABOUTME: Domain services above the store and backend layers
// ABOUTME: Currently the turn orchestrator; routes stay thin by delegating here
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Colloquy Contributors

//! Domain services

/// Turn orchestration: the bounded generation/tool loop and its state machine
pub mod turn;
