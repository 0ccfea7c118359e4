// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Tether - streaming, tool-augmented multi-turn conversation orchestrator.
//!
//! This crate exposes the runtime used by the `tether` CLI (`src/main.rs`)
//! and by embedders that drive conversations programmatically.
//!
//! Architecture highlights:
//! - `chat`: turn loop, stream translation, cancellation, cache checkpoints
//! - `llm`: backend trait, wire types, connection pool and backoff
//! - `tools`: tool server trait, flat-name registry, concurrent dispatch
//! - `mcp`: JSON-RPC client for stdio tool servers
//! - `config`: settings loading and validation

pub mod chat;
pub mod cli;
pub mod config;
pub mod error;
pub mod llm;
pub mod mcp;
pub mod tools;

pub use error::{Result, TetherError};
