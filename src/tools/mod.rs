// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Tool system for Tether
//!
//! Tools live in external tool servers, each addressed by a short server id.
//! The [`registry`] maps between the flat names the backend sees and
//! `(server id, tool name)` pairs, and the [`dispatcher`] runs the calls of
//! one turn concurrently and shapes their results.
//!
//! Servers are reached through the [`ToolServer`] trait; the MCP stdio
//! client in `crate::mcp` is the production implementation and
//! [`memory::InMemoryToolServer`] serves tests.

pub mod dispatcher;
pub mod memory;
pub mod registry;

pub use dispatcher::*;
pub use memory::InMemoryToolServer;
pub use registry::*;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::mcp::protocol::{CallToolResult, Tool};

/// A session with one external tool server
#[async_trait]
pub trait ToolServer: Send + Sync {
    /// Tools the server advertises
    async fn list_tools(&self) -> Result<Vec<Tool>>;

    /// Invoke a tool by its server-side name
    async fn call_tool(&self, name: &str, arguments: &Value) -> Result<CallToolResult>;
}
