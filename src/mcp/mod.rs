// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Model Context Protocol (MCP) client
//!
//! Connects to external tool servers over stdio and exposes them through the
//! `ToolServer` trait.

pub mod client;
pub mod protocol;

pub use client::McpClient;
pub use protocol::*;
