// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! In-process tool server
//!
//! Serves tools from closures. Used by tests and by embedders that want to
//! expose Rust functions to the model without a child process.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::ToolServer;
use crate::error::{Result, TetherError};
use crate::mcp::protocol::{CallToolResult, Tool, ToolContent};

type Handler = Arc<dyn Fn(&Value) -> Result<Vec<ToolContent>> + Send + Sync>;

struct Entry {
    tool: Tool,
    handler: Handler,
    delay: Option<Duration>,
}

/// Tool server backed by in-process handlers
#[derive(Default)]
pub struct InMemoryToolServer {
    tools: BTreeMap<String, Entry>,
    fail_listing: Option<String>,
    calls: AtomicUsize,
}

impl InMemoryToolServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool whose handler receives the call arguments
    pub fn with_tool<F>(mut self, name: &str, description: &str, handler: F) -> Self
    where
        F: Fn(&Value) -> Result<Vec<ToolContent>> + Send + Sync + 'static,
    {
        self.tools.insert(
            name.to_string(),
            Entry {
                tool: Tool {
                    name: name.to_string(),
                    description: description.to_string(),
                    input_schema: json!({"type": "object", "properties": {}}),
                },
                handler: Arc::new(handler),
                delay: None,
            },
        );
        self
    }

    /// Add a tool that sleeps before answering
    pub fn with_slow_tool<F>(self, name: &str, delay: Duration, handler: F) -> Self
    where
        F: Fn(&Value) -> Result<Vec<ToolContent>> + Send + Sync + 'static,
    {
        let mut server = self.with_tool(name, "", handler);
        if let Some(entry) = server.tools.get_mut(name) {
            entry.delay = Some(delay);
        }
        server
    }

    /// Make `list_tools` fail with the given message
    pub fn failing_list(mut self, message: &str) -> Self {
        self.fail_listing = Some(message.to_string());
        self
    }

    /// Number of `call_tool` invocations received
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ToolServer for InMemoryToolServer {
    async fn list_tools(&self) -> Result<Vec<Tool>> {
        if let Some(message) = &self.fail_listing {
            return Err(TetherError::Mcp(message.clone()));
        }
        Ok(self.tools.values().map(|entry| entry.tool.clone()).collect())
    }

    async fn call_tool(&self, name: &str, arguments: &Value) -> Result<CallToolResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let entry = self
            .tools
            .get(name)
            .ok_or_else(|| TetherError::UnknownTool(name.to_string()))?;
        if let Some(delay) = entry.delay {
            tokio::time::sleep(delay).await;
        }
        let content = (entry.handler)(arguments)?;
        Ok(CallToolResult {
            content,
            is_error: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_list_and_call() {
        let server = InMemoryToolServer::new().with_tool("echo", "Echo input", |args| {
            Ok(vec![ToolContent::Text {
                text: args.to_string(),
            }])
        });

        let tools = server.list_tools().await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].description, "Echo input");

        let result = server.call_tool("echo", &json!({"a": 1})).await.unwrap();
        assert_eq!(
            result.content,
            vec![ToolContent::Text {
                text: "{\"a\":1}".to_string()
            }]
        );
        assert_eq!(server.call_count(), 1);
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let server = InMemoryToolServer::new();
        assert!(server.call_tool("missing", &json!({})).await.is_err());
    }

    #[tokio::test]
    async fn test_failing_list() {
        let server = InMemoryToolServer::new().failing_list("connection refused");
        let err = server.list_tools().await.unwrap_err();
        assert!(err.to_string().contains("connection refused"));
    }
}
