// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Tool dispatch
//!
//! Resolves flat tool names through the registry, runs every call of a turn
//! concurrently, and shapes each server response into the three result
//! variants the rest of the loop needs. A failing call never affects its
//! siblings: it becomes an error result built locally.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use super::{ToolNameRegistry, ToolServer};
use crate::error::{Result, TetherError};
use crate::llm::message::{
    ImageBlock, ImageSource, ToolResultBlock, ToolResultContent, ToolResultStatus, ToolUseBlock,
};
use crate::llm::provider::{ToolConfig, ToolEntry, ToolInputSchema, ToolSpec};
use crate::mcp::protocol::{CallToolResult, ToolContent};

/// A completed tool call from one turn
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    pub tool_use_id: String,
    /// Flat name as the backend sent it
    pub name: String,
    /// Parsed input; `{}` when the input was empty or did not parse
    pub input: Value,
    /// Parse failure of the streamed input, if any
    #[serde(skip)]
    pub input_error: Option<String>,
}

impl ToolCall {
    pub fn new(tool_use_id: impl Into<String>, name: impl Into<String>, input: Value) -> Self {
        Self {
            tool_use_id: tool_use_id.into(),
            name: name.into(),
            input,
            input_error: None,
        }
    }

    /// History block for this call
    pub fn to_block(&self) -> ToolUseBlock {
        ToolUseBlock {
            tool_use_id: self.tool_use_id.clone(),
            name: self.name.clone(),
            input: self.input.clone(),
        }
    }
}

/// One call's result in every shape consumers need
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    pub call: ToolCall,
    /// Text plus raw image bytes, for the next backend request
    pub full: ToolResultBlock,
    /// Text only, for logs and compact history
    pub text_only: ToolResultBlock,
    /// Text plus base64 images, for JSON transport and persistence
    pub serializable: ToolResultBlock,
}

impl ToolOutcome {
    /// Same error result in all three shapes
    fn failed(call: &ToolCall, message: String) -> Self {
        let result = ToolResultBlock::error(call.tool_use_id.clone(), message);
        Self {
            call: call.clone(),
            full: result.clone(),
            text_only: result.clone(),
            serializable: result,
        }
    }

    pub fn is_error(&self) -> bool {
        self.full.is_error()
    }
}

/// Tool server that failed to list its tools
#[derive(Debug)]
pub struct ListingFailure {
    pub server_id: String,
    pub error: TetherError,
}

/// Routes tool calls to the servers that own them
pub struct ToolDispatcher {
    registry: Arc<ToolNameRegistry>,
    servers: HashMap<String, Arc<dyn ToolServer>>,
}

impl ToolDispatcher {
    pub fn new(registry: Arc<ToolNameRegistry>) -> Self {
        Self {
            registry,
            servers: HashMap::new(),
        }
    }

    pub fn with_server(mut self, server_id: impl Into<String>, server: Arc<dyn ToolServer>) -> Self {
        self.add_server(server_id, server);
        self
    }

    pub fn add_server(&mut self, server_id: impl Into<String>, server: Arc<dyn ToolServer>) {
        self.servers.insert(server_id.into(), server);
    }

    pub fn registry(&self) -> &Arc<ToolNameRegistry> {
        &self.registry
    }

    /// Ids of connected servers, sorted
    pub fn server_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.servers.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Assemble the tool list for the requested servers, registering flat
    /// names along the way. Servers that fail to list are reported, not fatal.
    pub async fn tool_config(&self, server_ids: &[String]) -> (ToolConfig, Vec<ListingFailure>) {
        let mut config = ToolConfig::default();
        let mut failures = Vec::new();

        for server_id in server_ids {
            let Some(server) = self.servers.get(server_id) else {
                failures.push(ListingFailure {
                    server_id: server_id.clone(),
                    error: TetherError::Mcp(format!("no tool server connected for id '{}'", server_id)),
                });
                continue;
            };

            match server.list_tools().await {
                Ok(tools) => {
                    tracing::debug!(
                        target: "tether.tools.dispatch",
                        server_id = %server_id,
                        tool_count = tools.len(),
                        "listed tools"
                    );
                    config.tools.extend(tools.into_iter().map(|tool| {
                        ToolEntry::ToolSpec(ToolSpec {
                            name: self.registry.register(server_id, &tool.name),
                            description: tool.description,
                            input_schema: ToolInputSchema {
                                json: tool.input_schema,
                            },
                        })
                    }));
                }
                Err(error) => {
                    tracing::error!(
                        target: "tether.tools.dispatch",
                        server_id = %server_id,
                        error = %error,
                        "failed to list tools"
                    );
                    failures.push(ListingFailure {
                        server_id: server_id.clone(),
                        error,
                    });
                }
            }
        }

        (config, failures)
    }

    /// Run every call concurrently; outcomes come back in call order.
    pub async fn dispatch(&self, calls: &[ToolCall]) -> Vec<ToolOutcome> {
        join_all(calls.iter().map(|call| self.dispatch_one(call))).await
    }

    async fn dispatch_one(&self, call: &ToolCall) -> ToolOutcome {
        tracing::info!(
            target: "tether.tools.dispatch",
            tool = %call.name,
            tool_use_id = %call.tool_use_id,
            "calling tool"
        );

        let shaped = match self.invoke(call).await {
            Ok(result) => shape(call, result),
            Err(error) => Err(error),
        };

        match shaped {
            Ok(outcome) => outcome,
            Err(error) => {
                tracing::warn!(
                    target: "tether.tools.dispatch",
                    tool = %call.name,
                    tool_use_id = %call.tool_use_id,
                    error = %error,
                    "tool call failed"
                );
                ToolOutcome::failed(
                    call,
                    format!("{} tool call is failed. error:{}", call.name, error),
                )
            }
        }
    }

    async fn invoke(&self, call: &ToolCall) -> Result<CallToolResult> {
        if let Some(message) = &call.input_error {
            return Err(TetherError::MalformedToolInput {
                tool: call.name.clone(),
                message: message.clone(),
            });
        }

        let (server_id, tool_name) = self.registry.resolve(&call.name)?;
        let server = self.servers.get(&server_id).ok_or_else(|| {
            TetherError::ToolDispatch(format!("no tool server connected for id '{}'", server_id))
        })?;
        server.call_tool(&tool_name, &call.input).await
    }
}

/// Split a server response into the three result variants.
fn shape(call: &ToolCall, result: CallToolResult) -> Result<ToolOutcome> {
    let mut texts = Vec::new();
    let mut raw_images = Vec::new();
    let mut encoded_images = Vec::new();

    for content in result.content {
        match content {
            ToolContent::Text { text } => texts.push(text),
            ToolContent::Resource { resource } => {
                if let Some(text) = resource.text {
                    texts.push(text);
                }
            }
            ToolContent::Image { data, mime_type } => {
                let format = mime_type
                    .strip_prefix("image/")
                    .unwrap_or(&mime_type)
                    .to_string();
                let bytes = STANDARD.decode(data.as_bytes()).map_err(|e| {
                    TetherError::ToolDispatch(format!("image content is not valid base64: {}", e))
                })?;
                raw_images.push(ToolResultContent::Image(ImageBlock {
                    format: format.clone(),
                    source: ImageSource::Bytes(bytes),
                }));
                encoded_images.push(ToolResultContent::Image(ImageBlock {
                    format,
                    source: ImageSource::Base64(data),
                }));
            }
        }
    }

    let status = if result.is_error == Some(true) {
        ToolResultStatus::Error
    } else {
        ToolResultStatus::Success
    };
    let text = ToolResultContent::Text(texts.join("\n"));
    let block = |content: Vec<ToolResultContent>| ToolResultBlock {
        tool_use_id: call.tool_use_id.clone(),
        content,
        status,
    };

    let mut full = vec![text.clone()];
    full.extend(raw_images);
    let mut serializable = vec![text.clone()];
    serializable.extend(encoded_images);

    Ok(ToolOutcome {
        call: call.clone(),
        full: block(full),
        text_only: block(vec![text]),
        serializable: block(serializable),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::memory::InMemoryToolServer;
    use serde_json::json;
    use std::time::{Duration, Instant};

    fn text(value: &str) -> Vec<ToolContent> {
        vec![ToolContent::Text {
            text: value.to_string(),
        }]
    }

    fn catalog() -> InMemoryToolServer {
        InMemoryToolServer::new()
            .with_tool("priceLookup", "Look up a price", |args| {
                Ok(text(&format!("price for {}", args["code"].as_str().unwrap_or("?"))))
            })
            .with_tool("ok", "", |_| Ok(text("ok")))
            .with_tool("broken", "", |_| {
                Err(TetherError::ToolDispatch("database offline".to_string()))
            })
            .with_tool("snapshot", "", |_| {
                Ok(vec![
                    ToolContent::Text {
                        text: "caption".to_string(),
                    },
                    ToolContent::Image {
                        data: "AQID".to_string(),
                        mime_type: "image/png".to_string(),
                    },
                ])
            })
    }

    async fn dispatcher_with(server: InMemoryToolServer) -> (ToolDispatcher, Arc<InMemoryToolServer>) {
        let server = Arc::new(server);
        let dispatcher = ToolDispatcher::new(Arc::new(ToolNameRegistry::new()))
            .with_server("catalog", server.clone() as Arc<dyn ToolServer>);
        let (_, failures) = dispatcher.tool_config(&["catalog".to_string()]).await;
        assert!(failures.is_empty());
        (dispatcher, server)
    }

    #[tokio::test]
    async fn test_tool_config_uses_flat_names() {
        let (dispatcher, _) = dispatcher_with(catalog()).await;
        let (config, _) = dispatcher.tool_config(&["catalog".to_string()]).await;
        let names: Vec<&str> = config.specs().map(|s| s.name.as_str()).collect();
        assert!(names.contains(&"catalog___priceLookup"));
        assert_eq!(names.len(), 4);
    }

    #[tokio::test]
    async fn test_tool_config_reports_failures() {
        let dispatcher = ToolDispatcher::new(Arc::new(ToolNameRegistry::new()))
            .with_server("good", Arc::new(catalog()) as Arc<dyn ToolServer>)
            .with_server(
                "bad",
                Arc::new(InMemoryToolServer::new().failing_list("refused")) as Arc<dyn ToolServer>,
            );
        let (config, failures) = dispatcher
            .tool_config(&["bad".to_string(), "good".to_string(), "ghost".to_string()])
            .await;
        assert_eq!(config.specs().count(), 4);
        let failed: Vec<&str> = failures.iter().map(|f| f.server_id.as_str()).collect();
        assert_eq!(failed, vec!["bad", "ghost"]);
    }

    #[tokio::test]
    async fn test_one_failure_does_not_void_siblings() {
        let (dispatcher, _) = dispatcher_with(catalog()).await;
        let calls = vec![
            ToolCall::new("t1", "catalog___ok", json!({})),
            ToolCall::new("t2", "catalog___broken", json!({})),
        ];

        let outcomes = dispatcher.dispatch(&calls).await;
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].call.tool_use_id, "t1");
        assert!(!outcomes[0].is_error());
        assert_eq!(outcomes[0].full.text(), "ok");

        assert_eq!(outcomes[1].call.tool_use_id, "t2");
        assert!(outcomes[1].is_error());
        let message = outcomes[1].full.text();
        assert!(message.starts_with("catalog___broken tool call is failed. error:"));
        assert!(message.contains("database offline"));
    }

    #[tokio::test]
    async fn test_unknown_tool_is_per_call_error() {
        let (dispatcher, server) = dispatcher_with(catalog()).await;
        let outcomes = dispatcher
            .dispatch(&[ToolCall::new("t1", "nowhere___thing", json!({}))])
            .await;
        assert!(outcomes[0].is_error());
        assert!(outcomes[0].full.text().contains("Unknown tool"));
        assert_eq!(server.call_count(), 0);
    }

    #[tokio::test]
    async fn test_malformed_input_never_reaches_server() {
        let (dispatcher, server) = dispatcher_with(catalog()).await;
        let mut call = ToolCall::new("t1", "catalog___ok", json!({}));
        call.input_error = Some("expected value at line 1 column 1".to_string());

        let outcomes = dispatcher.dispatch(&[call]).await;
        assert!(outcomes[0].is_error());
        assert!(outcomes[0].full.text().contains("Malformed tool input"));
        assert_eq!(server.call_count(), 0);
    }

    #[tokio::test]
    async fn test_image_result_variants() {
        let (dispatcher, _) = dispatcher_with(catalog()).await;
        let outcomes = dispatcher
            .dispatch(&[ToolCall::new("t1", "catalog___snapshot", json!({}))])
            .await;
        let outcome = &outcomes[0];

        assert_eq!(outcome.full.image_count(), 1);
        assert_eq!(outcome.text_only.image_count(), 0);
        assert_eq!(outcome.text_only.text(), "caption");
        match &outcome.full.content[1] {
            ToolResultContent::Image(image) => {
                assert_eq!(image.format, "png");
                assert_eq!(image.source, ImageSource::Bytes(vec![1, 2, 3]));
            }
            other => panic!("expected image, got {:?}", other),
        }
        match &outcome.serializable.content[1] {
            ToolResultContent::Image(image) => {
                assert_eq!(image.source, ImageSource::Base64("AQID".to_string()));
            }
            other => panic!("expected image, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_invalid_image_data_is_error() {
        let server = InMemoryToolServer::new().with_tool("bad_image", "", |_| {
            Ok(vec![ToolContent::Image {
                data: "not base64!!".to_string(),
                mime_type: "image/png".to_string(),
            }])
        });
        let (dispatcher, _) = dispatcher_with(server).await;
        let outcomes = dispatcher
            .dispatch(&[ToolCall::new("t1", "catalog___bad_image", json!({}))])
            .await;
        assert!(outcomes[0].is_error());
    }

    #[tokio::test]
    async fn test_calls_run_concurrently_and_keep_order() {
        let server = InMemoryToolServer::new()
            .with_slow_tool("slow", Duration::from_millis(200), |_| Ok(text("slow")))
            .with_slow_tool("fast", Duration::from_millis(50), |_| Ok(text("fast")));
        let (dispatcher, _) = dispatcher_with(server).await;

        let calls = vec![
            ToolCall::new("a", "catalog___slow", json!({})),
            ToolCall::new("b", "catalog___fast", json!({})),
            ToolCall::new("c", "catalog___slow", json!({})),
        ];
        let started = Instant::now();
        let outcomes = dispatcher.dispatch(&calls).await;
        let elapsed = started.elapsed();

        let ids: Vec<&str> = outcomes.iter().map(|o| o.call.tool_use_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!(elapsed < Duration::from_millis(400), "took {:?}", elapsed);
    }

    #[test]
    fn test_tool_call_serializes_without_error_field() {
        let mut call = ToolCall::new("t1", "catalog___ok", json!({"q": 1}));
        call.input_error = Some("bad".to_string());
        let value = serde_json::to_value(&call).unwrap();
        assert_eq!(value, json!({"toolUseId": "t1", "name": "catalog___ok", "input": {"q": 1}}));
    }
}
