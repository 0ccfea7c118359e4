// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! MCP client over newline-delimited JSON-RPC
//!
//! One client holds one session with one tool server. Requests are
//! serialized through a mutex, so concurrent calls to the same server queue
//! up while calls to different servers proceed in parallel.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use super::protocol::{
    CallToolParams, CallToolResult, InitializeParams, InitializeResult, JsonRpcRequest,
    JsonRpcResponse, Tool, ToolsListResult,
};
use crate::config::settings::ToolServerConfig;
use crate::error::{Result, TetherError};
use crate::tools::ToolServer;

type BoxedReader = BufReader<Box<dyn AsyncRead + Send + Unpin>>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

struct Channel {
    reader: BoxedReader,
    writer: BoxedWriter,
}

/// A session with one MCP tool server
pub struct McpClient {
    server_id: String,
    channel: Mutex<Channel>,
    next_id: AtomicU64,
    server_name: String,
    /// Child process when the server was spawned by us
    _child: Option<Mutex<Child>>,
}

impl McpClient {
    /// Attach to a server over an existing reader/writer pair and perform
    /// the initialize handshake.
    pub async fn connect<R, W>(server_id: impl Into<String>, reader: R, writer: W) -> Result<Self>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let mut client = Self {
            server_id: server_id.into(),
            channel: Mutex::new(Channel {
                reader: BufReader::new(Box::new(reader)),
                writer: Box::new(writer),
            }),
            next_id: AtomicU64::new(1),
            server_name: String::new(),
            _child: None,
        };
        client.initialize().await?;
        Ok(client)
    }

    /// Launch a tool server as a child process speaking MCP over stdio.
    pub async fn spawn(server_id: impl Into<String>, config: &ToolServerConfig) -> Result<Self> {
        let server_id = server_id.into();
        let mut child = Command::new(&config.command)
            .args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                TetherError::Mcp(format!(
                    "failed to start tool server '{}' ({}): {}",
                    server_id, config.command, e
                ))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| TetherError::Mcp(format!("tool server '{}' has no stdin", server_id)))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TetherError::Mcp(format!("tool server '{}' has no stdout", server_id)))?;

        tracing::info!(
            target: "tether.mcp",
            server_id = %server_id,
            command = %config.command,
            args = ?config.args,
            "starting tool server"
        );

        let mut client = Self::connect(server_id, stdout, stdin).await?;
        client._child = Some(Mutex::new(child));
        Ok(client)
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    /// Name the server reported during initialization
    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    async fn initialize(&mut self) -> Result<()> {
        let params = serde_json::to_value(InitializeParams::default())?;
        let result: InitializeResult = self.request("initialize", Some(params)).await?;
        self.notify("notifications/initialized").await?;

        tracing::info!(
            target: "tether.mcp",
            server_id = %self.server_id,
            server_name = %result.server_info.name,
            server_version = %result.server_info.version,
            protocol_version = %result.protocol_version,
            "tool server session initialized"
        );
        self.server_name = result.server_info.name;
        Ok(())
    }

    async fn notify(&self, method: &str) -> Result<()> {
        let mut channel = self.channel.lock().await;
        write_message(&mut channel.writer, &JsonRpcRequest::notification(method)).await
    }

    async fn request<T: DeserializeOwned>(&self, method: &str, params: Option<Value>) -> Result<T> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = JsonRpcRequest::new(id, method, params);

        let mut channel = self.channel.lock().await;
        write_message(&mut channel.writer, &request).await?;

        let mut line = String::new();
        loop {
            line.clear();
            let read = channel.reader.read_line(&mut line).await?;
            if read == 0 {
                return Err(TetherError::Mcp(format!(
                    "tool server '{}' closed the connection during {}",
                    self.server_id, method
                )));
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let message: Value = match serde_json::from_str(trimmed) {
                Ok(value) => value,
                Err(e) => {
                    tracing::debug!(
                        target: "tether.mcp",
                        server_id = %self.server_id,
                        error = %e,
                        "skipping non-JSON line from tool server"
                    );
                    continue;
                }
            };

            // Server-initiated requests and notifications carry a method.
            if message.get("method").is_some() {
                tracing::debug!(
                    target: "tether.mcp",
                    server_id = %self.server_id,
                    method = %message["method"],
                    "skipping server message"
                );
                continue;
            }

            let response: JsonRpcResponse = serde_json::from_value(message)?;
            if response.id.as_ref().and_then(Value::as_u64) != Some(id) {
                tracing::debug!(
                    target: "tether.mcp",
                    server_id = %self.server_id,
                    expected = id,
                    got = ?response.id,
                    "skipping response for another request"
                );
                continue;
            }

            if let Some(error) = response.error {
                return Err(TetherError::Mcp(format!(
                    "{} failed on '{}': {}",
                    method, self.server_id, error
                )));
            }
            let result = response.result.unwrap_or(Value::Null);
            return Ok(serde_json::from_value(result)?);
        }
    }
}

async fn write_message(writer: &mut BoxedWriter, request: &JsonRpcRequest) -> Result<()> {
    let mut json = serde_json::to_string(request)?;
    json.push('\n');
    writer.write_all(json.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

#[async_trait]
impl ToolServer for McpClient {
    async fn list_tools(&self) -> Result<Vec<Tool>> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let params = cursor
                .as_ref()
                .map(|c| serde_json::json!({ "cursor": c }));
            let page: ToolsListResult = self.request("tools/list", params).await?;
            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }
        Ok(tools)
    }

    async fn call_tool(&self, name: &str, arguments: &Value) -> Result<CallToolResult> {
        let params = serde_json::to_value(CallToolParams {
            name: name.to_string(),
            arguments: Some(arguments.clone()),
        })?;
        self.request("tools/call", Some(params)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::protocol::ToolContent;
    use serde_json::json;
    use tokio::io::{duplex, DuplexStream};

    /// Minimal scripted server: answers initialize, tools/list and tools/call.
    async fn fake_server(stream: DuplexStream) {
        let (read_half, mut write_half) = tokio::io::split(stream);
        let mut lines = BufReader::new(read_half).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let request: Value = serde_json::from_str(&line).unwrap();
            let Some(id) = request.get("id").cloned() else {
                continue;
            };
            let result = match request["method"].as_str().unwrap_or("") {
                "initialize" => json!({
                    "protocolVersion": "2024-11-05",
                    "capabilities": {"tools": {}},
                    "serverInfo": {"name": "catalog-server", "version": "0.1.0"}
                }),
                "tools/list" => match request["params"]["cursor"].as_str() {
                    None => json!({
                        "tools": [{"name": "priceLookup", "description": "Price", "inputSchema": {"type": "object"}}],
                        "nextCursor": "page2"
                    }),
                    Some(_) => json!({
                        "tools": [{"name": "stock", "inputSchema": {"type": "object"}}]
                    }),
                },
                "tools/call" => {
                    let code = request["params"]["arguments"]["code"].as_str().unwrap_or("");
                    json!({"content": [{"type": "text", "text": format!("{} costs 12.50", code)}]})
                }
                _ => {
                    let reply = json!({"jsonrpc": "2.0", "id": id, "error": {"code": -32601, "message": "Method not found"}});
                    write_half
                        .write_all(format!("{}\n", reply).as_bytes())
                        .await
                        .unwrap();
                    continue;
                }
            };
            // A notification first, which the client must skip.
            let note = json!({"jsonrpc": "2.0", "method": "notifications/message", "params": {}});
            let reply = json!({"jsonrpc": "2.0", "id": id, "result": result});
            write_half
                .write_all(format!("{}\n{}\n", note, reply).as_bytes())
                .await
                .unwrap();
        }
    }

    async fn connected() -> McpClient {
        let (client_end, server_end) = duplex(64 * 1024);
        tokio::spawn(fake_server(server_end));
        let (reader, writer) = tokio::io::split(client_end);
        McpClient::connect("catalog", reader, writer).await.unwrap()
    }

    #[tokio::test]
    async fn test_handshake_records_server_name() {
        let client = connected().await;
        assert_eq!(client.server_id(), "catalog");
        assert_eq!(client.server_name(), "catalog-server");
    }

    #[tokio::test]
    async fn test_list_tools_follows_cursor() {
        let client = connected().await;
        let tools = client.list_tools().await.unwrap();
        let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["priceLookup", "stock"]);
    }

    #[tokio::test]
    async fn test_call_tool() {
        let client = connected().await;
        let result = client
            .call_tool("priceLookup", &json!({"code": "08-50-0113"}))
            .await
            .unwrap();
        assert_eq!(
            result.content,
            vec![ToolContent::Text {
                text: "08-50-0113 costs 12.50".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn test_concurrent_calls_are_serialized() {
        let client = std::sync::Arc::new(connected().await);
        let calls = (0..5).map(|i| {
            let client = client.clone();
            async move {
                client
                    .call_tool("priceLookup", &json!({"code": format!("c{}", i)}))
                    .await
            }
        });
        let results = futures::future::join_all(calls).await;
        for (i, result) in results.into_iter().enumerate() {
            let result = result.unwrap();
            assert_eq!(
                result.content,
                vec![ToolContent::Text {
                    text: format!("c{} costs 12.50", i)
                }]
            );
        }
    }

    #[tokio::test]
    async fn test_closed_connection_is_error() {
        let (client_end, server_end) = duplex(1024);
        drop(server_end);
        let (reader, writer) = tokio::io::split(client_end);
        assert!(McpClient::connect("gone", reader, writer).await.is_err());
    }

    #[tokio::test]
    async fn test_spawn_missing_binary_is_error() {
        let config = ToolServerConfig {
            command: "/nonexistent/tether-test-server".to_string(),
            args: vec![],
            env: Default::default(),
        };
        let err = McpClient::spawn("missing", &config).await.err().unwrap();
        assert!(err.to_string().contains("failed to start tool server"));
    }
}
