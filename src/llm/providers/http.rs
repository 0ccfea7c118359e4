// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! HTTP streaming backend
//!
//! Posts a `ConverseRequest` as JSON and reads the response as Server-Sent
//! Events, one `data:` line of JSON per raw stream event.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use crate::config::settings::BackendConfig;
use crate::error::{BackendError, Result, TetherError};
use crate::llm::provider::{
    BackendFactory, ConverseRequest, InferenceBackend, RawEventStream, RawStreamEvent,
};

/// Streaming inference endpoint reached over HTTP
pub struct HttpBackend {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpBackend {
    pub fn new(client: Client, endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            api_key,
        }
    }

    fn parse_error(status: u16, body: &str) -> TetherError {
        let message = serde_json::from_str::<ErrorBody>(body)
            .map(|parsed| parsed.message())
            .unwrap_or_else(|_| body.to_string());

        let error = match status {
            429 => BackendError::Throttled(message),
            503 => BackendError::Unavailable(message),
            _ if message.contains("ThrottlingException") => BackendError::Throttled(message),
            _ => BackendError::Server { status, message },
        };
        TetherError::Backend(error)
    }
}

#[async_trait]
impl InferenceBackend for HttpBackend {
    fn name(&self) -> &str {
        "http"
    }

    async fn converse_stream(&self, request: &ConverseRequest) -> Result<RawEventStream> {
        let mut builder = self
            .client
            .post(&self.endpoint)
            .header("content-type", "application/json")
            .header("accept", "text/event-stream")
            .json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                TetherError::Backend(BackendError::Network(e.to_string()))
            } else {
                TetherError::Http(e)
            }
        })?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::parse_error(status.as_u16(), &body));
        }

        let event_stream = response
            .bytes_stream()
            .map(|result| {
                result.map_err(|e| TetherError::Backend(BackendError::Stream(e.to_string())))
            })
            .scan(SseDecoder::default(), |decoder, result| {
                let events = match result {
                    Ok(bytes) => decoder.push(&bytes),
                    Err(e) => vec![Err(e)],
                };
                futures::future::ready(Some(events))
            })
            .flat_map(futures::stream::iter);

        Ok(Box::pin(event_stream))
    }
}

/// Error payload, either `{"message": ..}` or `{"error": {"message": ..}}`
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default, rename = "__type")]
    error_type: Option<String>,
    #[serde(default)]
    error: Option<NestedError>,
}

#[derive(Debug, Deserialize)]
struct NestedError {
    #[serde(default)]
    message: String,
}

impl ErrorBody {
    fn message(self) -> String {
        let message = self
            .message
            .or_else(|| self.error.map(|e| e.message))
            .unwrap_or_default();
        match self.error_type {
            Some(kind) => format!("{}: {}", kind, message),
            None => message,
        }
    }
}

/// Splits an SSE byte stream into event blocks.
///
/// Bytes are buffered until a blank line ends an event, so a multi-byte
/// character or a `\r\n` pair split across network chunks is decoded whole.
#[derive(Debug, Default)]
struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    fn push(&mut self, chunk: &[u8]) -> Vec<Result<RawStreamEvent>> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some((end, separator_len)) = find_event_boundary(&self.buffer) {
            let block: Vec<u8> = self.buffer.drain(..end + separator_len).collect();
            match std::str::from_utf8(&block[..end]) {
                Ok(event_str) => {
                    if let Some(event) = parse_sse_event(event_str) {
                        events.push(event);
                    }
                }
                Err(e) => events.push(Err(TetherError::Backend(BackendError::Stream(format!(
                    "invalid UTF-8 in stream event: {}",
                    e
                ))))),
            }
        }
        events
    }
}

/// Position and length of the first blank-line separator
fn find_event_boundary(buffer: &[u8]) -> Option<(usize, usize)> {
    (0..buffer.len()).find_map(|i| {
        let rest = &buffer[i..];
        if rest.starts_with(b"\r\n\r\n") {
            Some((i, 4))
        } else if rest.starts_with(b"\n\n") {
            Some((i, 2))
        } else {
            None
        }
    })
}

/// Parse one SSE event block into a raw stream event
fn parse_sse_event(event_str: &str) -> Option<Result<RawStreamEvent>> {
    let data: String = event_str
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(str::trim_start)
        .collect();

    if data.is_empty() || data == "[DONE]" {
        return None;
    }

    match serde_json::from_str::<RawStreamEvent>(&data) {
        Ok(event) => Some(Ok(event)),
        Err(parse_err) => match serde_json::from_str::<ErrorBody>(&data) {
            Ok(body) if body.error.is_some() || body.error_type.is_some() => {
                let message = body.message();
                if message.contains("ThrottlingException") {
                    Some(Err(TetherError::Backend(BackendError::Throttled(message))))
                } else {
                    Some(Err(TetherError::Backend(BackendError::Stream(message))))
                }
            }
            _ => {
                tracing::debug!(
                    target: "tether.llm.pool",
                    error = %parse_err,
                    "skipping unrecognized stream event"
                );
                None
            }
        },
    }
}

/// Builds HTTP backends sharing endpoint and credentials
pub struct HttpBackendFactory {
    endpoint: String,
    api_key: Option<String>,
    connect_timeout: Duration,
}

impl HttpBackendFactory {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>, connect_timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key,
            connect_timeout,
        }
    }

    pub fn from_config(config: &BackendConfig, api_key: Option<String>) -> Self {
        Self::new(
            config.endpoint.clone(),
            api_key,
            Duration::from_secs(config.connect_timeout_secs),
        )
    }
}

impl BackendFactory for HttpBackendFactory {
    fn build(&self) -> Result<Arc<dyn InferenceBackend>> {
        let client = Client::builder()
            .connect_timeout(self.connect_timeout)
            .build()?;
        Ok(Arc::new(HttpBackend::new(
            client,
            self.endpoint.clone(),
            self.api_key.clone(),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::provider::{BlockDelta, InferenceConfig, StopReason};
    use crate::llm::Message;
    use futures::StreamExt;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> ConverseRequest {
        ConverseRequest {
            model_id: "amazon.nova-lite-v1:0".to_string(),
            messages: vec![Message::user("hi")],
            system: vec![],
            inference_config: InferenceConfig {
                max_tokens: 64,
                temperature: 0.1,
            },
            additional_model_request_fields: serde_json::json!({}),
            tool_config: None,
        }
    }

    fn backend(server: &MockServer) -> Arc<dyn InferenceBackend> {
        HttpBackendFactory::new(
            format!("{}/converse-stream", server.uri()),
            Some("secret".to_string()),
            Duration::from_secs(5),
        )
        .build()
        .unwrap()
    }

    #[test]
    fn test_parse_sse_event_data_line() {
        let event = parse_sse_event("event: delta\ndata: {\"contentBlockDelta\": {\"contentBlockIndex\": 0, \"delta\": {\"text\": \"Hi\"}}}")
            .unwrap()
            .unwrap();
        let RawStreamEvent::ContentBlockDelta(delta) = event else {
            panic!("expected delta");
        };
        assert_eq!(delta.delta, BlockDelta::Text("Hi".to_string()));
    }

    #[test]
    fn test_parse_sse_event_skips_noise() {
        assert!(parse_sse_event(": keep-alive").is_none());
        assert!(parse_sse_event("data: [DONE]").is_none());
        assert!(parse_sse_event("data: {\"unknownEvent\": {}}").is_none());
    }

    #[test]
    fn test_parse_sse_event_error_payload() {
        let event = parse_sse_event(
            "data: {\"__type\": \"ThrottlingException\", \"message\": \"slow down\"}",
        )
        .unwrap();
        assert!(event.unwrap_err().is_transient());
    }

    #[test]
    fn test_parse_error_status_mapping() {
        assert!(HttpBackend::parse_error(429, "{\"message\": \"too many\"}").is_transient());
        assert!(HttpBackend::parse_error(503, "down").is_transient());
        let err = HttpBackend::parse_error(400, "{\"error\": {\"message\": \"bad field\"}}");
        assert!(!err.is_transient());
        assert!(err.to_string().contains("bad field"));
    }

    #[test]
    fn test_decoder_joins_character_split_across_chunks() {
        let body = "data: {\"contentBlockDelta\": {\"contentBlockIndex\": 0, \"delta\": {\"text\": \"价格\"}}}\n\n";
        let split = body.find('价').unwrap() + 1;

        let mut decoder = SseDecoder::default();
        assert!(decoder.push(&body.as_bytes()[..split]).is_empty());
        let events = decoder.push(&body.as_bytes()[split..]);
        assert_eq!(events.len(), 1);
        let RawStreamEvent::ContentBlockDelta(delta) = events.into_iter().next().unwrap().unwrap() else {
            panic!("expected delta");
        };
        assert_eq!(delta.delta, BlockDelta::Text("价格".to_string()));
    }

    #[test]
    fn test_decoder_crlf_separator_split_across_chunks() {
        let mut decoder = SseDecoder::default();
        assert!(decoder
            .push(b"data: {\"contentBlockStop\": {\"contentBlockIndex\": 0}}\r\n\r")
            .is_empty());
        let events = decoder.push(b"\ndata: {\"messageStop\": {\"stopReason\": \"end_turn\"}}\r\n\r\n");
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], Ok(RawStreamEvent::ContentBlockStop(_))));
        assert!(matches!(events[1], Ok(RawStreamEvent::MessageStop(_))));
    }

    #[test]
    fn test_decoder_invalid_utf8_is_stream_error() {
        let mut decoder = SseDecoder::default();
        let events = decoder.push(b"data: {\"text\": \"\xff\xfe\"}\n\n");
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0],
            Err(TetherError::Backend(BackendError::Stream(_)))
        ));
    }

    #[tokio::test]
    async fn test_chunked_response_split_inside_character() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let body = "data: {\"contentBlockDelta\": {\"contentBlockIndex\": 0, \"delta\": {\"text\": \"价格\"}}}\n\n";
        let split = body.find('价').unwrap() + 1;
        let (first, second) = body.as_bytes().split_at(split);
        let (first, second) = (first.to_vec(), second.to_vec());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                if let Some(head_end) = request.windows(4).position(|w| w == b"\r\n\r\n") {
                    let head = String::from_utf8_lossy(&request[..head_end]).to_lowercase();
                    let length: usize = head
                        .lines()
                        .find_map(|l| l.strip_prefix("content-length:"))
                        .map(|v| v.trim().parse().unwrap())
                        .unwrap_or(0);
                    if request.len() >= head_end + 4 + length {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }

            socket
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\ntransfer-encoding: chunked\r\n\r\n")
                .await
                .unwrap();
            for part in [first, second] {
                socket.write_all(format!("{:x}\r\n", part.len()).as_bytes()).await.unwrap();
                socket.write_all(&part).await.unwrap();
                socket.write_all(b"\r\n").await.unwrap();
                socket.flush().await.unwrap();
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            socket.write_all(b"0\r\n\r\n").await.unwrap();
            socket.flush().await.unwrap();
        });

        let backend = HttpBackendFactory::new(
            format!("http://{}/converse-stream", addr),
            None,
            Duration::from_secs(5),
        )
        .build()
        .unwrap();
        let stream = backend.converse_stream(&request()).await.unwrap();
        let events: Vec<RawStreamEvent> = stream.map(|e| e.unwrap()).collect().await;
        assert_eq!(events.len(), 1);
        let RawStreamEvent::ContentBlockDelta(delta) = &events[0] else {
            panic!("expected delta");
        };
        assert_eq!(delta.delta, BlockDelta::Text("价格".to_string()));
    }

    #[tokio::test]
    async fn test_stream_round_trip_over_http() {
        let server = MockServer::start().await;
        let body = concat!(
            "data: {\"messageStart\": {\"role\": \"assistant\"}}\n\n",
            "data: {\"contentBlockDelta\": {\"contentBlockIndex\": 0, \"delta\": {\"text\": \"Hello\"}}}\n\n",
            "data: {\"contentBlockStop\": {\"contentBlockIndex\": 0}}\n\n",
            "data: {\"messageStop\": {\"stopReason\": \"end_turn\"}}\n\n",
        );
        Mock::given(method("POST"))
            .and(path("/converse-stream"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(body),
            )
            .mount(&server)
            .await;

        let stream = backend(&server).converse_stream(&request()).await.unwrap();
        let events: Vec<RawStreamEvent> = stream.map(|e| e.unwrap()).collect().await;
        assert_eq!(events.len(), 4);
        let RawStreamEvent::MessageStop(stop) = &events[3] else {
            panic!("expected message stop");
        };
        assert_eq!(StopReason::parse(&stop.stop_reason), StopReason::EndTurn);
    }

    #[tokio::test]
    async fn test_throttled_status_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("{\"message\": \"Too many requests\"}"))
            .mount(&server)
            .await;

        let err = backend(&server).converse_stream(&request()).await.err().unwrap();
        assert!(matches!(err, TetherError::Backend(BackendError::Throttled(_))));
    }

    #[tokio::test]
    async fn test_server_error_is_not_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let err = backend(&server).converse_stream(&request()).await.err().unwrap();
        assert!(matches!(
            err,
            TetherError::Backend(BackendError::Server { status: 500, .. })
        ));
    }
}
