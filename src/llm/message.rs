// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Message types for backend interactions
//!
//! Defines the conversation history structures exchanged with the inference
//! backend. Content blocks serialize in the backend's externally tagged form,
//! e.g. `{"text": "..."}` or `{"toolUse": {...}}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Role of the message sender
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// User message (including tool results)
    User,
    /// Assistant response
    Assistant,
}

/// A message in a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message sender
    pub role: Role,

    /// Ordered content blocks
    pub content: Vec<ContentBlock>,
}

/// A block of content within a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ContentBlock {
    /// Plain text
    Text(String),

    /// Tool invocation requested by the assistant
    ToolUse(ToolUseBlock),

    /// Result of a tool invocation, sent back as a user message
    ToolResult(ToolResultBlock),

    /// Model reasoning trace with its verification signature
    ReasoningContent(ReasoningContentBlock),

    /// Prompt cache breakpoint
    CachePoint(CachePointBlock),
}

/// Tool invocation requested by the assistant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolUseBlock {
    pub tool_use_id: String,
    pub name: String,
    /// Always a JSON object; never an empty string
    pub input: Value,
}

/// Outcome classification of a tool result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolResultStatus {
    Success,
    Error,
}

/// Result of a tool invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResultBlock {
    pub tool_use_id: String,
    pub content: Vec<ToolResultContent>,
    pub status: ToolResultStatus,
}

/// One segment of tool output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ToolResultContent {
    Text(String),
    Image(ImageBlock),
}

/// An image segment of tool output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageBlock {
    /// Image format without the `image/` prefix, e.g. `png`
    pub format: String,
    pub source: ImageSource,
}

/// Image payload, either raw bytes or already base64-encoded text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ImageSource {
    /// Raw bytes; encoded as base64 on the wire
    Bytes(#[serde(with = "base64_bytes")] Vec<u8>),
    /// Base64 text, kept as-is for JSON transport and persistence
    Base64(String),
}

/// Model reasoning content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReasoningContentBlock {
    pub reasoning_text: ReasoningText,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningText {
    pub text: String,
    pub signature: String,
}

/// Prompt cache breakpoint marker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CachePointBlock {
    #[serde(rename = "type")]
    pub kind: CachePointKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CachePointKind {
    #[default]
    Default,
}

/// A block of the system prompt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SystemBlock {
    Text(String),
    CachePoint(CachePointBlock),
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

impl Message {
    /// Create a user message with a single text block
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentBlock::Text(text.into())],
        }
    }

    /// Create an assistant message with a single text block
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: vec![ContentBlock::Text(text.into())],
        }
    }

    /// Create a user message from content blocks
    pub fn user_blocks(blocks: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::User,
            content: blocks,
        }
    }

    /// Create an assistant message from content blocks
    pub fn assistant_blocks(blocks: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::Assistant,
            content: blocks,
        }
    }

    /// Concatenated text of all text blocks
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text(text) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// All tool use blocks in the message
    pub fn tool_uses(&self) -> Vec<&ToolUseBlock> {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::ToolUse(tool_use) => Some(tool_use),
                _ => None,
            })
            .collect()
    }

    /// Number of cache point markers in the message
    pub fn cache_point_count(&self) -> usize {
        self.content
            .iter()
            .filter(|block| matches!(block, ContentBlock::CachePoint(_)))
            .count()
    }
}

impl ContentBlock {
    /// A default cache point block
    pub fn cache_point() -> Self {
        ContentBlock::CachePoint(CachePointBlock::default())
    }
}

impl ToolResultBlock {
    /// A successful tool result
    pub fn success(tool_use_id: impl Into<String>, content: Vec<ToolResultContent>) -> Self {
        Self {
            tool_use_id: tool_use_id.into(),
            content,
            status: ToolResultStatus::Success,
        }
    }

    /// A failed tool result carrying a human-readable message
    pub fn error(tool_use_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            tool_use_id: tool_use_id.into(),
            content: vec![ToolResultContent::Text(message.into())],
            status: ToolResultStatus::Error,
        }
    }

    pub fn is_error(&self) -> bool {
        self.status == ToolResultStatus::Error
    }

    /// Concatenated text segments of the result
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| match c {
                ToolResultContent::Text(text) => Some(text.as_str()),
                ToolResultContent::Image(_) => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Number of image segments in the result
    pub fn image_count(&self) -> usize {
        self.content
            .iter()
            .filter(|c| matches!(c, ToolResultContent::Image(_)))
            .count()
    }
}

impl SystemBlock {
    /// Length of the text in this block, zero for markers
    pub fn text_len(&self) -> usize {
        match self {
            SystemBlock::Text(text) => text.len(),
            SystemBlock::CachePoint(_) => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_text_block_wire_shape() {
        let message = Message::user("hello");
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value, json!({"role": "user", "content": [{"text": "hello"}]}));
    }

    #[test]
    fn test_tool_use_wire_shape() {
        let block = ContentBlock::ToolUse(ToolUseBlock {
            tool_use_id: "t1".to_string(),
            name: "catalog___priceLookup".to_string(),
            input: json!({"code": "08-50-0113"}),
        });
        let value = serde_json::to_value(&block).unwrap();
        assert_eq!(
            value,
            json!({"toolUse": {"toolUseId": "t1", "name": "catalog___priceLookup", "input": {"code": "08-50-0113"}}})
        );
    }

    #[test]
    fn test_cache_point_wire_shape() {
        let value = serde_json::to_value(ContentBlock::cache_point()).unwrap();
        assert_eq!(value, json!({"cachePoint": {"type": "default"}}));
    }

    #[test]
    fn test_tool_result_error_shape() {
        let result = ToolResultBlock::error("t9", "boom");
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["status"], "error");
        assert_eq!(value["content"][0]["text"], "boom");
        assert!(result.is_error());
    }

    #[test]
    fn test_image_bytes_serialize_as_base64() {
        let image = ToolResultContent::Image(ImageBlock {
            format: "png".to_string(),
            source: ImageSource::Bytes(vec![1, 2, 3]),
        });
        let value = serde_json::to_value(&image).unwrap();
        assert_eq!(value["image"]["source"]["bytes"], "AQID");

        let back: ToolResultContent = serde_json::from_value(value).unwrap();
        assert_eq!(back, image);
    }

    #[test]
    fn test_reasoning_block_shape() {
        let block = ContentBlock::ReasoningContent(ReasoningContentBlock {
            reasoning_text: ReasoningText {
                text: "thinking".to_string(),
                signature: "sig".to_string(),
            },
        });
        let value = serde_json::to_value(&block).unwrap();
        assert_eq!(value["reasoningContent"]["reasoningText"]["signature"], "sig");
    }

    #[test]
    fn test_message_helpers() {
        let message = Message::assistant_blocks(vec![
            ContentBlock::Text("a".to_string()),
            ContentBlock::ToolUse(ToolUseBlock {
                tool_use_id: "1".to_string(),
                name: "x".to_string(),
                input: json!({}),
            }),
            ContentBlock::Text("b".to_string()),
            ContentBlock::cache_point(),
        ]);
        assert_eq!(message.text(), "ab");
        assert_eq!(message.tool_uses().len(), 1);
        assert_eq!(message.cache_point_count(), 1);
    }

    #[test]
    fn test_tool_result_text_joins_segments() {
        let result = ToolResultBlock::success(
            "t",
            vec![
                ToolResultContent::Text("one".to_string()),
                ToolResultContent::Image(ImageBlock {
                    format: "jpeg".to_string(),
                    source: ImageSource::Base64("AA==".to_string()),
                }),
                ToolResultContent::Text("two".to_string()),
            ],
        );
        assert_eq!(result.text(), "one\ntwo");
        assert_eq!(result.image_count(), 1);
    }
}
