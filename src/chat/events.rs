// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Caller-facing turn events
//!
//! Every event serializes as `{"type": ..., "data": ...}` and consumers treat
//! the sequence as an append-only log of the query.

use serde::Serialize;

use crate::llm::message::ToolResultBlock;
use crate::llm::provider::{
    ContentBlockDeltaEvent, ContentBlockStartEvent, ContentBlockStopEvent, MessageStartEvent,
    MessageStopEvent, MetadataEvent, RawStreamEvent,
};
use crate::tools::{ToolCall, ToolOutcome};

/// One event of a running query
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum TurnEvent {
    MessageStart(MessageStartEvent),
    BlockStart(ContentBlockStartEvent),
    BlockDelta(ContentBlockDeltaEvent),
    BlockStop(ContentBlockStopEvent),
    MessageStop(MessageStopEvent),
    Metadata(MetadataEvent),
    /// Calls of a tool-use turn paired with their results
    ToolResults(Vec<ToolResultPair>),
    /// Cooperative stop was observed
    Stopped(StoppedEvent),
    /// Something failed. The loop is over unless the event is recoverable
    Error(ErrorEvent),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResultPair {
    pub tool_use: ToolCall,
    pub tool_result: ToolResultBlock,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoppedEvent {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorEvent {
    pub error: String,
    /// Set for failures the loop works around, such as a tool server that
    /// could not list its tools
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub recoverable: bool,
}

impl TurnEvent {
    pub fn stopped() -> Self {
        TurnEvent::Stopped(StoppedEvent {
            message: "Stream stopped by user request".to_string(),
        })
    }

    pub fn error(error: impl Into<String>) -> Self {
        TurnEvent::Error(ErrorEvent {
            error: error.into(),
            recoverable: false,
        })
    }

    /// An error reported while the loop keeps running
    pub fn recoverable_error(error: impl Into<String>) -> Self {
        TurnEvent::Error(ErrorEvent {
            error: error.into(),
            recoverable: true,
        })
    }

    /// Pair each call with its JSON-safe result
    pub fn tool_results(outcomes: &[ToolOutcome]) -> Self {
        TurnEvent::ToolResults(
            outcomes
                .iter()
                .map(|outcome| ToolResultPair {
                    tool_use: outcome.call.clone(),
                    tool_result: outcome.serializable.clone(),
                })
                .collect(),
        )
    }

    /// Wire name of the event type
    pub fn kind(&self) -> &'static str {
        match self {
            TurnEvent::MessageStart(_) => "message_start",
            TurnEvent::BlockStart(_) => "block_start",
            TurnEvent::BlockDelta(_) => "block_delta",
            TurnEvent::BlockStop(_) => "block_stop",
            TurnEvent::MessageStop(_) => "message_stop",
            TurnEvent::Metadata(_) => "metadata",
            TurnEvent::ToolResults(_) => "tool_results",
            TurnEvent::Stopped(_) => "stopped",
            TurnEvent::Error(_) => "error",
        }
    }

    /// Whether no further events follow
    pub fn is_terminal(&self) -> bool {
        match self {
            TurnEvent::Stopped(_) => true,
            TurnEvent::Error(error) => !error.recoverable,
            _ => false,
        }
    }
}

impl From<RawStreamEvent> for TurnEvent {
    fn from(event: RawStreamEvent) -> Self {
        match event {
            RawStreamEvent::MessageStart(e) => TurnEvent::MessageStart(e),
            RawStreamEvent::ContentBlockStart(e) => TurnEvent::BlockStart(e),
            RawStreamEvent::ContentBlockDelta(e) => TurnEvent::BlockDelta(e),
            RawStreamEvent::ContentBlockStop(e) => TurnEvent::BlockStop(e),
            RawStreamEvent::MessageStop(e) => TurnEvent::MessageStop(e),
            RawStreamEvent::Metadata(e) => TurnEvent::Metadata(e),
        }
    }
}
