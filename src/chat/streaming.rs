// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Streaming response handling
//!
//! `translate_stream` turns one request's raw backend stream into turn
//! events, yielding to the scheduler periodically and honoring cancellation.
//! `TurnAccumulator` folds those events into what the loop needs once the
//! turn ends: text, reasoning, completed tool calls, stop reason and usage.

use futures::{Stream, StreamExt};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use super::cancellation::CancelHandle;
use super::events::TurnEvent;
use crate::error::Result;
use crate::llm::message::{ContentBlock, Message, ReasoningContentBlock, ReasoningText};
use crate::llm::provider::{BlockDelta, BlockStart, RawEventStream, StopReason, ToolInputFragment, Usage};
use crate::tools::ToolCall;

/// Translate raw backend events into turn events.
///
/// The cancel flag is checked before pulling each raw event and again after
/// receiving it; once set, a single `stopped` event is emitted and the raw
/// stream is dropped undrained. A raw error is passed through and ends the
/// stream.
pub fn translate_stream(
    mut raw: RawEventStream,
    cancel: Option<CancelHandle>,
    yield_interval: Duration,
) -> impl Stream<Item = Result<TurnEvent>> + Send {
    async_stream::stream! {
        let cancelled = |cancel: &Option<CancelHandle>| cancel.as_ref().is_some_and(CancelHandle::is_cancelled);
        let mut window_start = Instant::now();

        loop {
            if cancelled(&cancel) {
                tracing::info!(target: "tether.chat.stream", "stream stopped before next event");
                yield Ok(TurnEvent::stopped());
                break;
            }

            let Some(item) = raw.next().await else {
                break;
            };

            if cancelled(&cancel) {
                tracing::info!(target: "tether.chat.stream", "stream stopped after receiving event");
                yield Ok(TurnEvent::stopped());
                break;
            }

            match item {
                Ok(event) => yield Ok(TurnEvent::from(event)),
                Err(error) => {
                    yield Err(error);
                    break;
                }
            }

            if window_start.elapsed() >= yield_interval {
                tokio::task::yield_now().await;
                window_start = Instant::now();
            }
        }
    }
}

/// Tool call whose input is still arriving
#[derive(Debug)]
struct PendingToolCall {
    tool_use_id: String,
    name: String,
    buffer: String,
    complete: Option<Value>,
}

impl PendingToolCall {
    fn finish(self) -> ToolCall {
        if let Some(input) = self.complete {
            return ToolCall::new(self.tool_use_id, self.name, input);
        }
        if self.buffer.trim().is_empty() {
            return ToolCall::new(self.tool_use_id, self.name, Value::Object(Map::new()));
        }
        match serde_json::from_str::<Value>(&self.buffer) {
            Ok(input) => ToolCall::new(self.tool_use_id, self.name, input),
            Err(e) => {
                tracing::warn!(
                    target: "tether.chat.stream",
                    tool = %self.name,
                    tool_use_id = %self.tool_use_id,
                    error = %e,
                    "tool input did not parse"
                );
                let mut call =
                    ToolCall::new(self.tool_use_id, self.name, Value::Object(Map::new()));
                call.input_error = Some(e.to_string());
                call
            }
        }
    }
}

/// Everything one turn produced
#[derive(Debug, Default)]
pub struct TurnOutput {
    pub text: String,
    pub reasoning_text: String,
    pub reasoning_signature: String,
    pub tool_calls: Vec<ToolCall>,
    pub stop_reason: Option<StopReason>,
    pub usage: Option<Usage>,
}

impl TurnOutput {
    fn text_block(&self) -> Option<ContentBlock> {
        (!self.text.trim().is_empty()).then(|| ContentBlock::Text(self.text.clone()))
    }

    /// Assistant message for a tool-use turn. With a reasoning signature the
    /// reasoning block leads and text trails; otherwise text leads.
    pub fn tool_use_message(&self) -> Message {
        let tool_uses = self
            .tool_calls
            .iter()
            .map(|call| ContentBlock::ToolUse(call.to_block()));

        let mut content = Vec::new();
        if self.reasoning_signature.is_empty() {
            content.extend(self.text_block());
            content.extend(tool_uses);
        } else {
            content.push(ContentBlock::ReasoningContent(ReasoningContentBlock {
                reasoning_text: ReasoningText {
                    text: self.reasoning_text.clone(),
                    signature: self.reasoning_signature.clone(),
                },
            }));
            content.extend(tool_uses);
            content.extend(self.text_block());
        }
        Message::assistant_blocks(content)
    }

    /// Final assistant message, if any text was produced
    pub fn final_message(&self) -> Option<Message> {
        self.text_block()
            .map(|block| Message::assistant_blocks(vec![block]))
    }
}

/// Folds one turn's events into a `TurnOutput`
#[derive(Debug, Default)]
pub struct TurnAccumulator {
    output: TurnOutput,
    /// In-flight tool calls keyed by content block index
    pending: BTreeMap<usize, PendingToolCall>,
}

impl TurnAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, event: &TurnEvent) {
        match event {
            TurnEvent::BlockStart(start) => {
                if let Some(BlockStart::ToolUse(tool)) = &start.start {
                    tracing::debug!(
                        target: "tether.chat.stream",
                        tool = %tool.name,
                        tool_use_id = %tool.tool_use_id,
                        "tool use detected"
                    );
                    if let Some(previous) = self.pending.insert(
                        start.content_block_index,
                        PendingToolCall {
                            tool_use_id: tool.tool_use_id.clone(),
                            name: tool.name.clone(),
                            buffer: String::new(),
                            complete: None,
                        },
                    ) {
                        // Block index reused without a stop; keep what we had.
                        self.output.tool_calls.push(previous.finish());
                    }
                }
            }
            TurnEvent::BlockDelta(delta) => match &delta.delta {
                BlockDelta::Text(text) => self.output.text.push_str(text),
                BlockDelta::ReasoningContent(reasoning) => {
                    if let Some(text) = &reasoning.text {
                        self.output.reasoning_text.push_str(text);
                    }
                    if let Some(signature) = &reasoning.signature {
                        self.output.reasoning_signature.push_str(signature);
                    }
                }
                BlockDelta::ToolUse(tool_delta) => {
                    match self.pending.get_mut(&delta.content_block_index) {
                        Some(pending) => match &tool_delta.input {
                            ToolInputFragment::Partial(fragment) => {
                                pending.buffer.push_str(fragment)
                            }
                            ToolInputFragment::Complete(value) => {
                                pending.complete = Some(value.clone())
                            }
                        },
                        None => tracing::warn!(
                            target: "tether.chat.stream",
                            index = delta.content_block_index,
                            "tool input delta without a started tool block"
                        ),
                    }
                }
            },
            TurnEvent::BlockStop(stop) => {
                if let Some(pending) = self.pending.remove(&stop.content_block_index) {
                    self.output.tool_calls.push(pending.finish());
                }
            }
            TurnEvent::MessageStop(stop) => {
                self.output.stop_reason = Some(StopReason::parse(&stop.stop_reason));
            }
            TurnEvent::Metadata(meta) => {
                self.output.usage = Some(meta.usage.clone());
            }
            TurnEvent::MessageStart(_)
            | TurnEvent::ToolResults(_)
            | TurnEvent::Stopped(_)
            | TurnEvent::Error(_) => {}
        }
    }

    /// Finish the turn. Tool blocks that never saw a stop are finalized in
    /// block order.
    pub fn finish(mut self) -> TurnOutput {
        let unfinished = std::mem::take(&mut self.pending);
        for (_, pending) in unfinished {
            self.output.tool_calls.push(pending.finish());
        }
        self.output
    }
}
