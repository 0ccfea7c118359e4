// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Mock inference backend for testing
//!
//! Provides a scripted implementation of the InferenceBackend trait that can
//! be used in unit and integration tests without a live endpoint. Each call
//! to `converse_stream` pops the next scripted turn.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{BackendError, Result, TetherError};
use crate::llm::provider::{
    BackendFactory, ConverseRequest, InferenceBackend, RawEventStream, RawStreamEvent,
};

/// One scripted backend response
#[derive(Clone, Debug)]
pub enum MockTurn {
    /// Stream these events, then end
    Stream(Vec<RawStreamEvent>),
    /// Stream these events, then yield a stream error
    StreamThenFail {
        events: Vec<RawStreamEvent>,
        message: String,
    },
    /// Stream these events, then never end
    Hang(Vec<RawStreamEvent>),
    /// Reject the request as throttled
    Throttled,
    /// Reject the request as unavailable
    Unavailable,
    /// Reject the request with a non-transient status
    Server { status: u16, message: String },
}

/// A tool call to script into a turn
#[derive(Clone, Debug)]
pub struct MockToolCall {
    pub id: String,
    pub name: String,
    /// Raw input text, streamed in fragments
    pub input: String,
}

impl MockToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            input: input.into(),
        }
    }
}

impl MockTurn {
    /// A text-only answer streamed in small chunks
    pub fn text(text: &str, stop_reason: &str) -> Self {
        let mut out = vec![events::message_start()];
        if !text.is_empty() {
            for chunk in text.chars().collect::<Vec<_>>().chunks(10) {
                out.push(events::text_delta(0, &chunk.iter().collect::<String>()));
            }
            out.push(events::block_stop(0));
        }
        out.push(events::message_stop(stop_reason));
        out.push(events::metadata(10, 20));
        MockTurn::Stream(out)
    }

    /// Optional text followed by tool calls, ending with `tool_use`
    pub fn tool_calls(text: &str, calls: &[MockToolCall]) -> Self {
        let mut out = vec![events::message_start()];
        let mut index = 0;
        if !text.is_empty() {
            out.push(events::text_delta(index, text));
            out.push(events::block_stop(index));
            index += 1;
        }
        for call in calls {
            out.push(events::tool_start(index, &call.id, &call.name));
            let chars: Vec<char> = call.input.chars().collect();
            for chunk in chars.chunks(7) {
                out.push(events::tool_delta(index, &chunk.iter().collect::<String>()));
            }
            out.push(events::block_stop(index));
            index += 1;
        }
        out.push(events::message_stop("tool_use"));
        out.push(events::metadata(10, 20));
        MockTurn::Stream(out)
    }

    pub fn throttled() -> Self {
        MockTurn::Throttled
    }

    pub fn unavailable() -> Self {
        MockTurn::Unavailable
    }

    pub fn server_error(status: u16, message: &str) -> Self {
        MockTurn::Server {
            status,
            message: message.to_string(),
        }
    }

    fn into_stream(self) -> Result<RawEventStream> {
        match self {
            MockTurn::Stream(events) => Ok(Box::pin(stream::iter(events.into_iter().map(Ok)))),
            MockTurn::StreamThenFail { events, message } => {
                let tail = stream::once(async move {
                    Err(TetherError::Backend(BackendError::Stream(message)))
                });
                Ok(Box::pin(stream::iter(events.into_iter().map(Ok)).chain(tail)))
            }
            MockTurn::Hang(events) => Ok(Box::pin(
                stream::iter(events.into_iter().map(Ok)).chain(stream::pending()),
            )),
            MockTurn::Throttled => Err(TetherError::Backend(BackendError::Throttled(
                "ThrottlingException: too many requests".to_string(),
            ))),
            MockTurn::Unavailable => Err(TetherError::Backend(BackendError::Unavailable(
                "ServiceUnavailableException".to_string(),
            ))),
            MockTurn::Server { status, message } => {
                Err(TetherError::Backend(BackendError::Server { status, message }))
            }
        }
    }
}

type TurnQueue = Arc<Mutex<VecDeque<MockTurn>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!("Mock backend lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

/// A scripted backend for testing
#[derive(Clone)]
pub struct MockBackend {
    name: String,
    turns: TurnQueue,
    call_count: Arc<AtomicUsize>,
    recorded_requests: Arc<Mutex<Vec<ConverseRequest>>>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    pub fn new() -> Self {
        Self::named("mock")
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self::with_queue(name, Arc::new(Mutex::new(VecDeque::new())))
    }

    fn with_queue(name: impl Into<String>, turns: TurnQueue) -> Self {
        Self {
            name: name.into(),
            turns,
            call_count: Arc::new(AtomicUsize::new(0)),
            recorded_requests: Arc::new(Mutex::new(vec![])),
        }
    }

    /// Queue a turn (returned in order)
    pub fn push_turn(&self, turn: MockTurn) {
        lock(&self.turns).push_back(turn);
    }

    pub fn with_turns(self, turns: Vec<MockTurn>) -> Self {
        for turn in turns {
            self.push_turn(turn);
        }
        self
    }

    /// Get the number of times converse_stream() was called
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Get all recorded requests
    pub fn recorded_requests(&self) -> Vec<ConverseRequest> {
        lock(&self.recorded_requests).clone()
    }

    /// Get the last request made
    pub fn last_request(&self) -> Option<ConverseRequest> {
        lock(&self.recorded_requests).last().cloned()
    }
}

#[async_trait]
impl InferenceBackend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn converse_stream(&self, request: &ConverseRequest) -> Result<RawEventStream> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        lock(&self.recorded_requests).push(request.clone());
        let next = lock(&self.turns).pop_front();
        match next {
            Some(turn) => turn.into_stream(),
            None => Err(TetherError::Backend(BackendError::InvalidResponse(
                "mock backend has no scripted turns left".to_string(),
            ))),
        }
    }
}

/// Builds mock backends that share one turn queue
#[derive(Clone)]
pub struct MockBackendFactory {
    turns: TurnQueue,
    built: Arc<AtomicUsize>,
    recorded_requests: Arc<Mutex<Vec<ConverseRequest>>>,
}

impl MockBackendFactory {
    pub fn new(turns: Vec<MockTurn>) -> Self {
        Self {
            turns: Arc::new(Mutex::new(turns.into())),
            built: Arc::new(AtomicUsize::new(0)),
            recorded_requests: Arc::new(Mutex::new(vec![])),
        }
    }

    /// Number of connections built so far
    pub fn built_count(&self) -> usize {
        self.built.load(Ordering::SeqCst)
    }

    /// Requests seen by every connection this factory built
    pub fn recorded_requests(&self) -> Vec<ConverseRequest> {
        lock(&self.recorded_requests).clone()
    }
}

impl BackendFactory for MockBackendFactory {
    fn build(&self) -> Result<Arc<dyn InferenceBackend>> {
        let n = self.built.fetch_add(1, Ordering::SeqCst);
        let mut backend = MockBackend::with_queue(format!("mock-{}", n), Arc::clone(&self.turns));
        backend.recorded_requests = Arc::clone(&self.recorded_requests);
        Ok(Arc::new(backend))
    }
}

/// Raw event builders for scripting streams
pub mod events {
    use super::*;
    use crate::llm::provider::{
        BlockDelta, BlockStart, ContentBlockDeltaEvent, ContentBlockStartEvent,
        ContentBlockStopEvent, MessageStartEvent, MessageStopEvent, MetadataEvent, ReasoningDelta,
        ToolInputFragment, ToolUseDelta, ToolUseStart, Usage,
    };

    pub fn message_start() -> RawStreamEvent {
        RawStreamEvent::MessageStart(MessageStartEvent {
            role: "assistant".to_string(),
        })
    }

    pub fn text_delta(index: usize, text: &str) -> RawStreamEvent {
        RawStreamEvent::ContentBlockDelta(ContentBlockDeltaEvent {
            content_block_index: index,
            delta: BlockDelta::Text(text.to_string()),
        })
    }

    pub fn tool_start(index: usize, id: &str, name: &str) -> RawStreamEvent {
        RawStreamEvent::ContentBlockStart(ContentBlockStartEvent {
            content_block_index: index,
            start: Some(BlockStart::ToolUse(ToolUseStart {
                tool_use_id: id.to_string(),
                name: name.to_string(),
            })),
        })
    }

    pub fn tool_delta(index: usize, fragment: &str) -> RawStreamEvent {
        RawStreamEvent::ContentBlockDelta(ContentBlockDeltaEvent {
            content_block_index: index,
            delta: BlockDelta::ToolUse(ToolUseDelta {
                input: ToolInputFragment::Partial(fragment.to_string()),
            }),
        })
    }

    pub fn tool_input(index: usize, input: Value) -> RawStreamEvent {
        RawStreamEvent::ContentBlockDelta(ContentBlockDeltaEvent {
            content_block_index: index,
            delta: BlockDelta::ToolUse(ToolUseDelta {
                input: ToolInputFragment::Complete(input),
            }),
        })
    }

    pub fn reasoning_delta(
        index: usize,
        text: Option<&str>,
        signature: Option<&str>,
    ) -> RawStreamEvent {
        RawStreamEvent::ContentBlockDelta(ContentBlockDeltaEvent {
            content_block_index: index,
            delta: BlockDelta::ReasoningContent(ReasoningDelta {
                text: text.map(str::to_string),
                signature: signature.map(str::to_string),
            }),
        })
    }

    pub fn block_stop(index: usize) -> RawStreamEvent {
        RawStreamEvent::ContentBlockStop(ContentBlockStopEvent {
            content_block_index: index,
        })
    }

    pub fn message_stop(reason: &str) -> RawStreamEvent {
        RawStreamEvent::MessageStop(MessageStopEvent {
            stop_reason: reason.to_string(),
        })
    }

    pub fn metadata(input_tokens: u64, output_tokens: u64) -> RawStreamEvent {
        RawStreamEvent::Metadata(MetadataEvent {
            usage: Usage {
                input_tokens,
                output_tokens,
                total_tokens: input_tokens + output_tokens,
            },
            metrics: None,
        })
    }
}
