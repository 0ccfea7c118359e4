// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Conversation session state
//!
//! Owns the message history, system prompt and cache checkpoint state of one
//! logical conversation. Only the turn engine mutates it, and only one query
//! runs over a session at a time (the engine borrows it mutably).

use serde::Serialize;
use uuid::Uuid;

use super::cache::{strip_history_cache_points, CheckpointState};
use crate::llm::message::{Message, SystemBlock};

/// How the last query over a session ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum LoopOutcome {
    /// The model gave a final answer
    Completed,
    /// The turn limit was reached before a final answer
    TurnLimitReached,
    /// A cooperative stop was observed
    Cancelled,
    /// A backend error ended the loop
    Failed(String),
    /// The stream ended on an unexpected stop reason or none at all
    Halted(String),
}

/// State for one logical conversation
#[derive(Debug, Clone)]
pub struct ConversationSession {
    id: Uuid,
    pub(crate) messages: Vec<Message>,
    system: Vec<SystemBlock>,
    pub(crate) checkpoints: CheckpointState,
    outcome: Option<LoopOutcome>,
}

impl Default for ConversationSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationSession {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            messages: Vec::new(),
            system: Vec::new(),
            checkpoints: CheckpointState::default(),
            outcome: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// System prompt as stored, without cache markers
    pub fn system(&self) -> &[SystemBlock] {
        &self.system
    }

    pub fn checkpoints(&self) -> CheckpointState {
        self.checkpoints
    }

    /// Outcome of the last query, `None` while one is running or before any
    pub fn outcome(&self) -> Option<&LoopOutcome> {
        self.outcome.as_ref()
    }

    /// Whether the last query ended with a final answer
    pub fn is_completed(&self) -> bool {
        matches!(self.outcome, Some(LoopOutcome::Completed))
    }

    pub fn clear_history(&mut self) {
        self.messages.clear();
        self.system.clear();
        self.checkpoints = CheckpointState::default();
        self.outcome = None;
    }

    /// Prepare for a new query.
    ///
    /// Continuing a session appends the new messages to the stored history
    /// and keeps the stored system prompt unless it is empty; otherwise the
    /// history is replaced. Cache markers from earlier queries are removed
    /// either way.
    pub(crate) fn begin_query(
        &mut self,
        messages: Vec<Message>,
        system: Vec<SystemBlock>,
        keep_session: bool,
    ) {
        let system: Vec<SystemBlock> = system
            .into_iter()
            .filter(|block| !matches!(block, SystemBlock::CachePoint(_)))
            .collect();

        if keep_session {
            self.messages.extend(messages);
            if self.system.is_empty() {
                self.system = system;
            }
        } else {
            self.messages = messages;
            self.system = system;
        }

        let stripped = strip_history_cache_points(&mut self.messages);
        if stripped > 0 {
            tracing::debug!(
                target: "tether.chat.engine",
                session_id = %self.id,
                stripped,
                "removed cache points from prior history"
            );
        }
        self.checkpoints = CheckpointState::default();
        self.outcome = None;
    }

    pub(crate) fn finish(&mut self, outcome: LoopOutcome) {
        self.outcome = Some(outcome);
    }
}
