// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Conversation orchestration
//!
//! The turn engine and the pieces it composes: stream translation,
//! cancellation, prompt cache checkpoints, image retention and session state.

pub mod cache;
pub mod cancellation;
pub mod engine;
pub mod events;
pub mod history;
pub mod session;
pub mod streaming;

pub use cancellation::{CancelHandle, StreamGuard, StreamRegistry};
pub use engine::{ExtraParams, TurnEngine, TurnQuery};
pub use events::TurnEvent;
pub use session::{ConversationSession, LoopOutcome};
