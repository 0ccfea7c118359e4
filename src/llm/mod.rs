// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Inference backend layer for Tether
//!
//! Message and stream types, the backend abstraction, connection pooling
//! and backoff.

pub mod message;
pub mod mock_provider;
pub mod pool;
pub mod provider;
pub mod providers;
pub mod retry;

pub use message::*;
pub use pool::BackendPool;
pub use provider::*;
pub use retry::BackoffPolicy;
