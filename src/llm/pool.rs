// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Backend connection pool with throttling-aware rotation and backoff
//!
//! With a pool, a throttled request first rotates through the other pool
//! members; only after a full rotation fails does it sleep, and the backoff
//! exponent is capped so worst-case latency stays bounded. Without a pool the
//! single connection is rebuilt on every attempt with plain exponential
//! backoff. Either way `max_retries` backoff rounds bound the total work.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::time::sleep;

use crate::error::{BackendError, Result, TetherError};
use crate::llm::provider::{BackendFactory, ConverseRequest, InferenceBackend, RawEventStream};
use crate::llm::retry::BackoffPolicy;

enum PoolMode {
    Pooled(Vec<Arc<dyn InferenceBackend>>),
    Single(Arc<dyn BackendFactory>),
}

/// Set of backend connections shared by every conversation in the process
pub struct BackendPool {
    mode: PoolMode,
    next_index: AtomicUsize,
    policy: BackoffPolicy,
}

impl BackendPool {
    /// Pool over pre-built connections, selected round-robin.
    pub fn pooled(connections: Vec<Arc<dyn InferenceBackend>>, policy: BackoffPolicy) -> Result<Self> {
        if connections.is_empty() {
            return Err(TetherError::Config(
                "a backend pool needs at least one connection".to_string(),
            ));
        }
        Ok(Self {
            mode: PoolMode::Pooled(connections),
            next_index: AtomicUsize::new(0),
            policy,
        })
    }

    /// No pool: every attempt builds a fresh connection from the factory.
    pub fn single(factory: Arc<dyn BackendFactory>, policy: BackoffPolicy) -> Self {
        Self {
            mode: PoolMode::Single(factory),
            next_index: AtomicUsize::new(0),
            policy,
        }
    }

    /// Pre-build `size` connections, or fall back to a single rebuilt
    /// connection when `size` is zero.
    pub fn from_factory(
        factory: Arc<dyn BackendFactory>,
        size: usize,
        policy: BackoffPolicy,
    ) -> Result<Self> {
        if size == 0 {
            return Ok(Self::single(factory, policy));
        }
        let connections = (0..size)
            .map(|_| factory.build())
            .collect::<Result<Vec<_>>>()?;
        Self::pooled(connections, policy)
    }

    /// Number of pooled connections (zero without a pool)
    pub fn size(&self) -> usize {
        match &self.mode {
            PoolMode::Pooled(connections) => connections.len(),
            PoolMode::Single(_) => 0,
        }
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Next connection: round-robin over the pool, or a freshly built one.
    pub fn acquire(&self) -> Result<Arc<dyn InferenceBackend>> {
        match &self.mode {
            PoolMode::Pooled(connections) => {
                let index = self.next_index.fetch_add(1, Ordering::Relaxed) % connections.len();
                tracing::debug!(target: "tether.llm.pool", index, "selected pooled connection");
                Ok(Arc::clone(&connections[index]))
            }
            PoolMode::Single(factory) => factory.build(),
        }
    }

    /// Open a stream, rotating and backing off on throttling. Non-transient
    /// errors are returned immediately.
    pub async fn converse_with_backoff(&self, request: &ConverseRequest) -> Result<RawEventStream> {
        let mut connection = self.acquire()?;
        let mut attempt: u32 = 0;
        let mut rounds: u32 = 0;
        let mut rotations: usize = 0;

        loop {
            let error = match connection.converse_stream(request).await {
                Ok(stream) => {
                    if rounds > 0 || rotations > 0 {
                        tracing::info!(
                            target: "tether.llm.pool",
                            backend = connection.name(),
                            backoff_rounds = rounds,
                            "request accepted after throttling"
                        );
                    }
                    return Ok(stream);
                }
                Err(error) if !error.is_transient() => {
                    tracing::warn!(
                        target: "tether.llm.pool",
                        error = %error,
                        "backend request failed with non-retryable error"
                    );
                    return Err(error);
                }
                Err(error) => error,
            };

            match &self.mode {
                PoolMode::Pooled(connections) => {
                    rotations += 1;
                    if rotations >= connections.len() {
                        if rounds >= self.policy.max_retries {
                            return Err(self.exhausted(rounds));
                        }
                        let delay = self.policy.delay(self.policy.pooled_attempt(rounds));
                        tracing::warn!(
                            target: "tether.llm.pool",
                            error = %error,
                            attempt = rounds + 1,
                            max_retries = self.policy.max_retries,
                            delay_secs = delay.as_secs_f64(),
                            "every pooled connection throttled; backing off"
                        );
                        sleep(delay).await;
                        rounds += 1;
                        rotations = 0;
                    } else {
                        tracing::info!(
                            target: "tether.llm.pool",
                            error = %error,
                            rotations,
                            "throttled; rotating to next pooled connection"
                        );
                    }
                    connection = self.acquire()?;
                }
                PoolMode::Single(factory) => {
                    if rounds >= self.policy.max_retries {
                        return Err(self.exhausted(rounds));
                    }
                    let delay = self.policy.delay(attempt);
                    tracing::warn!(
                        target: "tether.llm.pool",
                        error = %error,
                        attempt = attempt + 1,
                        max_retries = self.policy.max_retries,
                        delay_secs = delay.as_secs_f64(),
                        "throttled; retrying with a rebuilt connection"
                    );
                    sleep(delay).await;
                    attempt += 1;
                    rounds += 1;
                    connection = factory.build()?;
                }
            }
        }
    }

    fn exhausted(&self, rounds: u32) -> TetherError {
        tracing::error!(
            target: "tether.llm.pool",
            max_retries = self.policy.max_retries,
            "maximum retry attempts reached; throttling persists"
        );
        TetherError::Backend(BackendError::RetryExhausted { attempts: rounds })
    }
}
