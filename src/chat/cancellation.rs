// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Cooperative stream cancellation
//!
//! A running query registers its stream id and receives a guard. Anyone
//! holding the registry can request a stop; the query observes the flag at
//! its next check point. Dropping the guard removes the entry, whatever way
//! the query ended.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Stop flag for one stream
#[derive(Debug, Clone)]
pub struct CancelHandle {
    stream_id: Arc<str>,
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn new(stream_id: &str) -> Self {
        Self {
            stream_id: Arc::from(stream_id),
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    fn same_flag(&self, other: &CancelHandle) -> bool {
        Arc::ptr_eq(&self.flag, &other.flag)
    }
}

/// Process-wide map of active stream ids
#[derive(Debug, Default)]
pub struct StreamRegistry {
    streams: Mutex<HashMap<String, CancelHandle>>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CancelHandle>> {
        match self.streams.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!("Stream registry lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Register a stream. The entry lives until the returned guard drops.
    pub fn register(self: &Arc<Self>, stream_id: &str) -> StreamGuard {
        let handle = CancelHandle::new(stream_id);
        if self
            .lock()
            .insert(stream_id.to_string(), handle.clone())
            .is_some()
        {
            tracing::warn!(
                target: "tether.chat.stream",
                stream_id,
                "stream id re-registered while still active"
            );
        }
        tracing::info!(target: "tether.chat.stream", stream_id, "registered stream");
        StreamGuard {
            registry: Arc::clone(self),
            handle,
        }
    }

    /// Request a stop. Returns false for unknown ids.
    pub fn stop(&self, stream_id: &str) -> bool {
        match self.lock().get(stream_id) {
            Some(handle) => {
                handle.cancel();
                tracing::info!(target: "tether.chat.stream", stream_id, "stopping stream");
                true
            }
            None => {
                tracing::warn!(
                    target: "tether.chat.stream",
                    stream_id,
                    "attempted to stop unknown stream"
                );
                false
            }
        }
    }

    pub fn is_registered(&self, stream_id: &str) -> bool {
        self.lock().contains_key(stream_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn unregister(&self, handle: &CancelHandle) {
        let mut streams = self.lock();
        // A newer registration under the same id keeps its entry.
        if streams
            .get(handle.stream_id())
            .is_some_and(|current| current.same_flag(handle))
        {
            streams.remove(handle.stream_id());
            tracing::info!(
                target: "tether.chat.stream",
                stream_id = handle.stream_id(),
                "unregistered stream"
            );
        }
    }
}

/// Keeps a stream registered for as long as it lives
#[derive(Debug)]
pub struct StreamGuard {
    registry: Arc<StreamRegistry>,
    handle: CancelHandle,
}

impl StreamGuard {
    pub fn handle(&self) -> &CancelHandle {
        &self.handle
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.registry.unregister(&self.handle);
    }
}
