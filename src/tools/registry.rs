// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Tool name registry
//!
//! The backend sees one flat namespace of tool names. Each tool is exposed
//! as `server_id + "___" + tool_name`, normalized so characters the backend
//! rejects (`-`, `/`, `:`) become `_`. The reverse map remembers the
//! un-normalized key so the original pair can be recovered.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{Result, TetherError};

/// Separator between server id and tool name in a flat name
pub const TOOL_NAME_DELIMITER: &str = "___";

#[derive(Default)]
struct Maps {
    /// `server___tool` key -> flat name
    forward: HashMap<String, String>,
    /// flat name -> `server___tool` key
    reverse: HashMap<String, String>,
}

/// Bidirectional mapping between flat tool names and `(server, tool)` pairs
#[derive(Default)]
pub struct ToolNameRegistry {
    maps: RwLock<Maps>,
}

impl ToolNameRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace characters the backend does not accept in tool names.
    pub fn normalize(name: &str) -> String {
        name.replace(['-', '/', ':'], "_")
    }

    /// Register a tool and return its flat name. Registering the same pair
    /// again returns the same name.
    pub fn register(&self, server_id: &str, tool_name: &str) -> String {
        let key = format!("{}{}{}", server_id, TOOL_NAME_DELIMITER, tool_name);
        let flat = Self::normalize(&key);

        let mut maps = self.write();
        if let Some(previous) = maps.reverse.get(&flat) {
            if previous != &key {
                tracing::warn!(
                    target: "tether.tools.dispatch",
                    flat_name = %flat,
                    previous = %previous,
                    replacement = %key,
                    "flat tool name collision; latest registration wins"
                );
            }
        }
        maps.forward.insert(key.clone(), flat.clone());
        maps.reverse.insert(flat.clone(), key);
        flat
    }

    /// Flat name previously assigned to a pair
    pub fn flat_name(&self, server_id: &str, tool_name: &str) -> Option<String> {
        let key = format!("{}{}{}", server_id, TOOL_NAME_DELIMITER, tool_name);
        self.read().forward.get(&key).cloned()
    }

    /// Map a flat name back to `(server_id, tool_name)`.
    pub fn resolve(&self, flat_name: &str) -> Result<(String, String)> {
        let maps = self.read();
        let key = maps
            .reverse
            .get(flat_name)
            .ok_or_else(|| TetherError::UnknownTool(flat_name.to_string()))?;

        let parts: Vec<&str> = key.split(TOOL_NAME_DELIMITER).collect();
        match parts.as_slice() {
            [server_id, tool_name] => Ok((server_id.to_string(), tool_name.to_string())),
            _ => Err(TetherError::UnknownTool(format!(
                "{} (registered as '{}', which does not split into server and tool)",
                flat_name, key
            ))),
        }
    }

    pub fn len(&self) -> usize {
        self.read().reverse.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> RwLockReadGuard<'_, Maps> {
        match self.maps.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!("Tool name registry lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, Maps> {
        match self.maps.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!("Tool name registry lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}
