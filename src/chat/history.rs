// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Image retention for conversation history

use crate::llm::message::{ContentBlock, Message, ToolResultContent};

fn image_total(messages: &[Message]) -> usize {
    messages
        .iter()
        .flat_map(|message| message.content.iter())
        .map(|block| match block {
            ContentBlock::ToolResult(result) => result.image_count(),
            _ => 0,
        })
        .sum()
}

/// Drop the oldest tool-result images so roughly `keep` remain.
///
/// Removal happens in chunks of `keep` images so the history prefix changes
/// only every `keep` new images. `keep == 0` disables trimming. Returns the
/// number of images removed.
pub fn trim_images(messages: &mut [Message], keep: usize) -> usize {
    if keep == 0 {
        return 0;
    }
    let total = image_total(messages);
    if total <= keep {
        return 0;
    }

    let mut to_remove = total - keep;
    to_remove -= to_remove % keep;
    if to_remove == 0 {
        return 0;
    }

    let mut removed = 0;
    for message in messages.iter_mut() {
        for block in message.content.iter_mut() {
            let ContentBlock::ToolResult(result) = block else {
                continue;
            };
            result.content.retain(|segment| {
                if removed < to_remove && matches!(segment, ToolResultContent::Image(_)) {
                    removed += 1;
                    false
                } else {
                    true
                }
            });
        }
        if removed == to_remove {
            break;
        }
    }

    tracing::debug!(
        target: "tether.chat.engine",
        removed,
        remaining = total - removed,
        "trimmed tool result images"
    );
    removed
}
