// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Error types for Tether
//!
//! This module defines all error types used throughout the crate.

use thiserror::Error;

/// Main error type for Tether operations
#[derive(Error, Debug)]
pub enum TetherError {
    /// Inference backend errors
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// Tool dispatch failed (tool server raised, transport broke, etc.)
    #[error("Tool dispatch failed: {0}")]
    ToolDispatch(String),

    /// A flat tool name could not be mapped back to a tool server
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// Streamed tool input did not parse as JSON
    #[error("Malformed tool input for {tool}: {message}")]
    MalformedToolInput { tool: String, message: String },

    /// Tool-server protocol errors
    #[error("MCP error: {0}")]
    Mcp(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Backend-specific error types
#[derive(Error, Debug)]
pub enum BackendError {
    /// The backend is throttling requests
    #[error("Throttled: {0}")]
    Throttled(String),

    /// The backend is temporarily unavailable
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// Transient failures persisted past the retry budget
    #[error("Maximum retry attempts ({attempts}) reached; service is still throttling requests")]
    RetryExhausted { attempts: u32 },

    /// Backend returned a non-transient error
    #[error("Backend error ({status}): {message}")]
    Server { status: u16, message: String },

    /// Network connectivity error
    #[error("Network error: {0}")]
    Network(String),

    /// The event stream broke or carried an error event
    #[error("Streaming error: {0}")]
    Stream(String),

    /// Invalid response from the backend
    #[error("Invalid backend response: {0}")]
    InvalidResponse(String),
}

impl TetherError {
    /// Whether the error is throttling/unavailability and may be retried.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TetherError::Backend(BackendError::Throttled(_))
                | TetherError::Backend(BackendError::Unavailable(_))
        )
    }
}

/// Result type alias for Tether operations
pub type Result<T> = std::result::Result<T, TetherError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throttled_is_transient() {
        let err = TetherError::Backend(BackendError::Throttled("slow down".to_string()));
        assert!(err.is_transient());
    }

    #[test]
    fn test_unavailable_is_transient() {
        let err = TetherError::Backend(BackendError::Unavailable("503".to_string()));
        assert!(err.is_transient());
    }

    #[test]
    fn test_server_error_is_not_transient() {
        let err = TetherError::Backend(BackendError::Server {
            status: 400,
            message: "validation".to_string(),
        });
        assert!(!err.is_transient());
    }

    #[test]
    fn test_retry_exhausted_is_not_transient() {
        let err = TetherError::Backend(BackendError::RetryExhausted { attempts: 10 });
        assert!(!err.is_transient());
        assert!(err.to_string().contains("10"));
    }

    #[test]
    fn test_non_backend_errors_are_not_transient() {
        assert!(!TetherError::ToolDispatch("boom".to_string()).is_transient());
        assert!(!TetherError::Config("bad".to_string()).is_transient());
    }

    #[test]
    fn test_malformed_tool_input_display() {
        let err = TetherError::MalformedToolInput {
            tool: "catalog___priceLookup".to_string(),
            message: "EOF while parsing".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("catalog___priceLookup"));
        assert!(text.contains("EOF while parsing"));
    }

    #[test]
    fn test_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: TetherError = io_err.into();
        assert!(err.to_string().contains("IO error"));
    }

    #[test]
    fn test_from_backend_error() {
        let err: TetherError = BackendError::Network("refused".to_string()).into();
        assert!(err.to_string().contains("Backend error"));
        assert!(err.to_string().contains("refused"));
    }
}
