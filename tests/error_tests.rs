// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

use std::io;
use tether::error::{BackendError, TetherError};

#[test]
fn test_io_error_conversion() {
    let io_error = io::Error::new(io::ErrorKind::NotFound, "File not found");
    let error: TetherError = io_error.into();

    match error {
        TetherError::Io(_) => {} // Expected
        _ => panic!("Expected Io error, got different error type"),
    }
}

#[test]
fn test_json_error_conversion() {
    let json_error = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
    let error: TetherError = json_error.into();
    assert!(matches!(error, TetherError::Json(_)));
}

#[test]
fn test_config_error_display() {
    let error = TetherError::Config("Missing endpoint".to_string());
    assert_eq!(error.to_string(), "Configuration error: Missing endpoint");
}

#[test]
fn test_tool_dispatch_error_display() {
    let error = TetherError::ToolDispatch("Command failed".to_string());
    assert_eq!(error.to_string(), "Tool dispatch failed: Command failed");
}

#[test]
fn test_unknown_tool_display() {
    let error = TetherError::UnknownTool("catalog___missing".to_string());
    assert_eq!(error.to_string(), "Unknown tool: catalog___missing");
}

#[test]
fn test_backend_throttled_display() {
    let error = BackendError::Throttled("ThrottlingException".to_string());
    assert_eq!(error.to_string(), "Throttled: ThrottlingException");
}

#[test]
fn test_backend_server_error_display() {
    let error = BackendError::Server {
        status: 400,
        message: "ValidationException".to_string(),
    };
    assert_eq!(error.to_string(), "Backend error (400): ValidationException");
}

#[test]
fn test_backend_error_conversion() {
    let error: TetherError = BackendError::Unavailable("503".to_string()).into();
    assert!(matches!(
        error,
        TetherError::Backend(BackendError::Unavailable(_))
    ));
    assert!(error.is_transient());
}

#[test]
fn test_only_throttling_is_transient() {
    let transient = [
        TetherError::Backend(BackendError::Throttled("t".to_string())),
        TetherError::Backend(BackendError::Unavailable("u".to_string())),
    ];
    let fatal = [
        TetherError::Backend(BackendError::RetryExhausted { attempts: 3 }),
        TetherError::Backend(BackendError::Network("reset".to_string())),
        TetherError::Backend(BackendError::Stream("eof".to_string())),
        TetherError::Backend(BackendError::InvalidResponse("junk".to_string())),
        TetherError::Mcp("closed".to_string()),
        TetherError::InvalidInput("x".to_string()),
    ];
    assert!(transient.iter().all(TetherError::is_transient));
    assert!(fatal.iter().all(|e| !e.is_transient()));
}

#[test]
fn test_error_is_send_sync() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<TetherError>();
    assert_send_sync::<BackendError>();
}
