// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Inference backend implementations

pub mod http;

pub use http::{HttpBackend, HttpBackendFactory};
