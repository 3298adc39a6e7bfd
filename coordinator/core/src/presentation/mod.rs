// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Presentation Layer (`berth-core`)
//!
//! HTTP surface that translates requests into coordination service calls.
//! No coordination logic lives here; handlers parse, delegate, and map the
//! error taxonomy onto status codes.
//!
//! | Module | Transport | Description |
//! |--------|-----------|-------------|
//! | [`api`] | HTTP/SSE (Axum) | REST endpoints + Server-Sent Events for channel subscriptions |

pub mod api;
