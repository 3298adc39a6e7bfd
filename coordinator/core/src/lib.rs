// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! berth-core
//!
//! Coordination engine shared by every agent process talking to the local
//! berth daemon: atomic port claims, TTL-scoped locks, channel messaging and
//! heartbeat-driven agent liveness with salvage of dead agents' work.
//!
//! # Architecture
//!
//! - **domain**: value objects, aggregates, repository contracts, events, clock, config
//! - **application**: the coordination services and the error taxonomy
//! - **infrastructure**: SQLite + in-memory stores, event bus, channel hub
//! - **presentation**: HTTP API

pub mod domain;
pub mod application;
pub mod infrastructure;
pub mod presentation;

pub use domain::*;
