// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Infrastructure layer: SQLite pool and migrations, repository
//! implementations, the event bus, and the in-process channel hub.

pub mod channel_hub;
pub mod db;
pub mod event_bus;
pub mod repositories;
