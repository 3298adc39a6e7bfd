// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain layer: everything the coordination services reason about, with no
//! knowledge of how it is persisted or served.

pub mod agent;
pub mod clock;
pub mod config;
pub mod events;
pub mod identity;
pub mod lock;
pub mod message;
pub mod repository;
pub mod salvage;
pub mod service;
pub mod session;
pub mod ttl;
