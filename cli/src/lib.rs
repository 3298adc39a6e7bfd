// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! berth CLI library - exposes testable components
//!
//! # Architecture
//!
//! - **Layer:** Interface / Presentation Layer
//! - **Purpose:** Hosts the coordination daemon and the operator commands around it

pub mod commands;
pub mod daemon;
pub mod logging;
pub mod settings;
