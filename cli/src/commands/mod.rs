// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Operator commands
//!
//! # Architecture
//!
//! - **Layer:** Interface / Presentation Layer
//! - **Purpose:** Subcommands other than `serve`, which lives in [`crate::daemon`]

pub mod config;
pub mod migrate;
pub mod status;

pub use config::ConfigCommand;
pub use migrate::MigrateCommand;
