// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Daemon hosting and detection
//!
//! # Architecture
//!
//! - **Layer:** Interface / Presentation Layer
//! - **Purpose:** Runs the coordination daemon and probes a running one over HTTP

use anyhow::Result;
use std::time::Duration;

pub mod client;
pub mod server;

pub use client::{DaemonClient, HealthReport};
pub use server::start_daemon;

#[derive(Debug, Clone)]
pub enum DaemonStatus {
    Running { health: HealthReport },
    Stopped,
    Unhealthy { error: String },
}

pub async fn check_daemon_running(host: &str, port: u16) -> Result<DaemonStatus> {
    // Fast timeout for local checks
    let client = DaemonClient::with_timeout(host, port, Duration::from_millis(500))?;

    match client.health().await {
        Ok(health) => Ok(DaemonStatus::Running { health }),
        Err(client::HealthError::Unreachable(_)) => Ok(DaemonStatus::Stopped),
        Err(e) => Ok(DaemonStatus::Unhealthy {
            error: e.to_string(),
        }),
    }
}
