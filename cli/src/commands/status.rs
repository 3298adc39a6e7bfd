// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `berth status`

use anyhow::Result;
use berth_core::domain::config::DaemonConfig;
use colored::Colorize;

use crate::daemon::{check_daemon_running, DaemonStatus};
use crate::settings::client_host;

pub async fn execute(config: &DaemonConfig) -> Result<()> {
    let host = client_host(&config.network.bind_address);
    let port = config.network.port;

    match check_daemon_running(host, port).await? {
        DaemonStatus::Running { health } => {
            println!("{} berth {} on {}:{}", "●".green(), health.version, host, port);
            println!("  Uptime: {}s", health.uptime_seconds);
            println!(
                "  Live channels: {} ({} subscribers, {} waiters)",
                health.hub.channels, health.hub.subscribers, health.hub.waiters
            );
        }
        DaemonStatus::Unhealthy { error } => {
            println!("{} daemon on {}:{} is unhealthy: {}", "●".yellow(), host, port, error);
        }
        DaemonStatus::Stopped => {
            println!("{} no daemon answering on {}:{}", "●".red(), host, port);
        }
    }

    Ok(())
}
