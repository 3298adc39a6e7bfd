// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # berth
//!
//! Local coordination daemon for agent processes sharing one machine: port
//! claims, TTL locks, pub/sub channels and agent liveness with salvage.
//!
//! ## Commands
//!
//! - `berth serve` - Run the daemon in the foreground (TCP + Unix socket)
//! - `berth status` - Health check against a running daemon
//! - `berth config show|validate` - Configuration management
//! - `berth migrate [--dry-run]` - Apply pending store migrations

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

use berth_cli::commands::{self, ConfigCommand, MigrateCommand};
use berth_cli::daemon;
use berth_cli::logging::init_logging;
use berth_cli::settings::{resolve_config, CliOverrides};

/// berth - coordinate ports, locks and channels between local agents
#[derive(Parser)]
#[command(name = "berth")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "BERTH_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// HTTP API port (default: 9876)
    #[arg(long, global = true, env = "BERTH_PORT")]
    port: Option<u16>,

    /// HTTP API bind address (default: 127.0.0.1)
    #[arg(long, global = true, env = "BERTH_HOST")]
    host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "BERTH_LOG_LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the coordination daemon in the foreground
    #[command(name = "serve")]
    Serve,

    /// Check whether a daemon is answering on the configured port
    #[command(name = "status")]
    Status,

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },

    /// Apply pending migrations to the SQLite store
    #[command(name = "migrate")]
    Migrate {
        #[command(flatten)]
        command: MigrateCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let overrides = CliOverrides {
        port: cli.port,
        host: cli.host,
        log_level: cli.log_level,
    };

    match cli.command {
        Some(Commands::Serve) => {
            let config = resolve_config(cli.config, &overrides)?;
            init_logging(&config.logging)?;
            daemon::start_daemon(config).await
        }
        Some(Commands::Status) => {
            let config = resolve_config(cli.config, &overrides)?;
            init_logging(&config.logging)?;
            commands::status::execute(&config).await
        }
        Some(Commands::Config { command }) => {
            commands::config::handle_command(command, cli.config, &overrides).await
        }
        Some(Commands::Migrate { command }) => {
            let config = resolve_config(cli.config, &overrides)?;
            init_logging(&config.logging)?;
            commands::migrate::execute(command, &config).await
        }
        None => {
            eprintln!("{}", "No command specified. Use --help for usage.".yellow());
            std::process::exit(1);
        }
    }
}
