// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use crate::settings::{resolve_config, CliOverrides};

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Print the resolved configuration as YAML
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },
}

pub async fn handle_command(
    command: ConfigCommand,
    config_override: Option<PathBuf>,
    overrides: &CliOverrides,
) -> Result<()> {
    match command {
        ConfigCommand::Show { paths } => show(config_override, overrides, paths),
        ConfigCommand::Validate { file } => validate(file.or(config_override), overrides),
    }
}

fn show(config_override: Option<PathBuf>, overrides: &CliOverrides, show_paths: bool) -> Result<()> {
    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        if let Some(path) = &config_override {
            println!("  1. --config flag: {}", path.display());
        } else {
            println!("  1. --config flag: {}", "(not set)".dimmed());
        }
        println!(
            "  2. BERTH_CONFIG_PATH: {}",
            std::env::var("BERTH_CONFIG_PATH")
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./berth.yaml");
        println!("  4. ~/.berth/config.yaml");
        println!("  5. /etc/berth/config.yaml");
        println!();
    }

    let config = resolve_config(config_override, overrides)?;
    let yaml = config
        .to_yaml_string()
        .context("Failed to render configuration")?;

    println!("{}", "Current configuration:".bold());
    println!();
    print!("{}", yaml);

    Ok(())
}

fn validate(config_path: Option<PathBuf>, overrides: &CliOverrides) -> Result<()> {
    println!("Validating configuration...");

    let config = resolve_config(config_path, overrides)?;
    config
        .validate()
        .context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());
    println!(
        "  Listening on {}:{}",
        config.network.bind_address, config.network.port
    );
    match &config.network.socket_path {
        Some(path) => println!("  Unix socket: {}", path.display()),
        None => println!("  Unix socket: {}", "(disabled)".dimmed()),
    }
    println!(
        "  Port range: {}-{}",
        config.ports.range_min, config.ports.range_max
    );

    Ok(())
}
