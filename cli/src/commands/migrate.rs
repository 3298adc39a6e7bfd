// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Store Migration Command
//!
//! Implements `berth migrate` for applying pending schema migrations to the
//! SQLite store without starting the daemon. `berth serve` applies the same
//! migrations on startup.
//!
//! # Usage
//!
//! ```bash
//! # Apply all pending migrations
//! berth migrate
//!
//! # Preview migrations without applying
//! berth migrate --dry-run
//! ```

use anyhow::{Context, Result};
use berth_core::domain::config::{DaemonConfig, StorageKind};
use berth_core::infrastructure::db::{Database, MIGRATOR};
use clap::Args;
use colored::Colorize;

#[derive(Args)]
pub struct MigrateCommand {
    /// Perform a dry run without applying changes
    #[arg(long)]
    dry_run: bool,
}

pub async fn execute(cmd: MigrateCommand, config: &DaemonConfig) -> Result<()> {
    println!("{}", "berth migrate".bold().green());

    if config.storage.backend == StorageKind::Memory {
        println!("{}", "In-memory storage is configured; nothing to migrate.".yellow());
        return Ok(());
    }

    let path = &config.storage.database_path;
    println!("Opening store at {}...", path.display());
    let db = Database::connect(path)
        .await
        .context("Failed to open coordination store")?;

    let (applied_count, total_migrations) = db.migration_status().await?;
    println!(
        "Migration status: {} applied, {} total available.",
        applied_count, total_migrations
    );

    if applied_count >= total_migrations {
        println!("{}", "✓ Store is up to date.".green());
        db.close().await;
        return Ok(());
    }

    if cmd.dry_run {
        println!("{}", "Pending migrations (dry run):".yellow());
        for migration in MIGRATOR.iter().skip(applied_count) {
            println!("  - {} {}", migration.version, migration.description);
        }
        db.close().await;
        return Ok(());
    }

    println!("Applying {} migration(s)...", total_migrations - applied_count);
    db.migrate().await?;
    println!("{}", "✓ Migrations applied.".green());

    db.close().await;
    Ok(())
}
