// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Repository Factory - Application Layer
//!
//! Creates concrete repository implementations for the configured storage
//! backend. The domain layer only sees the traits; this is the one place that
//! knows which implementation backs them.

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use crate::domain::repository::{
    AgentRepository, LockRepository, MessageRepository, SalvageRepository, ServiceRepository,
    SessionRepository, StorageBackend,
};
use crate::infrastructure::db::Database;
use crate::infrastructure::repositories::{
    InMemoryAgentRepository, InMemoryLockRepository, InMemoryMessageRepository,
    InMemorySalvageRepository, InMemoryServiceRepository, InMemorySessionRepository,
    SqliteAgentRepository, SqliteLockRepository, SqliteMessageRepository, SqliteSalvageRepository,
    SqliteServiceRepository, SqliteSessionRepository,
};

/// One implementation of every repository, sharing a backend.
#[derive(Clone)]
pub struct Repositories {
    pub services: Arc<dyn ServiceRepository>,
    pub locks: Arc<dyn LockRepository>,
    pub messages: Arc<dyn MessageRepository>,
    pub agents: Arc<dyn AgentRepository>,
    pub sessions: Arc<dyn SessionRepository>,
    pub salvage: Arc<dyn SalvageRepository>,
}

impl Repositories {
    pub fn in_memory() -> Self {
        Self {
            services: Arc::new(InMemoryServiceRepository::new()),
            locks: Arc::new(InMemoryLockRepository::new()),
            messages: Arc::new(InMemoryMessageRepository::new()),
            agents: Arc::new(InMemoryAgentRepository::new()),
            sessions: Arc::new(InMemorySessionRepository::new()),
            salvage: Arc::new(InMemorySalvageRepository::new()),
        }
    }

    /// Repositories over an already-migrated database.
    pub fn sqlite(db: &Database) -> Self {
        let pool = db.get_pool().clone();
        Self {
            services: Arc::new(SqliteServiceRepository::new(pool.clone())),
            locks: Arc::new(SqliteLockRepository::new(pool.clone())),
            messages: Arc::new(SqliteMessageRepository::new(pool.clone())),
            agents: Arc::new(SqliteAgentRepository::new(pool.clone())),
            sessions: Arc::new(SqliteSessionRepository::new(pool.clone())),
            salvage: Arc::new(SqliteSalvageRepository::new(pool)),
        }
    }
}

/// Open the configured backend. For SQLite this connects and applies
/// pending migrations; the returned `Database` should be closed on shutdown.
pub async fn open_repositories(
    backend: &StorageBackend,
) -> Result<(Repositories, Option<Database>)> {
    match backend {
        StorageBackend::InMemory => {
            info!("Using in-memory storage; state is lost on exit");
            Ok((Repositories::in_memory(), None))
        }
        StorageBackend::Sqlite(config) => {
            let db = Database::connect(&config.path).await?;
            db.migrate().await?;
            info!(path = %config.path.display(), "SQLite storage ready");
            Ok((Repositories::sqlite(&db), Some(db)))
        }
    }
}
