// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Domain Repository Interfaces
//!
//! Persistence contracts for each aggregate, defined in the domain layer and
//! implemented in `crate::infrastructure::repositories`.
//!
//! | Trait | Aggregate | Implementations |
//! |-------|-----------|----------------|
//! | `ServiceRepository` | `Service`, `Endpoint` | `InMemoryServiceRepository`, `SqliteServiceRepository` |
//! | `LockRepository` | `Lock` | `InMemoryLockRepository`, `SqliteLockRepository` |
//! | `MessageRepository` | `Message` | `InMemoryMessageRepository`, `SqliteMessageRepository` |
//! | `AgentRepository` | `Agent` | `InMemoryAgentRepository`, `SqliteAgentRepository` |
//! | `SessionRepository` | `Session` | `InMemorySessionRepository`, `SqliteSessionRepository` |
//! | `SalvageRepository` | `SalvageEntry` | `InMemorySalvageRepository`, `SqliteSalvageRepository` |
//!
//! ## Atomicity
//!
//! Every mutating method is a single store operation whose outcome is decided
//! by the store itself (unique index, conditional `UPDATE`/`DELETE`). Callers
//! never read-then-write to make an exclusivity decision; they issue the
//! conditional write and inspect the result.

use async_trait::async_trait;
use std::path::PathBuf;

use crate::domain::agent::{Agent, AgentId};
use crate::domain::identity::ServiceIdentity;
use crate::domain::lock::{AcquireResult, Lock, OwnedUpdate};
use crate::domain::message::{ChannelSummary, Message, NewMessage};
use crate::domain::salvage::{NewSalvageEntry, SalvageEntry, SalvageTransition, TransitionResult};
use crate::domain::service::{Endpoint, Service, ServiceStatus};
use crate::domain::session::Session;

/// Storage backend enum for pluggable persistence
#[derive(Debug, Clone)]
pub enum StorageBackend {
    InMemory,
    Sqlite(SqliteConfig),
}

#[derive(Debug, Clone)]
pub struct SqliteConfig {
    pub path: PathBuf,
}

#[async_trait]
pub trait ServiceRepository: Send + Sync {
    /// Insert-or-fail. `Conflict` when the identity or the port is taken.
    async fn insert(&self, service: &Service) -> Result<(), RepositoryError>;

    /// Raw row, expired or not
    async fn find_by_id(&self, id: &ServiceIdentity) -> Result<Option<Service>, RepositoryError>;

    async fn find_by_port(&self, port: u16) -> Result<Option<Service>, RepositoryError>;

    /// All rows ordered by identity
    async fn list_all(&self) -> Result<Vec<Service>, RepositoryError>;

    /// Every port currently held by a row, including expired rows not yet swept
    async fn ports_in_use(&self) -> Result<Vec<u16>, RepositoryError>;

    /// Delete the given identities (endpoints cascade); returns the deleted rows
    async fn delete_many(&self, ids: &[ServiceIdentity]) -> Result<Vec<Service>, RepositoryError>;

    /// Conditional delete of rows with `expires_at <= now`
    async fn delete_expired(&self, now_ms: i64) -> Result<Vec<Service>, RepositoryError>;

    async fn update_status(
        &self,
        id: &ServiceIdentity,
        status: ServiceStatus,
        pid: Option<u32>,
        now_ms: i64,
    ) -> Result<Option<Service>, RepositoryError>;

    /// Upsert; `NotFound` if the service row does not exist
    async fn upsert_endpoint(&self, endpoint: &Endpoint) -> Result<(), RepositoryError>;

    async fn endpoints_for(&self, id: &ServiceIdentity) -> Result<Vec<Endpoint>, RepositoryError>;
}

#[async_trait]
pub trait LockRepository: Send + Sync {
    /// Atomic acquire: writes `lock` when the name is free, expired, or
    /// already held by `lock.owner`; otherwise reports the current holder.
    /// A re-entrant acquire keeps the original `acquired_at`.
    async fn acquire(&self, lock: &Lock, now_ms: i64) -> Result<AcquireResult, RepositoryError>;

    /// Unexpired lock by name
    async fn get(&self, name: &str, now_ms: i64) -> Result<Option<Lock>, RepositoryError>;

    /// Delete when held by `owner`; `owner = None` deletes regardless of holder.
    async fn release(
        &self,
        name: &str,
        owner: Option<&str>,
        now_ms: i64,
    ) -> Result<OwnedUpdate, RepositoryError>;

    async fn extend(
        &self,
        name: &str,
        owner: &str,
        expires_at: i64,
        now_ms: i64,
    ) -> Result<OwnedUpdate, RepositoryError>;

    /// Unexpired locks, optionally for one owner
    async fn list(&self, owner: Option<&str>, now_ms: i64) -> Result<Vec<Lock>, RepositoryError>;

    async fn delete_expired(&self, now_ms: i64) -> Result<Vec<Lock>, RepositoryError>;
}

#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// Append and return the stored message with its assigned id
    async fn append(&self, message: &NewMessage) -> Result<Message, RepositoryError>;

    /// Unexpired messages with `id > after`, ascending, at most `limit`
    async fn list(
        &self,
        channel: &str,
        after: Option<i64>,
        limit: u32,
        now_ms: i64,
    ) -> Result<Vec<Message>, RepositoryError>;

    async fn clear(&self, channel: &str) -> Result<u64, RepositoryError>;

    async fn channels(&self, now_ms: i64) -> Result<Vec<ChannelSummary>, RepositoryError>;

    async fn delete_expired(&self, now_ms: i64) -> Result<u64, RepositoryError>;
}

#[async_trait]
pub trait AgentRepository: Send + Sync {
    /// Create or reactivate. An existing row keeps its `registered_at`.
    async fn upsert(&self, agent: &Agent) -> Result<Agent, RepositoryError>;

    async fn find_by_id(&self, id: &AgentId) -> Result<Option<Agent>, RepositoryError>;

    /// Set `last_heartbeat`; `None` when the agent is not registered
    async fn touch(&self, id: &AgentId, now_ms: i64) -> Result<Option<Agent>, RepositoryError>;

    async fn list_all(&self) -> Result<Vec<Agent>, RepositoryError>;

    /// Agents whose last heartbeat is at or before `cutoff_ms`
    async fn list_silent_since(&self, cutoff_ms: i64) -> Result<Vec<Agent>, RepositoryError>;

    async fn delete(&self, id: &AgentId) -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Used by the session writer and by tests
    async fn save(&self, session: &Session) -> Result<(), RepositoryError>;

    /// Active sessions for an agent, most recent first
    async fn active_for_agent(&self, agent_id: &AgentId) -> Result<Vec<Session>, RepositoryError>;
}

#[async_trait]
pub trait SalvageRepository: Send + Sync {
    /// Insert unless an entry for the same `(agent_id, session_id)` exists or
    /// the agent already has a live entry. `Some` only when a row was created.
    async fn insert_if_absent(
        &self,
        entry: &NewSalvageEntry,
    ) -> Result<Option<SalvageEntry>, RepositoryError>;

    /// The queued or claimed entry for a dead agent
    async fn find_live(&self, agent_id: &AgentId) -> Result<Option<SalvageEntry>, RepositoryError>;

    /// Conditional status transition on the live entry. When `claimer` is
    /// given the entry must also be claimed by it.
    async fn transition(
        &self,
        agent_id: &AgentId,
        transition: &SalvageTransition,
        claimer: Option<&AgentId>,
        now_ms: i64,
    ) -> Result<TransitionResult, RepositoryError>;

    async fn list(
        &self,
        project: Option<&str>,
        include_terminal: bool,
    ) -> Result<Vec<SalvageEntry>, RepositoryError>;
}

/// Repository errors
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Unique constraint violated: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => RepositoryError::NotFound("Row not found".to_string()),
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                RepositoryError::Conflict(db.message().to_string())
            }
            sqlx::Error::Database(ref db) if db.is_foreign_key_violation() => {
                RepositoryError::NotFound(db.message().to_string())
            }
            _ => RepositoryError::Database(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::Serialization(err.to_string())
    }
}
