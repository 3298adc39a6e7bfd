// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Repository Implementations
//!
//! Infrastructure implementations of the repository contracts defined in
//! `crate::domain::repository`.
//!
//! # Available Implementations
//!
//! ## SQLite Repositories
//!
//! Durable implementations backed by one SQLite file:
//! - **SqliteServiceRepository** - services and their endpoints
//! - **SqliteLockRepository** - TTL-scoped named locks
//! - **SqliteMessageRepository** - channel message log
//! - **SqliteAgentRepository** - registered agents and heartbeats
//! - **SqliteSessionRepository** - session context read by salvage
//! - **SqliteSalvageRepository** - dead-agent work queue
//!
//! ## In-Memory Repositories
//!
//! Each keeps its whole state behind a single mutex, which gives the same
//! insert-or-fail and compare-and-set outcomes as the SQLite constraints.
//! Used for `storage.backend: memory` and in unit tests.

pub mod sqlite_agent;
pub mod sqlite_lock;
pub mod sqlite_message;
pub mod sqlite_salvage;
pub mod sqlite_service;
pub mod sqlite_session;

pub use sqlite_agent::SqliteAgentRepository;
pub use sqlite_lock::SqliteLockRepository;
pub use sqlite_message::SqliteMessageRepository;
pub use sqlite_salvage::SqliteSalvageRepository;
pub use sqlite_service::SqliteServiceRepository;
pub use sqlite_session::SqliteSessionRepository;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::domain::agent::{Agent, AgentId};
use crate::domain::identity::ServiceIdentity;
use crate::domain::lock::{AcquireResult, Lock, OwnedUpdate};
use crate::domain::message::{ChannelSummary, Message, NewMessage};
use crate::domain::repository::{
    AgentRepository, LockRepository, MessageRepository, RepositoryError, SalvageRepository,
    ServiceRepository, SessionRepository,
};
use crate::domain::salvage::{
    NewSalvageEntry, SalvageEntry, SalvageStatus, SalvageTransition, TransitionResult,
};
use crate::domain::service::{Endpoint, Service, ServiceStatus};
use crate::domain::session::Session;

pub(crate) fn encode_json(value: &Option<Value>) -> Result<Option<String>, RepositoryError> {
    value
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(RepositoryError::from)
}

pub(crate) fn decode_json(raw: Option<String>) -> Result<Option<Value>, RepositoryError> {
    raw.as_deref()
        .map(serde_json::from_str)
        .transpose()
        .map_err(RepositoryError::from)
}

// ============================================================================
// Services
// ============================================================================

#[derive(Default)]
struct ServiceTable {
    services: BTreeMap<ServiceIdentity, Service>,
    endpoints: BTreeMap<(ServiceIdentity, String), String>,
}

#[derive(Clone, Default)]
pub struct InMemoryServiceRepository {
    state: Arc<Mutex<ServiceTable>>,
}

impl InMemoryServiceRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ServiceTable {
    fn remove(&mut self, id: &ServiceIdentity) -> Option<Service> {
        let removed = self.services.remove(id)?;
        self.endpoints.retain(|(service_id, _), _| service_id != id);
        Some(removed)
    }
}

#[async_trait]
impl ServiceRepository for InMemoryServiceRepository {
    async fn insert(&self, service: &Service) -> Result<(), RepositoryError> {
        let mut table = self.state.lock();
        if table.services.contains_key(&service.id) {
            return Err(RepositoryError::Conflict(format!(
                "service '{}' already exists",
                service.id
            )));
        }
        if table.services.values().any(|s| s.port == service.port) {
            return Err(RepositoryError::Conflict(format!(
                "port {} already assigned",
                service.port
            )));
        }
        table.services.insert(service.id.clone(), service.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: &ServiceIdentity) -> Result<Option<Service>, RepositoryError> {
        Ok(self.state.lock().services.get(id).cloned())
    }

    async fn find_by_port(&self, port: u16) -> Result<Option<Service>, RepositoryError> {
        Ok(self
            .state
            .lock()
            .services
            .values()
            .find(|s| s.port == port)
            .cloned())
    }

    async fn list_all(&self) -> Result<Vec<Service>, RepositoryError> {
        Ok(self.state.lock().services.values().cloned().collect())
    }

    async fn ports_in_use(&self) -> Result<Vec<u16>, RepositoryError> {
        Ok(self.state.lock().services.values().map(|s| s.port).collect())
    }

    async fn delete_many(&self, ids: &[ServiceIdentity]) -> Result<Vec<Service>, RepositoryError> {
        let mut table = self.state.lock();
        Ok(ids.iter().filter_map(|id| table.remove(id)).collect())
    }

    async fn delete_expired(&self, now_ms: i64) -> Result<Vec<Service>, RepositoryError> {
        let mut table = self.state.lock();
        let expired: Vec<ServiceIdentity> = table
            .services
            .values()
            .filter(|s| s.is_expired(now_ms))
            .map(|s| s.id.clone())
            .collect();
        Ok(expired.iter().filter_map(|id| table.remove(id)).collect())
    }

    async fn update_status(
        &self,
        id: &ServiceIdentity,
        status: ServiceStatus,
        pid: Option<u32>,
        now_ms: i64,
    ) -> Result<Option<Service>, RepositoryError> {
        let mut table = self.state.lock();
        Ok(table.services.get_mut(id).map(|service| {
            service.status = status;
            if pid.is_some() {
                service.pid = pid;
            }
            service.last_seen = now_ms;
            service.clone()
        }))
    }

    async fn upsert_endpoint(&self, endpoint: &Endpoint) -> Result<(), RepositoryError> {
        let mut table = self.state.lock();
        if !table.services.contains_key(&endpoint.service_id) {
            return Err(RepositoryError::NotFound(format!(
                "service '{}'",
                endpoint.service_id
            )));
        }
        table.endpoints.insert(
            (endpoint.service_id.clone(), endpoint.env.clone()),
            endpoint.url.clone(),
        );
        Ok(())
    }

    async fn endpoints_for(&self, id: &ServiceIdentity) -> Result<Vec<Endpoint>, RepositoryError> {
        Ok(self
            .state
            .lock()
            .endpoints
            .iter()
            .filter(|((service_id, _), _)| service_id == id)
            .map(|((service_id, env), url)| Endpoint {
                service_id: service_id.clone(),
                env: env.clone(),
                url: url.clone(),
            })
            .collect())
    }
}

// ============================================================================
// Locks
// ============================================================================

#[derive(Clone, Default)]
pub struct InMemoryLockRepository {
    locks: Arc<Mutex<BTreeMap<String, Lock>>>,
}

impl InMemoryLockRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LockRepository for InMemoryLockRepository {
    async fn acquire(&self, lock: &Lock, now_ms: i64) -> Result<AcquireResult, RepositoryError> {
        let mut locks = self.locks.lock();
        let mut written = lock.clone();

        if let Some(current) = locks.get(&lock.name) {
            if !current.is_expired(now_ms) {
                if current.owner != lock.owner {
                    return Ok(AcquireResult::Held(current.clone()));
                }
                written.acquired_at = current.acquired_at;
                if written.metadata.is_none() {
                    written.metadata = current.metadata.clone();
                }
            }
        }

        locks.insert(lock.name.clone(), written.clone());
        Ok(AcquireResult::Acquired(written))
    }

    async fn get(&self, name: &str, now_ms: i64) -> Result<Option<Lock>, RepositoryError> {
        Ok(self
            .locks
            .lock()
            .get(name)
            .filter(|l| !l.is_expired(now_ms))
            .cloned())
    }

    async fn release(
        &self,
        name: &str,
        owner: Option<&str>,
        now_ms: i64,
    ) -> Result<OwnedUpdate, RepositoryError> {
        let mut locks = self.locks.lock();
        let outcome = match locks.get(name) {
            Some(current) if !current.is_expired(now_ms) => {
                if owner.is_none_or(|o| o == current.owner) {
                    None
                } else {
                    Some(OwnedUpdate::NotOwner(current.clone()))
                }
            }
            _ => Some(OwnedUpdate::Missing),
        };

        match outcome {
            Some(outcome) => Ok(outcome),
            None => Ok(locks
                .remove(name)
                .map(OwnedUpdate::Applied)
                .unwrap_or(OwnedUpdate::Missing)),
        }
    }

    async fn extend(
        &self,
        name: &str,
        owner: &str,
        expires_at: i64,
        now_ms: i64,
    ) -> Result<OwnedUpdate, RepositoryError> {
        let mut locks = self.locks.lock();
        match locks.get_mut(name) {
            Some(current) if !current.is_expired(now_ms) => {
                if current.owner == owner {
                    current.expires_at = expires_at;
                    Ok(OwnedUpdate::Applied(current.clone()))
                } else {
                    Ok(OwnedUpdate::NotOwner(current.clone()))
                }
            }
            _ => Ok(OwnedUpdate::Missing),
        }
    }

    async fn list(&self, owner: Option<&str>, now_ms: i64) -> Result<Vec<Lock>, RepositoryError> {
        Ok(self
            .locks
            .lock()
            .values()
            .filter(|l| !l.is_expired(now_ms))
            .filter(|l| owner.is_none_or(|o| o == l.owner))
            .cloned()
            .collect())
    }

    async fn delete_expired(&self, now_ms: i64) -> Result<Vec<Lock>, RepositoryError> {
        let mut locks = self.locks.lock();
        let expired: Vec<String> = locks
            .values()
            .filter(|l| l.is_expired(now_ms))
            .map(|l| l.name.clone())
            .collect();
        Ok(expired.iter().filter_map(|name| locks.remove(name)).collect())
    }
}

// ============================================================================
// Messages
// ============================================================================

#[derive(Default)]
struct MessageLog {
    last_id: i64,
    messages: BTreeMap<i64, Message>,
}

#[derive(Clone, Default)]
pub struct InMemoryMessageRepository {
    log: Arc<Mutex<MessageLog>>,
}

impl InMemoryMessageRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageRepository for InMemoryMessageRepository {
    async fn append(&self, message: &NewMessage) -> Result<Message, RepositoryError> {
        let mut log = self.log.lock();
        log.last_id += 1;
        let stored = Message {
            id: log.last_id,
            channel: message.channel.clone(),
            payload: message.payload.clone(),
            sender: message.sender.clone(),
            created_at: message.created_at,
            expires_at: message.expires_at,
        };
        log.messages.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn list(
        &self,
        channel: &str,
        after: Option<i64>,
        limit: u32,
        now_ms: i64,
    ) -> Result<Vec<Message>, RepositoryError> {
        let log = self.log.lock();
        let from = after.unwrap_or(0).saturating_add(1);
        Ok(log
            .messages
            .range(from..)
            .map(|(_, m)| m)
            .filter(|m| m.channel == channel && !m.is_expired(now_ms))
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn clear(&self, channel: &str) -> Result<u64, RepositoryError> {
        let mut log = self.log.lock();
        let before = log.messages.len();
        log.messages.retain(|_, m| m.channel != channel);
        Ok((before - log.messages.len()) as u64)
    }

    async fn channels(&self, now_ms: i64) -> Result<Vec<ChannelSummary>, RepositoryError> {
        let log = self.log.lock();
        let mut summaries: BTreeMap<&str, ChannelSummary> = BTreeMap::new();
        for message in log.messages.values().filter(|m| !m.is_expired(now_ms)) {
            let entry = summaries
                .entry(message.channel.as_str())
                .or_insert_with(|| ChannelSummary {
                    channel: message.channel.clone(),
                    count: 0,
                    last_id: 0,
                });
            entry.count += 1;
            entry.last_id = entry.last_id.max(message.id);
        }
        Ok(summaries.into_values().collect())
    }

    async fn delete_expired(&self, now_ms: i64) -> Result<u64, RepositoryError> {
        let mut log = self.log.lock();
        let before = log.messages.len();
        log.messages.retain(|_, m| !m.is_expired(now_ms));
        Ok((before - log.messages.len()) as u64)
    }
}

// ============================================================================
// Agents
// ============================================================================

#[derive(Clone, Default)]
pub struct InMemoryAgentRepository {
    agents: Arc<Mutex<BTreeMap<AgentId, Agent>>>,
}

impl InMemoryAgentRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AgentRepository for InMemoryAgentRepository {
    async fn upsert(&self, agent: &Agent) -> Result<Agent, RepositoryError> {
        let mut agents = self.agents.lock();
        let mut stored = agent.clone();
        if let Some(existing) = agents.get(&agent.id) {
            stored.registered_at = existing.registered_at;
        }
        agents.insert(stored.id.clone(), stored.clone());
        Ok(stored)
    }

    async fn find_by_id(&self, id: &AgentId) -> Result<Option<Agent>, RepositoryError> {
        Ok(self.agents.lock().get(id).cloned())
    }

    async fn touch(&self, id: &AgentId, now_ms: i64) -> Result<Option<Agent>, RepositoryError> {
        Ok(self.agents.lock().get_mut(id).map(|agent| {
            agent.last_heartbeat = now_ms;
            agent.clone()
        }))
    }

    async fn list_all(&self) -> Result<Vec<Agent>, RepositoryError> {
        Ok(self.agents.lock().values().cloned().collect())
    }

    async fn list_silent_since(&self, cutoff_ms: i64) -> Result<Vec<Agent>, RepositoryError> {
        Ok(self
            .agents
            .lock()
            .values()
            .filter(|a| a.last_heartbeat <= cutoff_ms)
            .cloned()
            .collect())
    }

    async fn delete(&self, id: &AgentId) -> Result<bool, RepositoryError> {
        Ok(self.agents.lock().remove(id).is_some())
    }
}

// ============================================================================
// Sessions
// ============================================================================

#[derive(Clone, Default)]
pub struct InMemorySessionRepository {
    sessions: Arc<Mutex<HashMap<String, Session>>>,
}

impl InMemorySessionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn save(&self, session: &Session) -> Result<(), RepositoryError> {
        self.sessions
            .lock()
            .insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn active_for_agent(&self, agent_id: &AgentId) -> Result<Vec<Session>, RepositoryError> {
        let mut sessions: Vec<Session> = self
            .sessions
            .lock()
            .values()
            .filter(|s| s.active && &s.agent_id == agent_id)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.started_at.cmp(&a.started_at).then(b.id.cmp(&a.id)));
        Ok(sessions)
    }
}

// ============================================================================
// Salvage
// ============================================================================

#[derive(Default)]
struct SalvageQueue {
    last_id: i64,
    entries: Vec<SalvageEntry>,
}

impl SalvageQueue {
    fn live_index(&self, agent_id: &AgentId) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| &e.agent_id == agent_id && !e.status.is_terminal())
    }
}

#[derive(Clone, Default)]
pub struct InMemorySalvageRepository {
    queue: Arc<Mutex<SalvageQueue>>,
}

impl InMemorySalvageRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SalvageRepository for InMemorySalvageRepository {
    async fn insert_if_absent(
        &self,
        entry: &NewSalvageEntry,
    ) -> Result<Option<SalvageEntry>, RepositoryError> {
        let mut queue = self.queue.lock();
        let duplicate = queue
            .entries
            .iter()
            .any(|e| e.agent_id == entry.agent_id && e.session_id == entry.session_id);
        if duplicate || queue.live_index(&entry.agent_id).is_some() {
            return Ok(None);
        }

        queue.last_id += 1;
        let created = SalvageEntry {
            id: queue.last_id,
            agent_id: entry.agent_id.clone(),
            session_id: entry.session_id.clone(),
            project: entry.project.clone(),
            context: entry.context.clone(),
            status: SalvageStatus::Queued,
            claimed_by: None,
            created_at: entry.created_at,
            updated_at: entry.created_at,
        };
        queue.entries.push(created.clone());
        Ok(Some(created))
    }

    async fn find_live(&self, agent_id: &AgentId) -> Result<Option<SalvageEntry>, RepositoryError> {
        let queue = self.queue.lock();
        Ok(queue.live_index(agent_id).map(|i| queue.entries[i].clone()))
    }

    async fn transition(
        &self,
        agent_id: &AgentId,
        transition: &SalvageTransition,
        claimer: Option<&AgentId>,
        now_ms: i64,
    ) -> Result<TransitionResult, RepositoryError> {
        let mut queue = self.queue.lock();
        let Some(index) = queue.live_index(agent_id) else {
            return Ok(TransitionResult::Missing);
        };

        let entry = &mut queue.entries[index];
        let claimer_ok = claimer.is_none_or(|c| entry.claimed_by.as_ref() == Some(c));
        if entry.status != transition.from_status() || !claimer_ok {
            return Ok(TransitionResult::WrongStatus(entry.clone()));
        }

        entry.status = transition.to_status();
        match transition {
            SalvageTransition::Claim { by } => entry.claimed_by = Some(by.clone()),
            SalvageTransition::Abandon => entry.claimed_by = None,
            SalvageTransition::Complete | SalvageTransition::Dismiss => {}
        }
        entry.updated_at = now_ms;
        Ok(TransitionResult::Applied(entry.clone()))
    }

    async fn list(
        &self,
        project: Option<&str>,
        include_terminal: bool,
    ) -> Result<Vec<SalvageEntry>, RepositoryError> {
        Ok(self
            .queue
            .lock()
            .entries
            .iter()
            .filter(|e| project.is_none_or(|p| e.project.as_deref() == Some(p)))
            .filter(|e| include_terminal || !e.status.is_terminal())
            .cloned()
            .collect())
    }
}
