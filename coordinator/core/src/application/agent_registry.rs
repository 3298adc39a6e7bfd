// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Agent Registry & Salvage
//!
//! Liveness is derived at read time from `last_heartbeat`; nothing here ever
//! stores it. The only persistent side effect of an agent going dead is the
//! salvage entry, materialised the first time the death is observed (by a
//! read, a heartbeat, a salvage call or the sweeper). The store's unique
//! indexes make that materialisation exactly-once no matter how many
//! observers race.
//!
//! Salvage lifecycle, each step a conditional update in the store:
//!
//! ```text
//! queued --claim--> claimed --complete--> completed
//!   |                  |
//!   |                  +--abandon--> queued
//!   +--dismiss--> dismissed
//! ```

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::application::error::{CoordinationError, CoordinationResult};
use crate::domain::agent::{Agent, AgentId, AgentView, Liveness, LivenessThresholds};
use crate::domain::clock::Clock;
use crate::domain::events::CoordinationEvent;
use crate::domain::repository::{AgentRepository, SalvageRepository, SessionRepository};
use crate::domain::salvage::{
    NewSalvageEntry, SalvageEntry, SalvageStatus, SalvageTransition, TransitionResult,
};
use crate::infrastructure::event_bus::EventBus;

/// Registration payload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegisterAgent {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "type")]
    pub agent_type: Option<String>,
    #[serde(default)]
    pub purpose: Option<String>,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub max_services: Option<u32>,
    #[serde(default)]
    pub max_locks: Option<u32>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

pub struct AgentRegistry {
    agents: Arc<dyn AgentRepository>,
    sessions: Arc<dyn SessionRepository>,
    salvage: Arc<dyn SalvageRepository>,
    clock: Arc<dyn Clock>,
    events: EventBus,
    thresholds: LivenessThresholds,
}

impl AgentRegistry {
    pub fn new(
        agents: Arc<dyn AgentRepository>,
        sessions: Arc<dyn SessionRepository>,
        salvage: Arc<dyn SalvageRepository>,
        clock: Arc<dyn Clock>,
        events: EventBus,
        thresholds: LivenessThresholds,
    ) -> Self {
        Self {
            agents,
            sessions,
            salvage,
            clock,
            events,
            thresholds,
        }
    }

    pub fn thresholds(&self) -> LivenessThresholds {
        self.thresholds
    }

    /// Create or reactivate an agent. Caps are recorded, not enforced.
    pub async fn register(&self, request: RegisterAgent) -> CoordinationResult<AgentView> {
        let id = agent_id("id", &request.id)?;
        let now = self.clock.now_ms();

        // Re-registering after a crash must not swallow the dead session.
        if let Some(previous) = self.agents.find_by_id(&id).await? {
            self.salvage_if_dead(&previous, now).await?;
        }

        let agent = self
            .agents
            .upsert(&Agent {
                id: id.clone(),
                name: non_blank(request.name),
                agent_type: non_blank(request.agent_type),
                purpose: non_blank(request.purpose),
                project: non_blank(request.project),
                registered_at: now,
                last_heartbeat: now,
                max_services: request.max_services,
                max_locks: request.max_locks,
                metadata: request.metadata,
            })
            .await?;

        info!(agent_id = %id, "Agent registered");
        self.events.publish(CoordinationEvent::AgentRegistered {
            agent_id: id,
            at: now,
        });

        Ok(AgentView::at(agent, now, self.thresholds))
    }

    pub async fn heartbeat(&self, id: &str) -> CoordinationResult<AgentView> {
        let id = agent_id("id", id)?;
        let now = self.clock.now_ms();

        // A heartbeat from an agent already past the dead threshold is still
        // the first observation of that death.
        let previous = self.agents.find_by_id(&id).await?;
        let revived = match &previous {
            Some(agent) => self.salvage_if_dead(agent, now).await?,
            None => false,
        };

        let agent = self
            .agents
            .touch(&id, now)
            .await?
            .ok_or_else(|| agent_not_found(&id))?;

        if let (true, Some(previous)) = (revived, previous) {
            info!(agent_id = %id, "Dead agent revived by heartbeat");
            self.events.publish(CoordinationEvent::AgentRevived {
                agent_id: id.clone(),
                silent_ms: now.saturating_sub(previous.last_heartbeat),
                at: now,
            });
        }

        debug!(agent_id = %id, "Heartbeat");
        Ok(AgentView::at(agent, now, self.thresholds))
    }

    /// Queue salvage for `agent` if it is dead at `now`. Returns whether it was.
    async fn salvage_if_dead(&self, agent: &Agent, now: i64) -> CoordinationResult<bool> {
        if Liveness::evaluate(now, agent.last_heartbeat, self.thresholds) != Liveness::Dead {
            return Ok(false);
        }
        self.materialize_salvage(&agent.id, now).await?;
        Ok(true)
    }

    pub async fn get(&self, id: &str) -> CoordinationResult<AgentView> {
        let id = agent_id("id", id)?;
        let now = self.clock.now_ms();
        let agent = self
            .agents
            .find_by_id(&id)
            .await?
            .ok_or_else(|| agent_not_found(&id))?;

        let view = AgentView::at(agent, now, self.thresholds);
        if view.liveness == Liveness::Dead {
            self.materialize_salvage(&id, now).await?;
        }
        Ok(view)
    }

    /// All agents, or only those not yet dead when `active_only`.
    pub async fn list(&self, active_only: bool) -> CoordinationResult<Vec<AgentView>> {
        let now = self.clock.now_ms();
        let mut views = Vec::new();

        for agent in self.agents.list_all().await? {
            let view = AgentView::at(agent, now, self.thresholds);
            if view.liveness == Liveness::Dead {
                self.materialize_salvage(&view.agent.id, now).await?;
                if active_only {
                    continue;
                }
            }
            views.push(view);
        }

        views.sort_by(|a, b| a.agent.id.cmp(&b.agent.id));
        Ok(views)
    }

    /// Graceful exit: the agent leaves liveness tracking and no salvage entry
    /// is produced for it.
    pub async fn unregister(&self, id: &str) -> CoordinationResult<()> {
        let id = agent_id("id", id)?;
        if !self.agents.delete(&id).await? {
            return Err(agent_not_found(&id));
        }

        info!(agent_id = %id, "Agent unregistered");
        self.events.publish(CoordinationEvent::AgentUnregistered {
            agent_id: id,
            at: self.clock.now_ms(),
        });
        Ok(())
    }

    /// Queue salvage for every agent currently past the dead threshold.
    /// Returns how many entries were created.
    pub async fn reconcile_dead_agents(&self, now_ms: i64) -> CoordinationResult<usize> {
        let cutoff = now_ms.saturating_sub(self.thresholds.dead_after_ms);
        let mut queued = 0;
        for agent in self.agents.list_silent_since(cutoff).await? {
            if self.materialize_salvage(&agent.id, now_ms).await?.is_some() {
                queued += 1;
            }
        }
        Ok(queued)
    }

    async fn materialize_salvage(
        &self,
        agent_id: &AgentId,
        now_ms: i64,
    ) -> CoordinationResult<Option<SalvageEntry>> {
        let sessions = self.sessions.active_for_agent(agent_id).await?;
        let Some(session) = sessions.iter().find(|s| s.has_unresolved_work()) else {
            return Ok(None);
        };

        let created = self
            .salvage
            .insert_if_absent(&NewSalvageEntry::from_session(session, now_ms))
            .await?;

        if let Some(entry) = &created {
            info!(
                agent_id = %agent_id,
                session_id = %entry.session_id,
                notes = entry.context.notes.len(),
                files = entry.context.claimed_files.len(),
                "Dead agent queued for salvage"
            );
            self.events.publish(CoordinationEvent::SalvageQueued {
                agent_id: agent_id.clone(),
                session_id: entry.session_id.clone(),
                at: now_ms,
            });
        }
        Ok(created)
    }

    /// Live salvage entries, optionally including terminal ones.
    pub async fn list_salvage(
        &self,
        project: Option<&str>,
        include_terminal: bool,
    ) -> CoordinationResult<Vec<SalvageEntry>> {
        self.reconcile_dead_agents(self.clock.now_ms()).await?;
        let project = project.map(str::trim).filter(|p| !p.is_empty());
        Ok(self.salvage.list(project, include_terminal).await?)
    }

    /// Hand a dead agent's captured context to `claimer`.
    pub async fn claim_salvage(&self, dead: &str, claimer: &str) -> CoordinationResult<SalvageEntry> {
        let dead = agent_id("dead_agent_id", dead)?;
        let claimer = agent_id("agent_id", claimer)?;
        if dead == claimer {
            return Err(CoordinationError::validation(
                "agent_id",
                "an agent cannot salvage itself",
            ));
        }

        self.observe(&dead).await?;
        self.apply(&dead, SalvageTransition::Claim { by: claimer }, None)
            .await
    }

    pub async fn complete_salvage(
        &self,
        dead: &str,
        claimer: Option<&str>,
    ) -> CoordinationResult<SalvageEntry> {
        let dead = agent_id("dead_agent_id", dead)?;
        let claimer = claimer.map(|c| agent_id("agent_id", c)).transpose()?;
        self.apply(&dead, SalvageTransition::Complete, claimer.as_ref())
            .await
    }

    /// Return a claimed entry to the queue.
    pub async fn abandon_salvage(
        &self,
        dead: &str,
        claimer: Option<&str>,
    ) -> CoordinationResult<SalvageEntry> {
        let dead = agent_id("dead_agent_id", dead)?;
        let claimer = claimer.map(|c| agent_id("agent_id", c)).transpose()?;
        self.apply(&dead, SalvageTransition::Abandon, claimer.as_ref())
            .await
    }

    pub async fn dismiss_salvage(&self, dead: &str) -> CoordinationResult<SalvageEntry> {
        let dead = agent_id("dead_agent_id", dead)?;
        self.observe(&dead).await?;
        self.apply(&dead, SalvageTransition::Dismiss, None).await
    }

    /// Materialise the entry for `dead` if it has just crossed the threshold.
    async fn observe(&self, dead: &AgentId) -> CoordinationResult<()> {
        let now = self.clock.now_ms();
        if let Some(agent) = self.agents.find_by_id(dead).await? {
            if Liveness::evaluate(now, agent.last_heartbeat, self.thresholds) == Liveness::Dead {
                self.materialize_salvage(dead, now).await?;
            }
        }
        Ok(())
    }

    async fn apply(
        &self,
        dead: &AgentId,
        transition: SalvageTransition,
        claimer: Option<&AgentId>,
    ) -> CoordinationResult<SalvageEntry> {
        let now = self.clock.now_ms();

        match self.salvage.transition(dead, &transition, claimer, now).await? {
            TransitionResult::Applied(entry) => {
                info!(
                    agent_id = %dead,
                    transition = transition.name(),
                    status = entry.status.as_str(),
                    "Salvage entry updated"
                );
                self.events.publish(salvage_event(&entry, &transition, now));
                Ok(entry)
            }
            TransitionResult::WrongStatus(entry) => Err(wrong_status(&entry, &transition, claimer)),
            TransitionResult::Missing => Err(CoordinationError::NotFound(format!(
                "no salvage entry for agent '{}'",
                dead
            ))),
        }
    }
}

fn salvage_event(entry: &SalvageEntry, transition: &SalvageTransition, at: i64) -> CoordinationEvent {
    let agent_id = entry.agent_id.clone();
    match transition {
        SalvageTransition::Claim { by } => CoordinationEvent::SalvageClaimed {
            agent_id,
            claimed_by: by.clone(),
            at,
        },
        SalvageTransition::Complete => CoordinationEvent::SalvageCompleted { agent_id, at },
        SalvageTransition::Abandon => CoordinationEvent::SalvageAbandoned { agent_id, at },
        SalvageTransition::Dismiss => CoordinationEvent::SalvageDismissed { agent_id, at },
    }
}

fn wrong_status(
    entry: &SalvageEntry,
    transition: &SalvageTransition,
    claimer: Option<&AgentId>,
) -> CoordinationError {
    // Right status, wrong claimer
    if entry.status == transition.from_status() {
        if let Some(claimer) = claimer {
            return CoordinationError::Forbidden(format!(
                "salvage for '{}' is claimed by '{}', not '{}'",
                entry.agent_id,
                entry.claimed_by.as_ref().map(AgentId::as_str).unwrap_or("nobody"),
                claimer
            ));
        }
    }

    match (&entry.status, &entry.claimed_by) {
        (SalvageStatus::Claimed, Some(by)) => CoordinationError::Conflict(format!(
            "salvage for '{}' is already claimed by '{}'",
            entry.agent_id, by
        )),
        (status, _) => CoordinationError::Conflict(format!(
            "cannot {} salvage for '{}' while it is {}",
            transition.name(),
            entry.agent_id,
            status.as_str()
        )),
    }
}

fn agent_id(field: &'static str, raw: &str) -> CoordinationResult<AgentId> {
    AgentId::parse(raw).map_err(|e| CoordinationError::validation(field, e))
}

fn agent_not_found(id: &AgentId) -> CoordinationError {
    CoordinationError::NotFound(format!("agent '{}' is not registered", id))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
