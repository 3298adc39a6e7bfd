// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use serde::{Deserialize, Serialize};

use crate::domain::agent::AgentId;
use crate::domain::identity::ServiceIdentity;

/// State transitions announced to in-process observers (webhook dispatch,
/// log tailing). Emission is fire-and-forget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CoordinationEvent {
    ServiceClaimed {
        id: ServiceIdentity,
        port: u16,
        at: i64,
    },
    ServiceReleased {
        id: ServiceIdentity,
        port: u16,
        at: i64,
    },
    ServiceExpired {
        id: ServiceIdentity,
        port: u16,
        at: i64,
    },
    LockAcquired {
        name: String,
        owner: String,
        expires_at: i64,
        at: i64,
    },
    LockReleased {
        name: String,
        owner: String,
        forced: bool,
        at: i64,
    },
    LockExtended {
        name: String,
        owner: String,
        expires_at: i64,
        at: i64,
    },
    AgentRegistered {
        agent_id: AgentId,
        at: i64,
    },
    AgentUnregistered {
        agent_id: AgentId,
        at: i64,
    },
    AgentRevived {
        agent_id: AgentId,
        silent_ms: i64,
        at: i64,
    },
    SalvageQueued {
        agent_id: AgentId,
        session_id: String,
        at: i64,
    },
    SalvageClaimed {
        agent_id: AgentId,
        claimed_by: AgentId,
        at: i64,
    },
    SalvageCompleted {
        agent_id: AgentId,
        at: i64,
    },
    SalvageAbandoned {
        agent_id: AgentId,
        at: i64,
    },
    SalvageDismissed {
        agent_id: AgentId,
        at: i64,
    },
}

impl CoordinationEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            CoordinationEvent::ServiceClaimed { .. } => "service_claimed",
            CoordinationEvent::ServiceReleased { .. } => "service_released",
            CoordinationEvent::ServiceExpired { .. } => "service_expired",
            CoordinationEvent::LockAcquired { .. } => "lock_acquired",
            CoordinationEvent::LockReleased { .. } => "lock_released",
            CoordinationEvent::LockExtended { .. } => "lock_extended",
            CoordinationEvent::AgentRegistered { .. } => "agent_registered",
            CoordinationEvent::AgentUnregistered { .. } => "agent_unregistered",
            CoordinationEvent::AgentRevived { .. } => "agent_revived",
            CoordinationEvent::SalvageQueued { .. } => "salvage_queued",
            CoordinationEvent::SalvageClaimed { .. } => "salvage_claimed",
            CoordinationEvent::SalvageCompleted { .. } => "salvage_completed",
            CoordinationEvent::SalvageAbandoned { .. } => "salvage_abandoned",
            CoordinationEvent::SalvageDismissed { .. } => "salvage_dismissed",
        }
    }
}
