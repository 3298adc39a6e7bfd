// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

const MAX_AGENT_ID_LEN: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AgentIdError {
    #[error("agent id must not be empty")]
    Empty,

    #[error("agent id is longer than 128 characters")]
    TooLong,

    #[error("agent id may only contain [A-Za-z0-9._:@-]")]
    InvalidCharacters,
}

/// Client-chosen agent identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AgentId(String);

impl AgentId {
    pub fn parse(raw: &str) -> Result<Self, AgentIdError> {
        let id = raw.trim();
        if id.is_empty() {
            return Err(AgentIdError::Empty);
        }
        if id.len() > MAX_AGENT_ID_LEN {
            return Err(AgentIdError::TooLong);
        }
        let ok = id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | ':' | '@' | '-'));
        if !ok {
            return Err(AgentIdError::InvalidCharacters);
        }
        Ok(Self(id.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for AgentId {
    type Error = AgentIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<AgentId> for String {
    fn from(value: AgentId) -> Self {
        value.0
    }
}

/// Registered agent. Liveness is never stored; see [`Liveness::evaluate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub agent_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    pub registered_at: i64,
    pub last_heartbeat: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_services: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_locks: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Liveness {
    Active,
    Stale,
    Dead,
}

/// Elapsed-time thresholds separating the liveness bands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivenessThresholds {
    pub stale_after_ms: i64,
    pub dead_after_ms: i64,
}

impl Default for LivenessThresholds {
    fn default() -> Self {
        Self {
            stale_after_ms: 10 * 60 * 1000,
            dead_after_ms: 20 * 60 * 1000,
        }
    }
}

impl Liveness {
    /// Pure function of `(now, last_heartbeat)`.
    pub fn evaluate(now_ms: i64, last_heartbeat: i64, thresholds: LivenessThresholds) -> Self {
        let elapsed = now_ms.saturating_sub(last_heartbeat).max(0);
        if elapsed < thresholds.stale_after_ms {
            Liveness::Active
        } else if elapsed < thresholds.dead_after_ms {
            Liveness::Stale
        } else {
            Liveness::Dead
        }
    }
}

/// Agent together with the liveness derived at read time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentView {
    #[serde(flatten)]
    pub agent: Agent,
    pub liveness: Liveness,
    pub idle_ms: i64,
}

impl AgentView {
    pub fn at(agent: Agent, now_ms: i64, thresholds: LivenessThresholds) -> Self {
        let liveness = Liveness::evaluate(now_ms, agent.last_heartbeat, thresholds);
        let idle_ms = now_ms.saturating_sub(agent.last_heartbeat).max(0);
        Self {
            agent,
            liveness,
            idle_ms,
        }
    }
}
