// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Salvage queue entries: unfinished work left behind by a dead agent.
//!
//! ```text
//! queued --claim--> claimed --complete--> completed
//!   ^                  |
//!   +-----abandon------+
//! queued --dismiss--> dismissed
//! ```

use serde::{Deserialize, Serialize};

use crate::domain::agent::AgentId;
use crate::domain::session::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SalvageStatus {
    Queued,
    Claimed,
    Completed,
    Abandoned,
    Dismissed,
}

impl SalvageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SalvageStatus::Queued => "queued",
            SalvageStatus::Claimed => "claimed",
            SalvageStatus::Completed => "completed",
            SalvageStatus::Abandoned => "abandoned",
            SalvageStatus::Dismissed => "dismissed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(SalvageStatus::Queued),
            "claimed" => Some(SalvageStatus::Claimed),
            "completed" => Some(SalvageStatus::Completed),
            "abandoned" => Some(SalvageStatus::Abandoned),
            "dismissed" => Some(SalvageStatus::Dismissed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, SalvageStatus::Queued | SalvageStatus::Claimed)
    }
}

/// Session state captured when the agent was first observed dead.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SalvageContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
    #[serde(default)]
    pub notes: Vec<String>,
    #[serde(default)]
    pub claimed_files: Vec<String>,
}

impl From<&Session> for SalvageContext {
    fn from(session: &Session) -> Self {
        Self {
            purpose: session.purpose.clone(),
            notes: session.notes.clone(),
            claimed_files: session.claimed_files.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalvageEntry {
    pub id: i64,
    pub agent_id: AgentId,
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    pub context: SalvageContext,
    pub status: SalvageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claimed_by: Option<AgentId>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// An entry to be inserted if none exists yet for `(agent_id, session_id)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSalvageEntry {
    pub agent_id: AgentId,
    pub session_id: String,
    pub project: Option<String>,
    pub context: SalvageContext,
    pub created_at: i64,
}

impl NewSalvageEntry {
    pub fn from_session(session: &Session, now_ms: i64) -> Self {
        Self {
            agent_id: session.agent_id.clone(),
            session_id: session.id.clone(),
            project: session.project.clone(),
            context: SalvageContext::from(session),
            created_at: now_ms,
        }
    }
}

/// Transitions the store applies atomically, each conditioned on the
/// entry's current status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SalvageTransition {
    /// queued -> claimed
    Claim { by: AgentId },
    /// claimed -> completed
    Complete,
    /// claimed -> queued
    Abandon,
    /// queued -> dismissed
    Dismiss,
}

impl SalvageTransition {
    pub fn from_status(&self) -> SalvageStatus {
        match self {
            SalvageTransition::Claim { .. } | SalvageTransition::Dismiss => SalvageStatus::Queued,
            SalvageTransition::Complete | SalvageTransition::Abandon => SalvageStatus::Claimed,
        }
    }

    pub fn to_status(&self) -> SalvageStatus {
        match self {
            SalvageTransition::Claim { .. } => SalvageStatus::Claimed,
            SalvageTransition::Complete => SalvageStatus::Completed,
            SalvageTransition::Abandon => SalvageStatus::Queued,
            SalvageTransition::Dismiss => SalvageStatus::Dismissed,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SalvageTransition::Claim { .. } => "claim",
            SalvageTransition::Complete => "complete",
            SalvageTransition::Abandon => "abandon",
            SalvageTransition::Dismiss => "dismiss",
        }
    }
}

/// Result of a conditional transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionResult {
    Applied(SalvageEntry),
    /// The live entry exists but is in a different status.
    WrongStatus(SalvageEntry),
    Missing,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(!SalvageStatus::Queued.is_terminal());
        assert!(!SalvageStatus::Claimed.is_terminal());
        assert!(SalvageStatus::Completed.is_terminal());
        assert!(SalvageStatus::Dismissed.is_terminal());
    }

    #[test]
    fn test_transition_table() {
        let claim = SalvageTransition::Claim {
            by: AgentId::parse("b").unwrap(),
        };
        assert_eq!(claim.from_status(), SalvageStatus::Queued);
        assert_eq!(claim.to_status(), SalvageStatus::Claimed);
        assert_eq!(SalvageTransition::Abandon.to_status(), SalvageStatus::Queued);
        assert_eq!(SalvageTransition::Dismiss.from_status(), SalvageStatus::Queued);
        assert_eq!(SalvageTransition::Complete.from_status(), SalvageStatus::Claimed);
    }
}
