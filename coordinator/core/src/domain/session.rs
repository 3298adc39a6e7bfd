// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Work sessions recorded by agents (purpose, running notes, advisory file
//! claims). The session subsystem owns writes; salvage only reads them.

use serde::{Deserialize, Serialize};

use crate::domain::agent::AgentId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub agent_id: AgentId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
    #[serde(default)]
    pub notes: Vec<String>,
    #[serde(default)]
    pub claimed_files: Vec<String>,
    pub active: bool,
    #[serde(default)]
    pub started_at: i64,
}

impl Session {
    /// Active with notes or file claims still outstanding.
    pub fn has_unresolved_work(&self) -> bool {
        self.active && (!self.notes.is_empty() || !self.claimed_files.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(notes: &[&str], files: &[&str], active: bool) -> Session {
        Session {
            id: "s1".to_string(),
            agent_id: AgentId::parse("a1").unwrap(),
            project: None,
            purpose: None,
            notes: notes.iter().map(|s| s.to_string()).collect(),
            claimed_files: files.iter().map(|s| s.to_string()).collect(),
            active,
            started_at: 0,
        }
    }

    #[test]
    fn test_unresolved_work() {
        assert!(session(&["half done"], &[], true).has_unresolved_work());
        assert!(session(&[], &["src/lib.rs"], true).has_unresolved_work());
        assert!(!session(&[], &[], true).has_unresolved_work());
        assert!(!session(&["note"], &["f"], false).has_unresolved_work());
    }
}
