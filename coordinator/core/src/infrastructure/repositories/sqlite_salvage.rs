// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # SQLite Salvage Repository
//!
//! Two indexes carry the queue's guarantees:
//! - `UNIQUE (agent_id, session_id)`: a session is materialized at most once
//! - partial unique index on `agent_id` for live rows: one queued/claimed
//!   entry per dead agent
//!
//! Every transition is an `UPDATE ... WHERE status = <expected>`, so of two
//! racing claimers exactly one sees a row come back.

use async_trait::async_trait;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;

use crate::domain::agent::AgentId;
use crate::domain::repository::{RepositoryError, SalvageRepository};
use crate::domain::salvage::{
    NewSalvageEntry, SalvageContext, SalvageEntry, SalvageStatus, SalvageTransition,
    TransitionResult,
};

use super::sqlite_agent::parse_agent_id;

const SALVAGE_COLUMNS: &str = "id, agent_id, session_id, project, purpose, notes, claimed_files, \
     status, claimed_by, created_at, updated_at";

pub struct SqliteSalvageRepository {
    pool: SqlitePool,
}

impl SqliteSalvageRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn row_to_entry(row: &SqliteRow) -> Result<SalvageEntry, RepositoryError> {
    let agent_id: String = row.get("agent_id");
    let status: String = row.get("status");
    let claimed_by: Option<String> = row.get("claimed_by");
    let notes: String = row.get("notes");
    let claimed_files: String = row.get("claimed_files");

    Ok(SalvageEntry {
        id: row.get("id"),
        agent_id: parse_agent_id(&agent_id)?,
        session_id: row.get("session_id"),
        project: row.get("project"),
        context: SalvageContext {
            purpose: row.get("purpose"),
            notes: serde_json::from_str(&notes)?,
            claimed_files: serde_json::from_str(&claimed_files)?,
        },
        status: SalvageStatus::parse(&status).ok_or_else(|| {
            RepositoryError::Serialization(format!("unknown salvage status '{}'", status))
        })?,
        claimed_by: claimed_by.as_deref().map(parse_agent_id).transpose()?,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[async_trait]
impl SalvageRepository for SqliteSalvageRepository {
    async fn insert_if_absent(
        &self,
        entry: &NewSalvageEntry,
    ) -> Result<Option<SalvageEntry>, RepositoryError> {
        let row = sqlx::query(&format!(
            r#"
            INSERT OR IGNORE INTO salvage_entries (
                agent_id, session_id, project, purpose, notes, claimed_files,
                status, created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'queued', ?7, ?7)
            RETURNING {}
            "#,
            SALVAGE_COLUMNS
        ))
        .bind(entry.agent_id.as_str())
        .bind(&entry.session_id)
        .bind(&entry.project)
        .bind(&entry.context.purpose)
        .bind(serde_json::to_string(&entry.context.notes)?)
        .bind(serde_json::to_string(&entry.context.claimed_files)?)
        .bind(entry.created_at)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_entry).transpose()
    }

    async fn find_live(&self, agent_id: &AgentId) -> Result<Option<SalvageEntry>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM salvage_entries WHERE agent_id = ? AND status IN ('queued', 'claimed')",
            SALVAGE_COLUMNS
        ))
        .bind(agent_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_entry).transpose()
    }

    async fn transition(
        &self,
        agent_id: &AgentId,
        transition: &SalvageTransition,
        claimer: Option<&AgentId>,
        now_ms: i64,
    ) -> Result<TransitionResult, RepositoryError> {
        // (overwrite claimed_by?, new value)
        let (set_claimer, new_claimer) = match transition {
            SalvageTransition::Claim { by } => (true, Some(by.as_str())),
            SalvageTransition::Abandon => (true, None),
            SalvageTransition::Complete | SalvageTransition::Dismiss => (false, None),
        };

        let row = sqlx::query(&format!(
            r#"
            UPDATE salvage_entries SET
                status = ?1,
                claimed_by = CASE WHEN ?2 THEN ?3 ELSE claimed_by END,
                updated_at = ?4
            WHERE agent_id = ?5 AND status = ?6 AND (?7 IS NULL OR claimed_by = ?7)
            RETURNING {}
            "#,
            SALVAGE_COLUMNS
        ))
        .bind(transition.to_status().as_str())
        .bind(set_claimer)
        .bind(new_claimer)
        .bind(now_ms)
        .bind(agent_id.as_str())
        .bind(transition.from_status().as_str())
        .bind(claimer.map(|c| c.as_str()))
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            return Ok(TransitionResult::Applied(row_to_entry(&row)?));
        }

        Ok(match self.find_live(agent_id).await? {
            Some(entry) => TransitionResult::WrongStatus(entry),
            None => TransitionResult::Missing,
        })
    }

    async fn list(
        &self,
        project: Option<&str>,
        include_terminal: bool,
    ) -> Result<Vec<SalvageEntry>, RepositoryError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM salvage_entries
            WHERE (?1 IS NULL OR project = ?1)
              AND (?2 OR status IN ('queued', 'claimed'))
            ORDER BY created_at, id
            "#,
            SALVAGE_COLUMNS
        ))
        .bind(project)
        .bind(include_terminal)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_entry).collect()
    }
}
