// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;

use crate::domain::agent::{Agent, AgentId};
use crate::domain::repository::{AgentRepository, RepositoryError};

use super::{decode_json, encode_json};

const AGENT_COLUMNS: &str = "id, name, agent_type, purpose, project, registered_at, \
     last_heartbeat, max_services, max_locks, metadata";

pub struct SqliteAgentRepository {
    pool: SqlitePool,
}

impl SqliteAgentRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

pub(super) fn parse_agent_id(raw: &str) -> Result<AgentId, RepositoryError> {
    AgentId::parse(raw)
        .map_err(|e| RepositoryError::Serialization(format!("agent id '{}': {}", raw, e)))
}

fn row_to_agent(row: &SqliteRow) -> Result<Agent, RepositoryError> {
    let id: String = row.get("id");
    let max_services: Option<i64> = row.get("max_services");
    let max_locks: Option<i64> = row.get("max_locks");

    Ok(Agent {
        id: parse_agent_id(&id)?,
        name: row.get("name"),
        agent_type: row.get("agent_type"),
        purpose: row.get("purpose"),
        project: row.get("project"),
        registered_at: row.get("registered_at"),
        last_heartbeat: row.get("last_heartbeat"),
        max_services: max_services.and_then(|v| u32::try_from(v).ok()),
        max_locks: max_locks.and_then(|v| u32::try_from(v).ok()),
        metadata: decode_json(row.get("metadata"))?,
    })
}

#[async_trait]
impl AgentRepository for SqliteAgentRepository {
    async fn upsert(&self, agent: &Agent) -> Result<Agent, RepositoryError> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO agents (
                id, name, agent_type, purpose, project, registered_at,
                last_heartbeat, max_services, max_locks, metadata
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (id) DO UPDATE SET
                name = excluded.name,
                agent_type = excluded.agent_type,
                purpose = excluded.purpose,
                project = excluded.project,
                last_heartbeat = excluded.last_heartbeat,
                max_services = excluded.max_services,
                max_locks = excluded.max_locks,
                metadata = excluded.metadata
            RETURNING {}
            "#,
            AGENT_COLUMNS
        ))
        .bind(agent.id.as_str())
        .bind(&agent.name)
        .bind(&agent.agent_type)
        .bind(&agent.purpose)
        .bind(&agent.project)
        .bind(agent.registered_at)
        .bind(agent.last_heartbeat)
        .bind(agent.max_services.map(i64::from))
        .bind(agent.max_locks.map(i64::from))
        .bind(encode_json(&agent.metadata)?)
        .fetch_one(&self.pool)
        .await?;

        row_to_agent(&row)
    }

    async fn find_by_id(&self, id: &AgentId) -> Result<Option<Agent>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {} FROM agents WHERE id = ?", AGENT_COLUMNS))
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_agent).transpose()
    }

    async fn touch(&self, id: &AgentId, now_ms: i64) -> Result<Option<Agent>, RepositoryError> {
        let row = sqlx::query(&format!(
            "UPDATE agents SET last_heartbeat = ? WHERE id = ? RETURNING {}",
            AGENT_COLUMNS
        ))
        .bind(now_ms)
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_agent).transpose()
    }

    async fn list_all(&self) -> Result<Vec<Agent>, RepositoryError> {
        let rows = sqlx::query(&format!("SELECT {} FROM agents ORDER BY id", AGENT_COLUMNS))
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_agent).collect()
    }

    async fn list_silent_since(&self, cutoff_ms: i64) -> Result<Vec<Agent>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM agents WHERE last_heartbeat <= ? ORDER BY last_heartbeat",
            AGENT_COLUMNS
        ))
        .bind(cutoff_ms)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_agent).collect()
    }

    async fn delete(&self, id: &AgentId) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM agents WHERE id = ?")
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
