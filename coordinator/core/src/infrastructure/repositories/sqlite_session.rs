// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use sqlx::sqlite::SqlitePool;
use sqlx::Row;

use crate::domain::agent::AgentId;
use crate::domain::repository::{RepositoryError, SessionRepository};
use crate::domain::session::Session;

pub struct SqliteSessionRepository {
    pool: SqlitePool,
}

impl SqliteSessionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionRepository for SqliteSessionRepository {
    async fn save(&self, session: &Session) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO sessions (id, agent_id, project, purpose, active, started_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (id) DO UPDATE SET
                agent_id = excluded.agent_id,
                project = excluded.project,
                purpose = excluded.purpose,
                active = excluded.active,
                started_at = excluded.started_at
            "#,
        )
        .bind(&session.id)
        .bind(session.agent_id.as_str())
        .bind(&session.project)
        .bind(&session.purpose)
        .bind(session.active)
        .bind(session.started_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM session_notes WHERE session_id = ?")
            .bind(&session.id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM session_files WHERE session_id = ?")
            .bind(&session.id)
            .execute(&mut *tx)
            .await?;

        for note in &session.notes {
            sqlx::query("INSERT INTO session_notes (session_id, content) VALUES (?, ?)")
                .bind(&session.id)
                .bind(note)
                .execute(&mut *tx)
                .await?;
        }
        for path in &session.claimed_files {
            sqlx::query("INSERT OR IGNORE INTO session_files (session_id, path) VALUES (?, ?)")
                .bind(&session.id)
                .bind(path)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn active_for_agent(&self, agent_id: &AgentId) -> Result<Vec<Session>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT id, project, purpose, started_at FROM sessions
            WHERE agent_id = ? AND active = 1
            ORDER BY started_at DESC, rowid DESC
            "#,
        )
        .bind(agent_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut sessions = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.get("id");

            let notes = sqlx::query("SELECT content FROM session_notes WHERE session_id = ? ORDER BY id")
                .bind(&id)
                .fetch_all(&self.pool)
                .await?
                .iter()
                .map(|r| r.get::<String, _>("content"))
                .collect();

            let claimed_files = sqlx::query("SELECT path FROM session_files WHERE session_id = ? ORDER BY path")
                .bind(&id)
                .fetch_all(&self.pool)
                .await?
                .iter()
                .map(|r| r.get::<String, _>("path"))
                .collect();

            sessions.push(Session {
                id,
                agent_id: agent_id.clone(),
                project: row.get("project"),
                purpose: row.get("purpose"),
                notes,
                claimed_files,
                active: true,
                started_at: row.get("started_at"),
            });
        }

        Ok(sessions)
    }
}
