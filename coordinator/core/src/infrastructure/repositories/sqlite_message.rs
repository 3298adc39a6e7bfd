// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;

use crate::domain::message::{ChannelSummary, Message, NewMessage};
use crate::domain::repository::{MessageRepository, RepositoryError};

pub struct SqliteMessageRepository {
    pool: SqlitePool,
}

impl SqliteMessageRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn row_to_message(row: &SqliteRow) -> Result<Message, RepositoryError> {
    let payload: String = row.get("payload");
    Ok(Message {
        id: row.get("id"),
        channel: row.get("channel"),
        payload: serde_json::from_str(&payload)?,
        sender: row.get("sender"),
        created_at: row.get("created_at"),
        expires_at: row.get("expires_at"),
    })
}

#[async_trait]
impl MessageRepository for SqliteMessageRepository {
    async fn append(&self, message: &NewMessage) -> Result<Message, RepositoryError> {
        let payload = serde_json::to_string(&message.payload)?;

        let row = sqlx::query(
            r#"
            INSERT INTO messages (channel, payload, sender, created_at, expires_at)
            VALUES (?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(&message.channel)
        .bind(&payload)
        .bind(&message.sender)
        .bind(message.created_at)
        .bind(message.expires_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(Message {
            id: row.get("id"),
            channel: message.channel.clone(),
            payload: message.payload.clone(),
            sender: message.sender.clone(),
            created_at: message.created_at,
            expires_at: message.expires_at,
        })
    }

    async fn list(
        &self,
        channel: &str,
        after: Option<i64>,
        limit: u32,
        now_ms: i64,
    ) -> Result<Vec<Message>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT id, channel, payload, sender, created_at, expires_at
            FROM messages
            WHERE channel = ?1 AND id > ?2 AND (expires_at IS NULL OR expires_at > ?3)
            ORDER BY id ASC
            LIMIT ?4
            "#,
        )
        .bind(channel)
        .bind(after.unwrap_or(0))
        .bind(now_ms)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_message).collect()
    }

    async fn clear(&self, channel: &str) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM messages WHERE channel = ?")
            .bind(channel)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn channels(&self, now_ms: i64) -> Result<Vec<ChannelSummary>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT channel, COUNT(*) AS count, MAX(id) AS last_id
            FROM messages
            WHERE expires_at IS NULL OR expires_at > ?
            GROUP BY channel
            ORDER BY channel
            "#,
        )
        .bind(now_ms)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| ChannelSummary {
                channel: row.get("channel"),
                count: row.get::<i64, _>("count").max(0) as u64,
                last_id: row.get("last_id"),
            })
            .collect())
    }

    async fn delete_expired(&self, now_ms: i64) -> Result<u64, RepositoryError> {
        let result =
            sqlx::query("DELETE FROM messages WHERE expires_at IS NOT NULL AND expires_at <= ?")
                .bind(now_ms)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }
}
