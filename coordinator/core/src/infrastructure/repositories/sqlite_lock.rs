// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # SQLite Lock Repository
//!
//! Acquire is a single conditional upsert: the `DO UPDATE ... WHERE` clause
//! only lets the write through when the current row is expired or already
//! belongs to the caller, so two owners racing for the same name can never
//! both succeed.

use async_trait::async_trait;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use tracing::debug;

use crate::domain::lock::{AcquireResult, Lock, OwnedUpdate};
use crate::domain::repository::{LockRepository, RepositoryError};

use super::{decode_json, encode_json};

/// A holder seen by the upsert can vanish before we read it back.
const ACQUIRE_ATTEMPTS: usize = 3;

pub struct SqliteLockRepository {
    pool: SqlitePool,
}

impl SqliteLockRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn row_to_lock(row: &SqliteRow) -> Result<Lock, RepositoryError> {
    Ok(Lock {
        name: row.get("name"),
        owner: row.get("owner"),
        acquired_at: row.get("acquired_at"),
        expires_at: row.get("expires_at"),
        metadata: decode_json(row.get("metadata"))?,
    })
}

#[async_trait]
impl LockRepository for SqliteLockRepository {
    async fn acquire(&self, lock: &Lock, now_ms: i64) -> Result<AcquireResult, RepositoryError> {
        let metadata = encode_json(&lock.metadata)?;

        for attempt in 1..=ACQUIRE_ATTEMPTS {
            let row = sqlx::query(
                r#"
                INSERT INTO locks (name, owner, acquired_at, expires_at, metadata)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT (name) DO UPDATE SET
                    owner = excluded.owner,
                    acquired_at = CASE
                        WHEN locks.owner = excluded.owner AND locks.expires_at > ?6
                        THEN locks.acquired_at ELSE excluded.acquired_at END,
                    expires_at = excluded.expires_at,
                    metadata = CASE
                        WHEN locks.owner = excluded.owner AND locks.expires_at > ?6
                        THEN COALESCE(excluded.metadata, locks.metadata) ELSE excluded.metadata END
                WHERE locks.owner = excluded.owner OR locks.expires_at <= ?6
                RETURNING name, owner, acquired_at, expires_at, metadata
                "#,
            )
            .bind(&lock.name)
            .bind(&lock.owner)
            .bind(lock.acquired_at)
            .bind(lock.expires_at)
            .bind(&metadata)
            .bind(now_ms)
            .fetch_optional(&self.pool)
            .await?;

            if let Some(row) = row {
                return Ok(AcquireResult::Acquired(row_to_lock(&row)?));
            }

            if let Some(holder) = self.get(&lock.name, now_ms).await? {
                return Ok(AcquireResult::Held(holder));
            }

            debug!(lock = %lock.name, attempt, "Lock holder vanished during acquire, retrying");
        }

        Err(RepositoryError::Database(format!(
            "lock '{}' acquire did not settle after {} attempts",
            lock.name, ACQUIRE_ATTEMPTS
        )))
    }

    async fn get(&self, name: &str, now_ms: i64) -> Result<Option<Lock>, RepositoryError> {
        let row = sqlx::query(
            "SELECT name, owner, acquired_at, expires_at, metadata FROM locks WHERE name = ? AND expires_at > ?",
        )
        .bind(name)
        .bind(now_ms)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_lock).transpose()
    }

    async fn release(
        &self,
        name: &str,
        owner: Option<&str>,
        now_ms: i64,
    ) -> Result<OwnedUpdate, RepositoryError> {
        let row = sqlx::query(
            r#"
            DELETE FROM locks
            WHERE name = ?1 AND expires_at > ?2 AND (?3 IS NULL OR owner = ?3)
            RETURNING name, owner, acquired_at, expires_at, metadata
            "#,
        )
        .bind(name)
        .bind(now_ms)
        .bind(owner)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            return Ok(OwnedUpdate::Applied(row_to_lock(&row)?));
        }

        Ok(match self.get(name, now_ms).await? {
            Some(holder) => OwnedUpdate::NotOwner(holder),
            None => OwnedUpdate::Missing,
        })
    }

    async fn extend(
        &self,
        name: &str,
        owner: &str,
        expires_at: i64,
        now_ms: i64,
    ) -> Result<OwnedUpdate, RepositoryError> {
        let row = sqlx::query(
            r#"
            UPDATE locks SET expires_at = ?4
            WHERE name = ?1 AND owner = ?2 AND expires_at > ?3
            RETURNING name, owner, acquired_at, expires_at, metadata
            "#,
        )
        .bind(name)
        .bind(owner)
        .bind(now_ms)
        .bind(expires_at)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            return Ok(OwnedUpdate::Applied(row_to_lock(&row)?));
        }

        Ok(match self.get(name, now_ms).await? {
            Some(holder) => OwnedUpdate::NotOwner(holder),
            None => OwnedUpdate::Missing,
        })
    }

    async fn list(&self, owner: Option<&str>, now_ms: i64) -> Result<Vec<Lock>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT name, owner, acquired_at, expires_at, metadata FROM locks
            WHERE expires_at > ?1 AND (?2 IS NULL OR owner = ?2)
            ORDER BY name
            "#,
        )
        .bind(now_ms)
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_lock).collect()
    }

    async fn delete_expired(&self, now_ms: i64) -> Result<Vec<Lock>, RepositoryError> {
        let rows = sqlx::query(
            "DELETE FROM locks WHERE expires_at <= ? RETURNING name, owner, acquired_at, expires_at, metadata",
        )
        .bind(now_ms)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_lock).collect()
    }
}
