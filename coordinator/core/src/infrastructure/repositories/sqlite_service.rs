// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # SQLite Service Repository
//!
//! `ServiceRepository` backed by the `services` and `endpoints` tables. The
//! unique index on `services.port` and the primary key on `services.id` are
//! the insert-or-fail primitive port assignment relies on.

use async_trait::async_trait;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;

use crate::domain::identity::ServiceIdentity;
use crate::domain::repository::{RepositoryError, ServiceRepository};
use crate::domain::service::{Endpoint, RestartPolicy, Service, ServiceStatus};

use super::{decode_json, encode_json};

const SERVICE_COLUMNS: &str = "id, port, pid, cmd, cwd, status, created_at, last_seen, \
     expires_at, restart_policy, paired_with, metadata";

pub struct SqliteServiceRepository {
    pool: SqlitePool,
}

impl SqliteServiceRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn row_to_service(row: &SqliteRow) -> Result<Service, RepositoryError> {
    let id: String = row.get("id");
    let port: i64 = row.get("port");
    let pid: Option<i64> = row.get("pid");
    let status: String = row.get("status");
    let restart_policy: String = row.get("restart_policy");
    let paired_with: Option<String> = row.get("paired_with");
    let metadata: Option<String> = row.get("metadata");

    Ok(Service {
        id: ServiceIdentity::parse(&id)
            .map_err(|e| RepositoryError::Serialization(format!("service id '{}': {}", id, e)))?,
        port: u16::try_from(port)
            .map_err(|_| RepositoryError::Serialization(format!("port {} out of range", port)))?,
        pid: pid.and_then(|p| u32::try_from(p).ok()),
        cmd: row.get("cmd"),
        cwd: row.get("cwd"),
        status: ServiceStatus::parse(&status).ok_or_else(|| {
            RepositoryError::Serialization(format!("unknown service status '{}'", status))
        })?,
        created_at: row.get("created_at"),
        last_seen: row.get("last_seen"),
        expires_at: row.get("expires_at"),
        restart_policy: RestartPolicy::parse(&restart_policy).unwrap_or_default(),
        paired_with: paired_with.and_then(|p| ServiceIdentity::parse(&p).ok()),
        metadata: decode_json(metadata)?,
    })
}

#[async_trait]
impl ServiceRepository for SqliteServiceRepository {
    async fn insert(&self, service: &Service) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO services (
                id, port, pid, cmd, cwd, status, created_at, last_seen,
                expires_at, restart_policy, paired_with, metadata
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(service.id.as_str())
        .bind(i64::from(service.port))
        .bind(service.pid.map(i64::from))
        .bind(&service.cmd)
        .bind(&service.cwd)
        .bind(service.status.as_str())
        .bind(service.created_at)
        .bind(service.last_seen)
        .bind(service.expires_at)
        .bind(service.restart_policy.as_str())
        .bind(service.paired_with.as_ref().map(|p| p.as_str()))
        .bind(encode_json(&service.metadata)?)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_id(&self, id: &ServiceIdentity) -> Result<Option<Service>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {} FROM services WHERE id = ?", SERVICE_COLUMNS))
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_service).transpose()
    }

    async fn find_by_port(&self, port: u16) -> Result<Option<Service>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {} FROM services WHERE port = ?", SERVICE_COLUMNS))
            .bind(i64::from(port))
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_service).transpose()
    }

    async fn list_all(&self) -> Result<Vec<Service>, RepositoryError> {
        let rows = sqlx::query(&format!("SELECT {} FROM services ORDER BY id", SERVICE_COLUMNS))
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_service).collect()
    }

    async fn ports_in_use(&self) -> Result<Vec<u16>, RepositoryError> {
        let rows = sqlx::query("SELECT port FROM services")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .iter()
            .filter_map(|row| u16::try_from(row.get::<i64, _>("port")).ok())
            .collect())
    }

    async fn delete_many(&self, ids: &[ServiceIdentity]) -> Result<Vec<Service>, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let mut deleted = Vec::with_capacity(ids.len());

        for id in ids {
            let row = sqlx::query(&format!(
                "DELETE FROM services WHERE id = ? RETURNING {}",
                SERVICE_COLUMNS
            ))
            .bind(id.as_str())
            .fetch_optional(&mut *tx)
            .await?;

            if let Some(row) = row {
                deleted.push(row_to_service(&row)?);
            }
        }

        tx.commit().await?;
        Ok(deleted)
    }

    async fn delete_expired(&self, now_ms: i64) -> Result<Vec<Service>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "DELETE FROM services WHERE expires_at IS NOT NULL AND expires_at <= ? RETURNING {}",
            SERVICE_COLUMNS
        ))
        .bind(now_ms)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_service).collect()
    }

    async fn update_status(
        &self,
        id: &ServiceIdentity,
        status: ServiceStatus,
        pid: Option<u32>,
        now_ms: i64,
    ) -> Result<Option<Service>, RepositoryError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE services
            SET status = ?, pid = COALESCE(?, pid), last_seen = ?
            WHERE id = ?
            RETURNING {}
            "#,
            SERVICE_COLUMNS
        ))
        .bind(status.as_str())
        .bind(pid.map(i64::from))
        .bind(now_ms)
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_service).transpose()
    }

    async fn upsert_endpoint(&self, endpoint: &Endpoint) -> Result<(), RepositoryError> {
        // The foreign key turns a missing service into NotFound.
        sqlx::query(
            r#"
            INSERT INTO endpoints (service_id, env, url)
            VALUES (?, ?, ?)
            ON CONFLICT (service_id, env) DO UPDATE SET url = excluded.url
            "#,
        )
        .bind(endpoint.service_id.as_str())
        .bind(&endpoint.env)
        .bind(&endpoint.url)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn endpoints_for(&self, id: &ServiceIdentity) -> Result<Vec<Endpoint>, RepositoryError> {
        let rows = sqlx::query("SELECT env, url FROM endpoints WHERE service_id = ? ORDER BY env")
            .bind(id.as_str())
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .iter()
            .map(|row| Endpoint {
                service_id: id.clone(),
                env: row.get("env"),
                url: row.get("url"),
            })
            .collect())
    }
}
