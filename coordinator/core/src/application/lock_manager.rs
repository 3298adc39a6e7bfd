// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Lock Manager - TTL-scoped named mutual exclusion
//!
//! Exclusivity comes from the store's conditional upsert; this service only
//! validates input, resolves the lease length and maps store outcomes onto
//! the error taxonomy. An expired row is treated as absent by every read.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::application::error::{CoordinationError, CoordinationResult};
use crate::domain::clock::Clock;
use crate::domain::events::CoordinationEvent;
use crate::domain::lock::{AcquireResult, Lock, OwnedUpdate};
use crate::domain::repository::LockRepository;
use crate::domain::ttl::Ttl;
use crate::infrastructure::event_bus::EventBus;

const MAX_LOCK_NAME_LEN: usize = 200;

pub struct LockManager {
    repo: Arc<dyn LockRepository>,
    clock: Arc<dyn Clock>,
    events: EventBus,
    default_ttl: Ttl,
}

impl LockManager {
    pub fn new(
        repo: Arc<dyn LockRepository>,
        clock: Arc<dyn Clock>,
        events: EventBus,
        default_ttl: Ttl,
    ) -> Self {
        Self {
            repo,
            clock,
            events,
            default_ttl,
        }
    }

    /// Missing or unusable TTLs fall back to the configured default.
    fn lease(&self, ttl: Option<&Value>) -> Ttl {
        match ttl {
            None | Some(Value::Null) => self.default_ttl,
            Some(raw) => Ttl::parse(raw).unwrap_or_else(|e| {
                warn!(ttl = %raw, error = %e, "Invalid lock TTL, using default");
                self.default_ttl
            }),
        }
    }

    pub async fn acquire(
        &self,
        name: &str,
        owner: &str,
        ttl: Option<&Value>,
        metadata: Option<Value>,
    ) -> CoordinationResult<Lock> {
        let name = lock_name(name)?;
        let owner = owner_name(owner)?;
        let now = self.clock.now_ms();

        let lock = Lock {
            name: name.to_string(),
            owner: owner.to_string(),
            acquired_at: now,
            expires_at: self.lease(ttl).expires_at(now),
            metadata,
        };

        match self.repo.acquire(&lock, now).await? {
            AcquireResult::Acquired(lock) => {
                info!(lock = %lock.name, owner = %lock.owner, expires_at = lock.expires_at, "Lock acquired");
                self.events.publish(CoordinationEvent::LockAcquired {
                    name: lock.name.clone(),
                    owner: lock.owner.clone(),
                    expires_at: lock.expires_at,
                    at: now,
                });
                Ok(lock)
            }
            AcquireResult::Held(holder) => {
                debug!(lock = %name, owner, holder = %holder.owner, "Lock is held by another owner");
                Err(CoordinationError::Conflict(format!(
                    "lock '{}' is held by '{}' for another {}ms",
                    name,
                    holder.owner,
                    holder.remaining_ms(now)
                )))
            }
        }
    }

    /// Release a lock. Without `force` the caller must be the holder.
    pub async fn release(&self, name: &str, owner: &str, force: bool) -> CoordinationResult<Lock> {
        let name = lock_name(name)?;
        let owner = owner.trim();
        if !force && owner.is_empty() {
            return Err(CoordinationError::validation("owner", "must not be empty"));
        }
        let now = self.clock.now_ms();

        let required_owner = if force { None } else { Some(owner) };
        match self.repo.release(name, required_owner, now).await? {
            OwnedUpdate::Applied(lock) => {
                if force && lock.owner != owner {
                    warn!(lock = %name, holder = %lock.owner, by = owner, "Lock force-released");
                } else {
                    info!(lock = %name, owner = %lock.owner, "Lock released");
                }
                self.events.publish(CoordinationEvent::LockReleased {
                    name: lock.name.clone(),
                    owner: lock.owner.clone(),
                    forced: force,
                    at: now,
                });
                Ok(lock)
            }
            OwnedUpdate::NotOwner(holder) => Err(CoordinationError::Forbidden(format!(
                "lock '{}' is held by '{}', not '{}'",
                name, holder.owner, owner
            ))),
            OwnedUpdate::Missing => Err(not_held(name)),
        }
    }

    pub async fn extend(
        &self,
        name: &str,
        owner: &str,
        ttl: Option<&Value>,
    ) -> CoordinationResult<Lock> {
        let name = lock_name(name)?;
        let owner = owner_name(owner)?;
        let now = self.clock.now_ms();
        let expires_at = self.lease(ttl).expires_at(now);

        match self.repo.extend(name, owner, expires_at, now).await? {
            OwnedUpdate::Applied(lock) => {
                info!(lock = %name, owner, expires_at, "Lock extended");
                self.events.publish(CoordinationEvent::LockExtended {
                    name: lock.name.clone(),
                    owner: lock.owner.clone(),
                    expires_at: lock.expires_at,
                    at: now,
                });
                Ok(lock)
            }
            OwnedUpdate::NotOwner(holder) => Err(CoordinationError::Forbidden(format!(
                "lock '{}' is held by '{}', not '{}'",
                name, holder.owner, owner
            ))),
            OwnedUpdate::Missing => Err(not_held(name)),
        }
    }

    pub async fn check(&self, name: &str) -> CoordinationResult<Lock> {
        let name = lock_name(name)?;
        self.repo
            .get(name, self.clock.now_ms())
            .await?
            .ok_or_else(|| not_held(name))
    }

    pub async fn list(&self, owner: Option<&str>) -> CoordinationResult<Vec<Lock>> {
        let owner = owner.map(str::trim).filter(|o| !o.is_empty());
        Ok(self.repo.list(owner, self.clock.now_ms()).await?)
    }

    pub async fn purge_expired(&self, now_ms: i64) -> CoordinationResult<usize> {
        let expired = self.repo.delete_expired(now_ms).await?;
        for lock in &expired {
            debug!(lock = %lock.name, owner = %lock.owner, "Expired lock removed");
        }
        Ok(expired.len())
    }
}

fn lock_name(raw: &str) -> CoordinationResult<&str> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(CoordinationError::validation("name", "must not be empty"));
    }
    if name.len() > MAX_LOCK_NAME_LEN {
        return Err(CoordinationError::validation(
            "name",
            format!("longer than {} characters", MAX_LOCK_NAME_LEN),
        ));
    }
    Ok(name)
}

fn owner_name(raw: &str) -> CoordinationResult<&str> {
    let owner = raw.trim();
    if owner.is_empty() {
        return Err(CoordinationError::validation("owner", "must not be empty"));
    }
    Ok(owner)
}

fn not_held(name: &str) -> CoordinationError {
    CoordinationError::NotFound(format!("lock '{}' is not held", name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::clock::ManualClock;
    use crate::infrastructure::repositories::InMemoryLockRepository;
    use serde_json::json;

    fn manager(clock: Arc<ManualClock>) -> LockManager {
        LockManager::new(
            Arc::new(InMemoryLockRepository::new()),
            clock,
            EventBus::new(16),
            Ttl::from_millis(300_000).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_second_owner_conflicts_until_expiry() {
        let clock = Arc::new(ManualClock::default());
        let locks = manager(clock.clone());

        locks.acquire("build", "a", Some(&json!(1000)), None).await.unwrap();
        let err = locks.acquire("build", "b", None, None).await.unwrap_err();
        assert!(matches!(err, CoordinationError::Conflict(_)));

        clock.advance(1000);
        let lock = locks.acquire("build", "b", None, None).await.unwrap();
        assert_eq!(lock.owner, "b");
    }

    #[tokio::test]
    async fn test_reentrant_acquire_refreshes_ttl() {
        let clock = Arc::new(ManualClock::default());
        let locks = manager(clock.clone());

        let first = locks.acquire("db", "a", Some(&json!(1000)), None).await.unwrap();
        clock.advance(500);
        let second = locks.acquire("db", "a", Some(&json!(1000)), None).await.unwrap();

        assert_eq!(second.acquired_at, first.acquired_at);
        assert_eq!(second.expires_at, first.expires_at + 500);
    }

    #[tokio::test]
    async fn test_invalid_ttl_clamps_to_default() {
        let clock = Arc::new(ManualClock::default());
        let locks = manager(clock.clone());
        let now = clock.now_ms();

        for bad in [json!(-5), json!("soon"), json!(0), json!(true)] {
            let lock = locks.acquire("x", "a", Some(&bad), None).await.unwrap();
            assert_eq!(lock.expires_at - now, 300_000, "ttl {:?}", bad);
            locks.release("x", "a", false).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_release_requires_owner_unless_forced() {
        let locks = manager(Arc::new(ManualClock::default()));
        locks.acquire("deploy", "a", None, None).await.unwrap();

        let err = locks.release("deploy", "b", false).await.unwrap_err();
        assert!(matches!(err, CoordinationError::Forbidden(_)));

        let released = locks.release("deploy", "b", true).await.unwrap();
        assert_eq!(released.owner, "a");

        let err = locks.release("deploy", "a", false).await.unwrap_err();
        assert!(matches!(err, CoordinationError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_extend_by_non_owner_is_forbidden() {
        let clock = Arc::new(ManualClock::default());
        let locks = manager(clock.clone());
        locks.acquire("migrate", "a", Some(&json!("10s")), None).await.unwrap();

        let err = locks.extend("migrate", "b", None).await.unwrap_err();
        assert!(matches!(err, CoordinationError::Forbidden(_)));

        clock.advance(5_000);
        let lock = locks.extend("migrate", "a", Some(&json!("1m"))).await.unwrap();
        assert_eq!(lock.expires_at, clock.now_ms() + 60_000);
    }

    #[tokio::test]
    async fn test_expired_lock_reads_as_absent() {
        let clock = Arc::new(ManualClock::default());
        let locks = manager(clock.clone());
        locks.acquire("cache", "a", Some(&json!(100)), None).await.unwrap();
        assert_eq!(locks.list(Some("a")).await.unwrap().len(), 1);

        clock.advance(100);
        assert!(matches!(
            locks.check("cache").await.unwrap_err(),
            CoordinationError::NotFound(_)
        ));
        assert!(locks.list(None).await.unwrap().is_empty());
        assert_eq!(locks.purge_expired(clock.now_ms()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_rejects_blank_names() {
        let locks = manager(Arc::new(ManualClock::default()));
        let err = locks.acquire(" ", "a", None, None).await.unwrap_err();
        assert_eq!(err.field(), Some("name"));
        let err = locks.acquire("n", "", None, None).await.unwrap_err();
        assert_eq!(err.field(), Some("owner"));
    }
}
