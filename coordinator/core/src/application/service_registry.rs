// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Service Registry
//!
//! Atomic port claiming keyed by semantic identity. The registry never
//! decides exclusivity itself: it proposes a row and lets the store's unique
//! indexes on `id` and `port` accept or reject it, walking forward through
//! the range on rejection.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Collaborators:** `ServiceRepository`, `Clock`, `EventBus`

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::application::error::{CoordinationError, CoordinationResult};
use crate::domain::clock::Clock;
use crate::domain::events::CoordinationEvent;
use crate::domain::identity::{IdentityPattern, ServiceIdentity};
use crate::domain::repository::{RepositoryError, ServiceRepository};
use crate::domain::service::{
    Endpoint, PortRange, RestartPolicy, Service, ServiceFilter, ServiceStatus,
};
use crate::domain::ttl::Ttl;
use crate::infrastructure::event_bus::EventBus;

/// Lost insert races tolerated before a claim gives up.
const MAX_CLAIM_ATTEMPTS: usize = 32;

#[derive(Debug, Clone, Default)]
pub struct ClaimRequest {
    pub id: String,
    pub port: Option<u32>,
    pub range: Option<(u32, u32)>,
    pub ttl: Option<Value>,
    pub cmd: Option<String>,
    pub cwd: Option<String>,
    pub pid: Option<u32>,
    pub pair: Option<String>,
    pub restart_policy: Option<RestartPolicy>,
    pub metadata: Option<Value>,
}

impl ClaimRequest {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ClaimOutcome {
    pub id: ServiceIdentity,
    pub port: u16,
    pub existing: bool,
    pub service: Service,
}

impl ClaimOutcome {
    fn existing(service: Service) -> Self {
        Self {
            id: service.id.clone(),
            port: service.port,
            existing: true,
            service,
        }
    }

    fn created(service: Service) -> Self {
        Self {
            id: service.id.clone(),
            port: service.port,
            existing: false,
            service,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReleaseOutcome {
    pub released: usize,
    pub ports: Vec<u16>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceDetails {
    #[serde(flatten)]
    pub service: Service,
    pub endpoints: Vec<Endpoint>,
}

pub struct ServiceRegistry {
    repo: Arc<dyn ServiceRepository>,
    clock: Arc<dyn Clock>,
    events: EventBus,
    default_range: PortRange,
    reserved: HashSet<u16>,
}

impl ServiceRegistry {
    pub fn new(
        repo: Arc<dyn ServiceRepository>,
        clock: Arc<dyn Clock>,
        events: EventBus,
        default_range: PortRange,
        reserved: impl IntoIterator<Item = u16>,
    ) -> Self {
        Self {
            repo,
            clock,
            events,
            default_range,
            reserved: reserved.into_iter().collect(),
        }
    }

    pub async fn claim(&self, request: ClaimRequest) -> CoordinationResult<ClaimOutcome> {
        let identity = ServiceIdentity::parse(&request.id)
            .map_err(|e| CoordinationError::validation("id", e))?;

        let ttl = match &request.ttl {
            None | Some(Value::Null) => None,
            Some(raw) => Some(Ttl::parse(raw).map_err(|e| CoordinationError::validation("ttl", e))?),
        };

        let range = match request.range {
            Some((min, max)) => {
                PortRange::new(min, max).map_err(|e| CoordinationError::validation("range", e))?
            }
            None => self.default_range,
        };

        let explicit_port = match request.port {
            None => None,
            Some(p) => {
                let port = u16::try_from(p)
                    .ok()
                    .filter(|p| *p > 0)
                    .ok_or_else(|| CoordinationError::validation("port", "must be between 1 and 65535"))?;
                if request.range.is_some() && !range.contains(port) {
                    return Err(CoordinationError::validation(
                        "port",
                        format!("{} is outside range {}-{}", port, range.min, range.max),
                    ));
                }
                Some(port)
            }
        };

        let paired_with = request
            .pair
            .as_deref()
            .map(ServiceIdentity::parse)
            .transpose()
            .map_err(|e| CoordinationError::validation("pair", e))?;

        let now = self.clock.now_ms();
        self.purge_expired(now).await?;

        if let Some(existing) = self.live(&identity, now).await? {
            debug!(id = %identity, port = existing.port, "Claim is idempotent, returning existing port");
            return Ok(ClaimOutcome::existing(existing));
        }

        let mut service = Service {
            id: identity.clone(),
            port: 0,
            pid: request.pid,
            cmd: request.cmd,
            cwd: request.cwd,
            status: ServiceStatus::Assigned,
            created_at: now,
            last_seen: now,
            expires_at: ttl.map(|t| t.expires_at(now)),
            restart_policy: request.restart_policy.unwrap_or_default(),
            paired_with,
            metadata: request.metadata,
        };

        if let Some(port) = explicit_port {
            service.port = port;
            return match self.repo.insert(&service).await {
                Ok(()) => Ok(self.claimed(service)),
                Err(RepositoryError::Conflict(_)) => match self.live(&identity, now).await? {
                    Some(winner) => Ok(ClaimOutcome::existing(winner)),
                    None => Err(CoordinationError::Conflict(format!(
                        "port {} is already assigned",
                        port
                    ))),
                },
                Err(e) => Err(e.into()),
            };
        }

        let taken: HashSet<u16> = self.repo.ports_in_use().await?.into_iter().collect();
        let start = range.candidate_for(&identity);
        let mut attempts = 0;

        for port in range.probe_from(start) {
            if self.reserved.contains(&port) || taken.contains(&port) {
                continue;
            }
            if attempts == MAX_CLAIM_ATTEMPTS {
                return Err(CoordinationError::Internal(format!(
                    "gave up assigning a port to '{}' after {} attempts",
                    identity, MAX_CLAIM_ATTEMPTS
                )));
            }
            attempts += 1;

            service.port = port;
            match self.repo.insert(&service).await {
                Ok(()) => return Ok(self.claimed(service)),
                Err(RepositoryError::Conflict(_)) => {
                    // Either another request took this port, or it claimed
                    // the same identity first.
                    if let Some(winner) = self.live(&identity, now).await? {
                        return Ok(ClaimOutcome::existing(winner));
                    }
                    debug!(id = %identity, port, attempt = attempts, "Port taken concurrently, probing next");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(CoordinationError::Conflict(format!(
            "no free port in range {}-{}",
            range.min, range.max
        )))
    }

    fn claimed(&self, service: Service) -> ClaimOutcome {
        info!(id = %service.id, port = service.port, "Service claimed");
        self.events.publish(CoordinationEvent::ServiceClaimed {
            id: service.id.clone(),
            port: service.port,
            at: service.created_at,
        });
        ClaimOutcome::created(service)
    }

    /// Release every service matching `pattern`. No match is not an error.
    pub async fn release(&self, pattern: &str) -> CoordinationResult<ReleaseOutcome> {
        let pattern =
            IdentityPattern::parse(pattern).map_err(|e| CoordinationError::validation("id", e))?;

        // Expired rows are reported as expired, never as released.
        let now = self.clock.now_ms();
        self.purge_expired(now).await?;

        let ids: Vec<ServiceIdentity> = self
            .repo
            .list_all()
            .await?
            .into_iter()
            .filter(|s| !s.is_expired(now) && pattern.matches(&s.id))
            .map(|s| s.id)
            .collect();

        if ids.is_empty() {
            debug!(pattern = %pattern, "Release matched nothing");
            return Ok(ReleaseOutcome::default());
        }

        let released = self.repo.delete_many(&ids).await?;
        let mut ports = Vec::with_capacity(released.len());
        for service in &released {
            info!(id = %service.id, port = service.port, "Service released");
            self.events.publish(CoordinationEvent::ServiceReleased {
                id: service.id.clone(),
                port: service.port,
                at: now,
            });
            ports.push(service.port);
        }
        ports.sort_unstable();

        Ok(ReleaseOutcome {
            released: released.len(),
            ports,
        })
    }

    /// Unexpired services matching `filter`, ordered by identity.
    pub async fn find(&self, filter: &ServiceFilter) -> CoordinationResult<Vec<Service>> {
        let now = self.clock.now_ms();
        let mut services: Vec<Service> = self
            .repo
            .list_all()
            .await?
            .into_iter()
            .filter(|s| !s.is_expired(now) && filter.matches(s))
            .collect();
        services.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(services)
    }

    pub async fn get(&self, id: &str) -> CoordinationResult<ServiceDetails> {
        let identity =
            ServiceIdentity::parse(id).map_err(|e| CoordinationError::validation("id", e))?;
        let service = self
            .live(&identity, self.clock.now_ms())
            .await?
            .ok_or_else(|| CoordinationError::NotFound(format!("service '{}' not found", identity)))?;
        let endpoints = self.repo.endpoints_for(&identity).await?;
        Ok(ServiceDetails { service, endpoints })
    }

    pub async fn update_status(
        &self,
        id: &str,
        status: ServiceStatus,
        pid: Option<u32>,
    ) -> CoordinationResult<Service> {
        let identity =
            ServiceIdentity::parse(id).map_err(|e| CoordinationError::validation("id", e))?;
        let now = self.clock.now_ms();

        match self.repo.update_status(&identity, status, pid, now).await? {
            Some(service) if !service.is_expired(now) => {
                info!(id = %identity, status = status.as_str(), "Service status updated");
                Ok(service)
            }
            _ => Err(CoordinationError::NotFound(format!(
                "service '{}' not found",
                identity
            ))),
        }
    }

    pub async fn set_endpoint(&self, id: &str, env: &str, url: &str) -> CoordinationResult<Endpoint> {
        let identity =
            ServiceIdentity::parse(id).map_err(|e| CoordinationError::validation("id", e))?;
        let env = env.trim();
        if env.is_empty() {
            return Err(CoordinationError::validation("env", "must not be empty"));
        }
        let url = url.trim();
        if url.is_empty() {
            return Err(CoordinationError::validation("url", "must not be empty"));
        }

        if self.live(&identity, self.clock.now_ms()).await?.is_none() {
            return Err(CoordinationError::NotFound(format!(
                "service '{}' not found",
                identity
            )));
        }

        let endpoint = Endpoint {
            service_id: identity,
            env: env.to_string(),
            url: url.to_string(),
        };
        self.repo.upsert_endpoint(&endpoint).await?;
        Ok(endpoint)
    }

    /// Delete expired services. Returns how many were removed.
    pub async fn purge_expired(&self, now_ms: i64) -> CoordinationResult<usize> {
        let expired = self.repo.delete_expired(now_ms).await?;
        for service in &expired {
            info!(id = %service.id, port = service.port, "Service expired");
            self.events.publish(CoordinationEvent::ServiceExpired {
                id: service.id.clone(),
                port: service.port,
                at: now_ms,
            });
        }
        Ok(expired.len())
    }

    async fn live(&self, id: &ServiceIdentity, now_ms: i64) -> CoordinationResult<Option<Service>> {
        Ok(self
            .repo
            .find_by_id(id)
            .await?
            .filter(|s| !s.is_expired(now_ms)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::clock::ManualClock;
    use crate::infrastructure::repositories::InMemoryServiceRepository;
    use serde_json::json;

    fn registry(clock: Arc<ManualClock>) -> ServiceRegistry {
        ServiceRegistry::new(
            Arc::new(InMemoryServiceRepository::new()),
            clock,
            EventBus::new(16),
            PortRange::new(3100, 9999).unwrap(),
            [9876],
        )
    }

    fn ranged(id: &str, min: u32, max: u32) -> ClaimRequest {
        ClaimRequest {
            range: Some((min, max)),
            ..ClaimRequest::new(id)
        }
    }

    #[tokio::test]
    async fn test_claim_is_idempotent() {
        let reg = registry(Arc::new(ManualClock::default()));

        let first = reg.claim(ranged("Demo:API", 3100, 3110)).await.unwrap();
        assert!(!first.existing);
        assert_eq!(first.id.as_str(), "demo:api");
        assert!((3100..=3110).contains(&first.port));

        let second = reg.claim(ranged("demo:api", 3100, 3110)).await.unwrap();
        assert!(second.existing);
        assert_eq!(second.port, first.port);
    }

    #[tokio::test]
    async fn test_claim_probes_past_taken_and_reserved() {
        let reg = registry(Arc::new(ManualClock::default()));

        let a = reg.claim(ranged("a", 9875, 9877)).await.unwrap();
        let b = reg.claim(ranged("b", 9875, 9877)).await.unwrap();
        assert_ne!(a.port, b.port);
        assert_ne!(a.port, 9876);
        assert_ne!(b.port, 9876);

        let err = reg.claim(ranged("c", 9875, 9877)).await.unwrap_err();
        assert!(matches!(err, CoordinationError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_explicit_port_conflict() {
        let reg = registry(Arc::new(ManualClock::default()));
        reg.claim(ClaimRequest {
            port: Some(4000),
            ..ClaimRequest::new("one")
        })
        .await
        .unwrap();

        let err = reg
            .claim(ClaimRequest {
                port: Some(4000),
                ..ClaimRequest::new("two")
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinationError::Conflict(_)));

        let err = reg
            .claim(ClaimRequest {
                port: Some(5000),
                range: Some((3100, 3200)),
                ..ClaimRequest::new("three")
            })
            .await
            .unwrap_err();
        assert_eq!(err.field(), Some("port"));
    }

    #[tokio::test]
    async fn test_claim_rejects_bad_input() {
        let reg = registry(Arc::new(ManualClock::default()));

        let err = reg.claim(ClaimRequest::new("  ")).await.unwrap_err();
        assert_eq!(err.field(), Some("id"));

        let err = reg
            .claim(ClaimRequest {
                ttl: Some(json!(-5)),
                ..ClaimRequest::new("svc")
            })
            .await
            .unwrap_err();
        assert_eq!(err.field(), Some("ttl"));

        let err = reg.claim(ranged("svc", 5000, 4000)).await.unwrap_err();
        assert_eq!(err.field(), Some("range"));
    }

    #[tokio::test]
    async fn test_expired_service_is_reclaimable() {
        let clock = Arc::new(ManualClock::default());
        let reg = registry(clock.clone());

        let first = reg
            .claim(ClaimRequest {
                ttl: Some(json!("1s")),
                ..ClaimRequest::new("temp")
            })
            .await
            .unwrap();
        clock.advance(1_000);

        assert!(reg.find(&ServiceFilter::default()).await.unwrap().is_empty());
        let second = reg.claim(ClaimRequest::new("temp")).await.unwrap();
        assert!(!second.existing);
        assert_eq!(second.port, first.port);
    }

    #[tokio::test]
    async fn test_release_by_pattern() {
        let reg = registry(Arc::new(ManualClock::default()));
        for id in ["shop:api", "shop:web", "shop:api:worker", "blog:api"] {
            reg.claim(ClaimRequest::new(id)).await.unwrap();
        }

        let outcome = reg.release("shop:*").await.unwrap();
        assert_eq!(outcome.released, 3);
        assert_eq!(outcome.ports.len(), 3);

        let left = reg.find(&ServiceFilter::default()).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id.as_str(), "blog:api");

        assert_eq!(reg.release("nothing:*").await.unwrap().released, 0);
    }

    #[tokio::test]
    async fn test_release_skips_already_expired_services() {
        let clock = Arc::new(ManualClock::default());
        let reg = registry(clock.clone());
        reg.claim(ClaimRequest {
            ttl: Some(json!(500)),
            ..ClaimRequest::new("job:short")
        })
        .await
        .unwrap();
        let kept = reg.claim(ClaimRequest::new("job:long")).await.unwrap();

        clock.advance(500);
        let outcome = reg.release("job:*").await.unwrap();
        assert_eq!(outcome.released, 1);
        assert_eq!(outcome.ports, vec![kept.port]);
    }

    #[tokio::test]
    async fn test_round_trip_claim_release_claim() {
        let reg = registry(Arc::new(ManualClock::default()));
        assert!(!reg.claim(ClaimRequest::new("rt")).await.unwrap().existing);
        reg.release("rt").await.unwrap();
        assert!(!reg.claim(ClaimRequest::new("rt")).await.unwrap().existing);
    }

    #[tokio::test]
    async fn test_status_and_endpoints() {
        let reg = registry(Arc::new(ManualClock::default()));
        reg.claim(ClaimRequest::new("app:api")).await.unwrap();

        let svc = reg
            .update_status("app:api", ServiceStatus::Running, Some(4242))
            .await
            .unwrap();
        assert_eq!(svc.status, ServiceStatus::Running);
        assert_eq!(svc.pid, Some(4242));

        reg.set_endpoint("app:api", "dev", "http://localhost:3100")
            .await
            .unwrap();
        reg.set_endpoint("app:api", "dev", "http://localhost:3200")
            .await
            .unwrap();
        let details = reg.get("app:api").await.unwrap();
        assert_eq!(details.endpoints.len(), 1);
        assert_eq!(details.endpoints[0].url, "http://localhost:3200");

        let err = reg.set_endpoint("ghost", "dev", "x").await.unwrap_err();
        assert!(matches!(err, CoordinationError::NotFound(_)));

        reg.release("app:api").await.unwrap();
        assert!(matches!(
            reg.get("app:api").await.unwrap_err(),
            CoordinationError::NotFound(_)
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_claims_get_distinct_ports() {
        let reg = Arc::new(registry(Arc::new(ManualClock::default())));

        let handles: Vec<_> = (0..40)
            .map(|i| {
                let reg = reg.clone();
                tokio::spawn(async move { reg.claim(ranged(&format!("svc-{}", i), 3100, 3199)).await })
            })
            .collect();

        let mut ports = HashSet::new();
        for handle in handles {
            let outcome = handle.await.unwrap().unwrap();
            assert!(ports.insert(outcome.port), "port {} assigned twice", outcome.port);
        }
        assert_eq!(ports.len(), 40);
    }
}
