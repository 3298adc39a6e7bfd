// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Expiry Sweeper - background reconciliation task
//!
//! Periodically removes TTL-expired services, locks and messages, resolves
//! long-poll waiters whose deadline has passed, drops idle channel
//! sequencers, and queues salvage for agents that went dead since the last
//! pass. Every step is a single conditional
//! delete or scan in the store, so a sweep can overlap any client request.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Lifecycle:** started by the daemon, stopped through its cancellation token

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::agent_registry::AgentRegistry;
use crate::application::lock_manager::LockManager;
use crate::application::pubsub::PubSubEngine;
use crate::application::service_registry::ServiceRegistry;
use crate::domain::clock::Clock;
use crate::domain::config::SweeperConfig;

/// What one pass removed or created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub services: usize,
    pub locks: usize,
    pub messages: u64,
    pub waiters: usize,
    pub salvage_queued: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        *self == SweepReport::default()
    }
}

pub struct ExpirySweeper {
    services: Arc<ServiceRegistry>,
    locks: Arc<LockManager>,
    pubsub: Arc<PubSubEngine>,
    agents: Arc<AgentRegistry>,
    clock: Arc<dyn Clock>,
    config: SweeperConfig,
    shutdown_token: CancellationToken,
}

impl ExpirySweeper {
    pub fn new(
        services: Arc<ServiceRegistry>,
        locks: Arc<LockManager>,
        pubsub: Arc<PubSubEngine>,
        agents: Arc<AgentRegistry>,
        clock: Arc<dyn Clock>,
        config: SweeperConfig,
    ) -> Self {
        Self {
            services,
            locks,
            pubsub,
            agents,
            clock,
            config,
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Cancel to stop the background loop
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&self) {
        if !self.config.enabled {
            info!("Expiry sweeper is disabled");
            return;
        }

        info!(interval_seconds = self.config.interval_seconds, "Starting expiry sweeper");

        let mut tick = interval(Duration::from_secs(self.config.interval_seconds.max(1)));
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let report = self.sweep_once().await;
                    if report.is_empty() {
                        debug!("Sweep found nothing to do");
                    } else {
                        info!(
                            services = report.services,
                            locks = report.locks,
                            messages = report.messages,
                            waiters = report.waiters,
                            salvage_queued = report.salvage_queued,
                            "Sweep completed"
                        );
                    }
                }
                _ = self.shutdown_token.cancelled() => {
                    info!("Shutdown signal received, stopping expiry sweeper");
                    break;
                }
            }
        }

        info!("Expiry sweeper stopped");
    }

    /// One reconciliation pass. A failing step is logged and the remaining
    /// steps still run.
    pub async fn sweep_once(&self) -> SweepReport {
        let now = self.clock.now_ms();
        let mut report = SweepReport::default();

        match self.services.purge_expired(now).await {
            Ok(n) => report.services = n,
            Err(e) => warn!(error = %e, "Service sweep failed"),
        }
        match self.locks.purge_expired(now).await {
            Ok(n) => report.locks = n,
            Err(e) => warn!(error = %e, "Lock sweep failed"),
        }
        match self.pubsub.purge_expired(now).await {
            Ok(n) => report.messages = n,
            Err(e) => warn!(error = %e, "Message sweep failed"),
        }
        report.waiters = self.pubsub.hub().expire_waiters(now);
        let pruned = self.pubsub.hub().prune_sequencers();
        if pruned > 0 {
            debug!(pruned, "Dropped idle channel sequencers");
        }
        match self.agents.reconcile_dead_agents(now).await {
            Ok(n) => report.salvage_queued = n,
            Err(e) => warn!(error = %e, "Salvage reconciliation failed"),
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::agent_registry::RegisterAgent;
    use crate::application::service_registry::ClaimRequest;
    use crate::domain::agent::{AgentId, LivenessThresholds};
    use crate::domain::clock::ManualClock;
    use crate::domain::config::MessagesConfig;
    use crate::domain::repository::SessionRepository;
    use crate::domain::service::PortRange;
    use crate::domain::session::Session;
    use crate::domain::ttl::Ttl;
    use crate::infrastructure::channel_hub::ChannelHub;
    use crate::infrastructure::event_bus::EventBus;
    use crate::infrastructure::repositories::*;
    use serde_json::json;

    struct Fixture {
        clock: Arc<ManualClock>,
        services: Arc<ServiceRegistry>,
        locks: Arc<LockManager>,
        pubsub: Arc<PubSubEngine>,
        agents: Arc<AgentRegistry>,
        sessions: Arc<InMemorySessionRepository>,
        sweeper: Arc<ExpirySweeper>,
    }

    fn fixture(config: SweeperConfig) -> Fixture {
        let clock = Arc::new(ManualClock::default());
        let events = EventBus::new(64);
        let sessions = Arc::new(InMemorySessionRepository::new());

        let services = Arc::new(ServiceRegistry::new(
            Arc::new(InMemoryServiceRepository::new()),
            clock.clone(),
            events.clone(),
            PortRange::new(3100, 3199).unwrap(),
            Vec::<u16>::new(),
        ));
        let locks = Arc::new(LockManager::new(
            Arc::new(InMemoryLockRepository::new()),
            clock.clone(),
            events.clone(),
            Ttl::from_millis(60_000).unwrap(),
        ));
        let pubsub = Arc::new(PubSubEngine::new(
            Arc::new(InMemoryMessageRepository::new()),
            Arc::new(ChannelHub::new(8)),
            clock.clone(),
            MessagesConfig::default(),
        ));
        let agents = Arc::new(AgentRegistry::new(
            Arc::new(InMemoryAgentRepository::new()),
            sessions.clone(),
            Arc::new(InMemorySalvageRepository::new()),
            clock.clone(),
            events,
            LivenessThresholds {
                stale_after_ms: 1_000,
                dead_after_ms: 2_000,
            },
        ));
        let sweeper = Arc::new(ExpirySweeper::new(
            services.clone(),
            locks.clone(),
            pubsub.clone(),
            agents.clone(),
            clock.clone(),
            config,
        ));

        Fixture {
            clock,
            services,
            locks,
            pubsub,
            agents,
            sessions,
            sweeper,
        }
    }

    #[tokio::test]
    async fn test_sweep_removes_expired_rows() {
        let f = fixture(SweeperConfig::default());

        f.services
            .claim(ClaimRequest {
                ttl: Some(json!(500)),
                ..ClaimRequest::new("short:lived")
            })
            .await
            .unwrap();
        f.services.claim(ClaimRequest::new("long:lived")).await.unwrap();
        f.locks.acquire("l", "me", Some(&json!(500)), None).await.unwrap();
        f.pubsub
            .publish("c", json!("bye"), None, Some(&json!(500)))
            .await
            .unwrap();
        f.pubsub.publish("c", json!("stay"), None, None).await.unwrap();

        assert!(f.sweeper.sweep_once().await.is_empty());

        f.clock.advance(500);
        let report = f.sweeper.sweep_once().await;
        assert_eq!(report.services, 1);
        assert_eq!(report.locks, 1);
        assert_eq!(report.messages, 1);
        assert_eq!(f.services.find(&Default::default()).await.unwrap().len(), 1);
        assert_eq!(f.pubsub.hub().sequencer_count(), 0);
    }

    #[tokio::test]
    async fn test_sweep_queues_salvage_once() {
        let f = fixture(SweeperConfig::default());
        f.agents
            .register(RegisterAgent {
                id: "w".to_string(),
                ..RegisterAgent::default()
            })
            .await
            .unwrap();
        f.sessions
            .save(&Session {
                id: "s".to_string(),
                agent_id: AgentId::parse("w").unwrap(),
                project: None,
                purpose: None,
                notes: vec!["wip".to_string()],
                claimed_files: vec![],
                active: true,
                started_at: 0,
            })
            .await
            .unwrap();

        f.clock.advance(2_000);
        assert_eq!(f.sweeper.sweep_once().await.salvage_queued, 1);
        assert_eq!(f.sweeper.sweep_once().await.salvage_queued, 0);
    }

    #[tokio::test]
    async fn test_sweep_resolves_overdue_waiters() {
        let f = fixture(SweeperConfig::default());
        let hub = f.pubsub.hub().clone();
        let waiter = hub.register_waiter("ch", 0, f.clock.now_ms() + 100).unwrap();

        f.clock.advance(100);
        assert_eq!(f.sweeper.sweep_once().await.waiters, 1);
        assert!(waiter.wait(Duration::from_secs(5)).await.is_none());
    }

    #[tokio::test]
    async fn test_loop_stops_on_cancel() {
        let f = fixture(SweeperConfig {
            enabled: true,
            interval_seconds: 1,
        });
        let token = f.sweeper.shutdown_token();
        let handle = f.sweeper.clone().start();

        token.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
