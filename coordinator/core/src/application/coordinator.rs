// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Wires the coordination services together from configuration.

use std::sync::Arc;

use crate::application::agent_registry::AgentRegistry;
use crate::application::expiry_sweeper::ExpirySweeper;
use crate::application::lock_manager::LockManager;
use crate::application::pubsub::PubSubEngine;
use crate::application::repository_factory::Repositories;
use crate::application::service_registry::ServiceRegistry;
use crate::domain::clock::Clock;
use crate::domain::config::{ConfigError, DaemonConfig};
use crate::domain::ttl::Ttl;
use crate::infrastructure::channel_hub::ChannelHub;
use crate::infrastructure::event_bus::EventBus;

/// Every coordination service, sharing one clock, event bus and hub.
#[derive(Clone)]
pub struct Coordinator {
    pub services: Arc<ServiceRegistry>,
    pub locks: Arc<LockManager>,
    pub pubsub: Arc<PubSubEngine>,
    pub agents: Arc<AgentRegistry>,
    pub sweeper: Arc<ExpirySweeper>,
    pub events: EventBus,
    pub hub: Arc<ChannelHub>,
    pub clock: Arc<dyn Clock>,
}

impl Coordinator {
    pub fn new(
        config: &DaemonConfig,
        repos: Repositories,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let events = EventBus::with_default_capacity();
        let hub = Arc::new(ChannelHub::new(config.messages.subscriber_buffer));
        let default_lock_ttl = Ttl::from_millis(config.locks.default_ttl_ms)
            .map_err(|e| ConfigError::Invalid(format!("locks.default_ttl_ms: {}", e)))?;

        let services = Arc::new(ServiceRegistry::new(
            repos.services,
            clock.clone(),
            events.clone(),
            config.port_range()?,
            config.ports.reserved.iter().copied(),
        ));
        let locks = Arc::new(LockManager::new(
            repos.locks,
            clock.clone(),
            events.clone(),
            default_lock_ttl,
        ));
        let pubsub = Arc::new(PubSubEngine::new(
            repos.messages,
            hub.clone(),
            clock.clone(),
            config.messages.clone(),
        ));
        let agents = Arc::new(AgentRegistry::new(
            repos.agents,
            repos.sessions,
            repos.salvage,
            clock.clone(),
            events.clone(),
            config.agents.thresholds(),
        ));
        let sweeper = Arc::new(ExpirySweeper::new(
            services.clone(),
            locks.clone(),
            pubsub.clone(),
            agents.clone(),
            clock.clone(),
            config.sweeper.clone(),
        ));

        Ok(Self {
            services,
            locks,
            pubsub,
            agents,
            sweeper,
            events,
            hub,
            clock,
        })
    }

    /// Stop background work and release every live subscriber and waiter.
    pub fn shutdown(&self) {
        self.sweeper.shutdown_token().cancel();
        self.hub.close();
    }
}
