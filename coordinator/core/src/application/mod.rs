// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Application layer: the coordination services, the error taxonomy they
//! share, and the wiring that builds them from configuration.

pub mod agent_registry;
pub mod coordinator;
pub mod error;
pub mod expiry_sweeper;
pub mod lock_manager;
pub mod pubsub;
pub mod repository_factory;
pub mod service_registry;

pub use agent_registry::{AgentRegistry, RegisterAgent};
pub use coordinator::Coordinator;
pub use error::{CoordinationError, CoordinationResult};
pub use expiry_sweeper::{ExpirySweeper, SweepReport};
pub use lock_manager::LockManager;
pub use pubsub::PubSubEngine;
pub use repository_factory::{open_repositories, Repositories};
pub use service_registry::{ClaimOutcome, ClaimRequest, ReleaseOutcome, ServiceDetails, ServiceRegistry};
