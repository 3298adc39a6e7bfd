// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::domain::identity::{IdentityPattern, ServiceIdentity};

// ============================================================================
// Value Objects
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Assigned,
    Running,
    Stopped,
    Crashed,
}

impl ServiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatus::Assigned => "assigned",
            ServiceStatus::Running => "running",
            ServiceStatus::Stopped => "stopped",
            ServiceStatus::Crashed => "crashed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "assigned" => Some(ServiceStatus::Assigned),
            "running" => Some(ServiceStatus::Running),
            "stopped" => Some(ServiceStatus::Stopped),
            "crashed" => Some(ServiceStatus::Crashed),
            _ => None,
        }
    }
}

/// What the process launcher should do when the service exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    #[default]
    Never,
    OnFailure,
    Always,
}

impl RestartPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RestartPolicy::Never => "never",
            RestartPolicy::OnFailure => "on-failure",
            RestartPolicy::Always => "always",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "never" | "no" => Some(RestartPolicy::Never),
            "on-failure" | "on_failure" => Some(RestartPolicy::OnFailure),
            "always" => Some(RestartPolicy::Always),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PortRangeError {
    #[error("port range bounds must be between 1 and 65535")]
    OutOfBounds,

    #[error("port range minimum {0} is greater than maximum {1}")]
    Inverted(u32, u32),
}

/// Inclusive port interval `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    pub min: u16,
    pub max: u16,
}

impl PortRange {
    pub fn new(min: u32, max: u32) -> Result<Self, PortRangeError> {
        if min == 0 || max == 0 || min > 65535 || max > 65535 {
            return Err(PortRangeError::OutOfBounds);
        }
        if min > max {
            return Err(PortRangeError::Inverted(min, max));
        }
        Ok(Self {
            min: min as u16,
            max: max as u16,
        })
    }

    pub fn size(&self) -> u32 {
        u32::from(self.max) - u32::from(self.min) + 1
    }

    pub fn contains(&self, port: u16) -> bool {
        port >= self.min && port <= self.max
    }

    /// Deterministic starting point for a probe through this range.
    pub fn candidate_for(&self, identity: &ServiceIdentity) -> u16 {
        let offset = identity.stable_hash() % u64::from(self.size());
        (u64::from(self.min) + offset) as u16
    }

    /// Every port in the range, starting at `start` and wrapping once.
    pub fn probe_from(&self, start: u16) -> impl Iterator<Item = u16> {
        let min = u32::from(self.min);
        let size = self.size();
        let start_offset = u32::from(start).saturating_sub(min) % size;
        (0..size).map(move |i| (min + (start_offset + i) % size) as u16)
    }
}

// ============================================================================
// Aggregate
// ============================================================================

/// A claimed port bound to a semantic identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub id: ServiceIdentity,
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cmd: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    pub status: ServiceStatus,
    pub created_at: i64,
    pub last_seen: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    pub restart_policy: RestartPolicy,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paired_with: Option<ServiceIdentity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl Service {
    pub fn is_expired(&self, now_ms: i64) -> bool {
        matches!(self.expires_at, Some(at) if at <= now_ms)
    }
}

/// Per-environment URL of a service, removed together with it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub service_id: ServiceIdentity,
    pub env: String,
    pub url: String,
}

/// Read filter for `find`. Empty filter lists everything unexpired.
#[derive(Debug, Clone, Default)]
pub struct ServiceFilter {
    pub pattern: Option<IdentityPattern>,
    pub status: Option<ServiceStatus>,
    pub port: Option<u16>,
}

impl ServiceFilter {
    pub fn matches(&self, service: &Service) -> bool {
        if let Some(pattern) = &self.pattern {
            if !pattern.matches(&service.id) {
                return false;
            }
        }
        if let Some(status) = self.status {
            if service.status != status {
                return false;
            }
        }
        if let Some(port) = self.port {
            if service.port != port {
                return false;
            }
        }
        true
    }
}
