// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! HTTP client for communicating with daemon API

use anyhow::{Context, Result};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Deserialize)]
pub struct HubSnapshot {
    pub channels: usize,
    pub subscribers: usize,
    pub waiters: usize,
}

/// Body of `GET /health`.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthReport {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub hub: HubSnapshot,
}

#[derive(Debug, Error)]
pub enum HealthError {
    #[error("daemon unreachable: {0}")]
    Unreachable(#[source] reqwest::Error),

    #[error("HTTP {0}")]
    Status(reqwest::StatusCode),

    #[error("malformed health response: {0}")]
    Body(#[source] reqwest::Error),
}

#[derive(Debug, Clone)]
pub struct DaemonClient {
    client: Client,
    base_url: String,
}

impl DaemonClient {
    pub fn with_timeout(host: &str, port: u16, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = if host.starts_with("http://") || host.starts_with("https://") {
            format!("{}:{}", host, port)
        } else {
            format!("http://{}:{}", host, port)
        };

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn health(&self) -> Result<HealthReport, HealthError> {
        let response = self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await
            .map_err(HealthError::Unreachable)?;

        if !response.status().is_success() {
            return Err(HealthError::Status(response.status()));
        }

        response.json().await.map_err(HealthError::Body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_adds_scheme() {
        let client = DaemonClient::with_timeout("127.0.0.1", 9876, Duration::from_millis(10)).unwrap();
        assert_eq!(client.base_url(), "http://127.0.0.1:9876");

        let client =
            DaemonClient::with_timeout("https://box.local", 443, Duration::from_millis(10)).unwrap();
        assert_eq!(client.base_url(), "https://box.local:443");
    }
}
