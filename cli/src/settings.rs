// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Resolves the daemon configuration: file discovery, environment, then flags.

use std::path::PathBuf;

use anyhow::{Context, Result};
use berth_core::domain::config::DaemonConfig;

/// Values given on the command line. They take precedence over the file and
/// the environment.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub port: Option<u16>,
    pub host: Option<String>,
    pub log_level: Option<String>,
}

impl CliOverrides {
    pub fn apply(&self, config: &mut DaemonConfig) {
        if let Some(port) = self.port {
            config.network.port = port;
        }
        if let Some(host) = &self.host {
            config.network.bind_address = host.clone();
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
    }
}

pub fn resolve_config(path: Option<PathBuf>, overrides: &CliOverrides) -> Result<DaemonConfig> {
    let mut config = DaemonConfig::load_or_default(path).context("Failed to load configuration")?;
    overrides.apply(&mut config);
    Ok(config)
}

/// Address a local client should dial to reach a daemon bound to `bind_address`.
pub fn client_host(bind_address: &str) -> &str {
    match bind_address {
        "0.0.0.0" | "::" | "[::]" => "127.0.0.1",
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_flags_override_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "network:\n  port: 7001\n  socket_path: null\nlogging:\n  level: warn\n"
        )
        .unwrap();

        let overrides = CliOverrides {
            port: Some(7002),
            host: None,
            log_level: Some("debug".to_string()),
        };
        let config = resolve_config(Some(file.path().to_path_buf()), &overrides).unwrap();

        assert_eq!(config.network.port, 7002);
        assert_eq!(config.network.bind_address, "127.0.0.1");
        assert!(config.network.socket_path.is_none());
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_missing_explicit_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = resolve_config(Some(dir.path().join("absent.yaml")), &CliOverrides::default());
        assert!(result.is_err());
    }

    #[test]
    fn test_client_host_rewrites_wildcards() {
        assert_eq!(client_host("0.0.0.0"), "127.0.0.1");
        assert_eq!(client_host("192.168.1.4"), "192.168.1.4");
    }
}
