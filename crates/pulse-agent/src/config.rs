// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Agent configuration: constructed once during wiring and passed by
//! reference into each component's constructor. No component reads ambient
//! global state.

use pulse_core::RelayError;
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Collector service address, host:port.
    pub server_address: String,
    /// Seconds between report cycles.
    pub report_interval_seconds: u64,
    /// Seconds between sample refreshes.
    pub poll_interval_seconds: u64,
    /// Maximum concurrent in-flight deliveries.
    pub rate_limit: usize,
    /// Pre-shared secret for the integrity signature header.
    pub secret_key: Option<String>,
    /// Path to a PEM public key enabling payload encryption.
    pub crypto_key_path: Option<PathBuf>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            server_address: "localhost:8080".to_string(),
            report_interval_seconds: 10,
            poll_interval_seconds: 2,
            rate_limit: 1,
            secret_key: None,
            crypto_key_path: None,
        }
    }
}

impl AgentConfig {
    /// Reads configuration from the environment, falling back to defaults.
    pub fn from_env() -> Result<Self, RelayError> {
        let defaults = Self::default();

        let server_address = env::var("ADDRESS").unwrap_or(defaults.server_address);
        let report_interval_seconds = env::var("REPORT_INTERVAL")
            .ok()
            .and_then(|val| val.parse::<u64>().ok())
            .unwrap_or(defaults.report_interval_seconds);
        let poll_interval_seconds = env::var("POLL_INTERVAL")
            .ok()
            .and_then(|val| val.parse::<u64>().ok())
            .unwrap_or(defaults.poll_interval_seconds);
        let rate_limit = env::var("RATE_LIMIT")
            .ok()
            .and_then(|val| val.parse::<usize>().ok())
            .unwrap_or(defaults.rate_limit);
        let secret_key = env::var("KEY").ok().filter(|key| !key.is_empty());
        let crypto_key_path = env::var("CRYPTO_KEY")
            .ok()
            .filter(|path| !path.is_empty())
            .map(PathBuf::from);

        let config = Self {
            server_address,
            report_interval_seconds,
            poll_interval_seconds,
            rate_limit,
            secret_key,
            crypto_key_path,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), RelayError> {
        if self.server_address.trim().is_empty() {
            return Err(RelayError::Payload("server address must not be empty".into()));
        }
        if self.report_interval_seconds == 0 {
            return Err(RelayError::Payload(
                "report interval must be greater than zero".into(),
            ));
        }
        if self.poll_interval_seconds == 0 {
            return Err(RelayError::Payload(
                "poll interval must be greater than zero".into(),
            ));
        }
        if self.rate_limit == 0 {
            return Err(RelayError::Payload(
                "rate limit must allow at least one delivery".into(),
            ));
        }
        Ok(())
    }
}
