// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Agent lifecycle: wires the probes, the dispatcher and the result
//! consumer together and hands back a handle that drives graceful shutdown.

use crate::config::AgentConfig;
use crate::dispatcher::{DeliveryOutcome, Dispatcher};
use crate::probe::ProbeService;
use crate::sampler::{RuntimeSampler, SystemSampler};
use crate::sink::MetricsSink;
use pulse_core::{PayloadCodec, RelayError};
use std::fs;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

const DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Agent {
    config: AgentConfig,
}

/// Handle to a running agent. Dropping it does not stop the agent; call
/// [`AgentHandle::stop`] for an orderly shutdown that drains outstanding
/// delivery results.
pub struct AgentHandle {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Agent {
    pub fn new(config: AgentConfig) -> Self {
        Agent { config }
    }

    /// Spawns the probe tasks, the dispatcher and the result consumer.
    pub fn start(self) -> Result<AgentHandle, RelayError> {
        self.config.validate()?;

        let codec = build_codec(&self.config)?;
        let sink = MetricsSink::new(&self.config.server_address, DELIVERY_TIMEOUT)?;

        let cancel = CancellationToken::new();
        let poll_interval = Duration::from_secs(self.config.poll_interval_seconds);

        let mut tasks = Vec::new();
        let mut probes = Vec::new();
        let (runtime_probe, runtime_handle) =
            ProbeService::new(Box::new(RuntimeSampler::new()), poll_interval);
        let (system_probe, system_handle) =
            ProbeService::new(Box::new(SystemSampler::new()), poll_interval);
        tasks.push(tokio::spawn(runtime_probe.run(cancel.clone())));
        tasks.push(tokio::spawn(system_probe.run(cancel.clone())));
        probes.push(runtime_handle);
        probes.push(system_handle);

        let (results_tx, results_rx) = mpsc::channel(32);
        let dispatcher = Dispatcher::new(
            probes,
            sink,
            codec,
            self.config.rate_limit,
            Duration::from_secs(self.config.report_interval_seconds),
            results_tx,
        );
        tasks.push(tokio::spawn(dispatcher.run(cancel.clone())));
        tasks.push(tokio::spawn(consume_results(results_rx)));

        info!(
            "agent started, reporting to {} every {}s",
            self.config.server_address, self.config.report_interval_seconds
        );

        Ok(AgentHandle { cancel, tasks })
    }
}

impl AgentHandle {
    /// Stops issuing report cycles, lets in-flight deliveries finish and
    /// drains every outstanding result before returning.
    pub async fn stop(self) {
        info!("agent stopping, waiting for outstanding deliveries");
        self.cancel.cancel();
        for task in self.tasks {
            if let Err(err) = task.await {
                error!("agent task panicked during shutdown: {err}");
            }
        }
        info!("agent stopped");
    }
}

/// The result consumer runs until every sender (dispatcher and in-flight
/// deliveries) is gone, so shutdown naturally drains all outcomes.
async fn consume_results(mut results: mpsc::Receiver<DeliveryOutcome>) {
    while let Some(outcome) = results.recv().await {
        match outcome.result {
            Ok(()) => info!("{} metrics delivered", outcome.probe),
            Err(err) => error!("{} metrics delivery failed: {err}", outcome.probe),
        }
    }
}

fn build_codec(config: &AgentConfig) -> Result<PayloadCodec, RelayError> {
    let mut codec = PayloadCodec::new();
    if let Some(path) = &config.crypto_key_path {
        let pem = fs::read_to_string(path)
            .map_err(|e| RelayError::Payload(format!("crypto key {}: {e}", path.display())))?;
        codec = codec.with_public_key_pem(&pem)?;
    }
    if let Some(key) = &config.secret_key {
        codec = codec.with_signing_key(key.as_bytes());
    }
    Ok(codec)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn agent_reports_to_the_collector_and_stops_cleanly() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/updates/")
            .match_header("content-encoding", "gzip")
            .with_status(200)
            .expect_at_least(2)
            .create_async()
            .await;

        let config = AgentConfig {
            server_address: server.host_with_port(),
            report_interval_seconds: 1,
            poll_interval_seconds: 1,
            rate_limit: 2,
            secret_key: Some("integration secret".to_string()),
            crypto_key_path: None,
        };

        let handle = Agent::new(config).start().unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        handle.stop().await;

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn missing_crypto_key_file_fails_startup() {
        let config = AgentConfig {
            crypto_key_path: Some("/definitely/not/here.pem".into()),
            ..Default::default()
        };
        assert!(Agent::new(config).start().is_err());
    }

    #[tokio::test]
    async fn invalid_config_fails_startup() {
        let config = AgentConfig {
            rate_limit: 0,
            ..Default::default()
        };
        assert!(Agent::new(config).start().is_err());
    }
}
