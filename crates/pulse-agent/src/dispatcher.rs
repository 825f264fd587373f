// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Report-cycle orchestration.
//!
//! On every report tick the dispatcher snapshots each probe, seals the batch
//! and ships it under the admission gate. Batches are independent units of
//! work: one probe's failure never blocks or corrupts another's delivery.

use crate::probe::ProbeHandle;
use crate::sink::MetricsSink;
use pulse_core::{retry, PayloadCodec, RelayError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{interval, timeout};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// A probe that stops answering snapshots should not stall the whole cycle.
const SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-batch delivery result, consumed by the agent's top-level loop.
#[derive(Debug)]
pub struct DeliveryOutcome {
    pub probe: &'static str,
    pub result: Result<(), RelayError>,
}

pub struct Dispatcher {
    probes: Vec<ProbeHandle>,
    sink: Arc<MetricsSink>,
    codec: Arc<PayloadCodec>,
    gate: Arc<Semaphore>,
    report_interval: Duration,
    results: mpsc::Sender<DeliveryOutcome>,
}

impl Dispatcher {
    pub fn new(
        probes: Vec<ProbeHandle>,
        sink: MetricsSink,
        codec: PayloadCodec,
        rate_limit: usize,
        report_interval: Duration,
        results: mpsc::Sender<DeliveryOutcome>,
    ) -> Self {
        Dispatcher {
            probes,
            sink: Arc::new(sink),
            codec: Arc::new(codec),
            gate: Arc::new(Semaphore::new(rate_limit.max(1))),
            report_interval,
            results,
        }
    }

    /// Runs report cycles until cancelled, then lets already-started
    /// deliveries finish or fail naturally before returning.
    pub async fn run(self, cancel: CancellationToken) {
        debug!("dispatcher started");

        let mut ticker = interval(self.report_interval);
        ticker.tick().await; // discard first tick, which is instantaneous

        let mut inflight: JoinSet<()> = JoinSet::new();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    for probe in &self.probes {
                        let job = DeliveryJob {
                            probe: probe.clone(),
                            sink: Arc::clone(&self.sink),
                            codec: Arc::clone(&self.codec),
                            gate: Arc::clone(&self.gate),
                            results: self.results.clone(),
                        };
                        inflight.spawn(job.run());
                    }
                }
                Some(_) = inflight.join_next(), if !inflight.is_empty() => {}
            }
        }

        debug!("dispatcher stopping, draining in-flight deliveries");
        while inflight.join_next().await.is_some() {}
        debug!("dispatcher stopped");
    }
}

struct DeliveryJob {
    probe: ProbeHandle,
    sink: Arc<MetricsSink>,
    codec: Arc<PayloadCodec>,
    gate: Arc<Semaphore>,
    results: mpsc::Sender<DeliveryOutcome>,
}

impl DeliveryJob {
    async fn run(self) {
        let outcome = DeliveryOutcome {
            probe: self.probe.name(),
            result: self.deliver().await,
        };
        let _ = self.results.send(outcome).await;
    }

    async fn deliver(&self) -> Result<(), RelayError> {
        let snapshot = timeout(SNAPSHOT_TIMEOUT, self.probe.snapshot())
            .await
            .map_err(|_| RelayError::Timeout(format!("{} snapshot", self.probe.name())))??;

        let sealed = self.codec.seal(&snapshot.metrics)?;

        // Held across all attempts: the admission gate bounds in-flight
        // deliveries system-wide, not individual tries.
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| RelayError::Unavailable("admission gate closed".into()))?;

        retry::with_retries(self.probe.name(), || self.sink.send(&sealed)).await?;

        self.probe.ack(snapshot.poll_count);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::ProbeService;
    use crate::sampler::Sampler;
    use std::collections::HashMap;

    struct StaticSampler;

    impl Sampler for StaticSampler {
        fn name(&self) -> &'static str {
            "static"
        }

        fn refresh(&mut self, samples: &mut HashMap<String, f64>) {
            samples.insert("HeapAlloc".to_string(), 1024.0);
        }
    }

    fn spawn_probe(cancel: &CancellationToken) -> ProbeHandle {
        let (service, handle) =
            ProbeService::new(Box::new(StaticSampler), Duration::from_millis(10));
        tokio::spawn(service.run(cancel.clone()));
        handle
    }

    #[tokio::test]
    async fn delivers_each_probe_batch_and_reports_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/updates/")
            .match_header("content-encoding", "gzip")
            .with_status(200)
            .expect_at_least(2)
            .create_async()
            .await;

        let cancel = CancellationToken::new();
        let probes = vec![spawn_probe(&cancel), spawn_probe(&cancel)];
        let (results_tx, mut results_rx) = mpsc::channel(16);

        let sink = MetricsSink::new(&server.host_with_port(), Duration::from_secs(5)).unwrap();
        let dispatcher = Dispatcher::new(
            probes,
            sink,
            PayloadCodec::new(),
            1,
            Duration::from_millis(50),
            results_tx,
        );
        let dispatcher_task = tokio::spawn(dispatcher.run(cancel.clone()));

        let first = results_rx.recv().await.expect("outcome");
        assert!(first.result.is_ok());
        let second = results_rx.recv().await.expect("outcome");
        assert!(second.result.is_ok());

        cancel.cancel();
        dispatcher_task.await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn fatal_rejection_is_reported_after_a_single_attempt() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/updates/")
            .with_status(400)
            .expect(1)
            .create_async()
            .await;

        let cancel = CancellationToken::new();
        let probes = vec![spawn_probe(&cancel)];
        let (results_tx, mut results_rx) = mpsc::channel(16);

        let sink = MetricsSink::new(&server.host_with_port(), Duration::from_secs(5)).unwrap();
        let dispatcher = Dispatcher::new(
            probes,
            sink,
            PayloadCodec::new(),
            1,
            Duration::from_millis(50),
            results_tx,
        );
        let dispatcher_task = tokio::spawn(dispatcher.run(cancel.clone()));

        let outcome = results_rx.recv().await.expect("outcome");
        assert!(matches!(
            outcome.result,
            Err(RelayError::Protocol { status: 400, .. })
        ));

        cancel.cancel();
        dispatcher_task.await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn successful_delivery_acks_the_probe_baseline() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/updates/")
            .with_status(200)
            .expect_at_least(1)
            .create_async()
            .await;

        let cancel = CancellationToken::new();
        let probe = spawn_probe(&cancel);
        let (results_tx, mut results_rx) = mpsc::channel(16);

        let sink = MetricsSink::new(&server.host_with_port(), Duration::from_secs(5)).unwrap();
        let dispatcher = Dispatcher::new(
            vec![probe.clone()],
            sink,
            PayloadCodec::new(),
            1,
            Duration::from_millis(50),
            results_tx,
        );
        let dispatcher_task = tokio::spawn(dispatcher.run(cancel.clone()));

        results_rx.recv().await.expect("outcome").result.unwrap();

        // The ack reset the counter: whatever polls remain accumulated only
        // after the delivered snapshot was taken.
        let snap = probe.snapshot().await.unwrap();
        assert!(snap.poll_count < 10);

        cancel.cancel();
        dispatcher_task.await.unwrap();
    }
}
