// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Collector probes.
//!
//! Each probe is one long-lived task that refreshes its sampler on a poll
//! ticker and answers dispatcher commands over a channel. Because the timer
//! and the command channel are served by the same select loop, a snapshot
//! always reflects the sample state as of that moment.

use crate::sampler::Sampler;
use pulse_core::{Metric, RelayError};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug)]
pub enum ProbeCommand {
    /// Respond with the current sample packaged as metrics.
    Snapshot {
        resp: oneshot::Sender<ProbeSnapshot>,
    },
    /// A delivery containing `baseline` polls succeeded; drop that many from
    /// the local counter without losing polls accumulated since.
    Ack { baseline: i64 },
}

#[derive(Debug, Clone)]
pub struct ProbeSnapshot {
    pub metrics: Vec<Metric>,
    /// The poll counter as of this snapshot; returned in the ack on
    /// successful delivery.
    pub poll_count: i64,
}

#[derive(Clone)]
pub struct ProbeHandle {
    name: &'static str,
    tx: mpsc::Sender<ProbeCommand>,
}

impl ProbeHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub async fn snapshot(&self) -> Result<ProbeSnapshot, RelayError> {
        let (resp_tx, resp_rx) = oneshot::channel();
        self.tx
            .send(ProbeCommand::Snapshot { resp: resp_tx })
            .await
            .map_err(|_| RelayError::Unavailable(format!("{} probe stopped", self.name)))?;
        resp_rx
            .await
            .map_err(|_| RelayError::Unavailable(format!("{} probe dropped the request", self.name)))
    }

    /// Non-blocking by design: a terminated probe simply misses the ack.
    pub fn ack(&self, baseline: i64) {
        if self.tx.try_send(ProbeCommand::Ack { baseline }).is_err() {
            debug!("{} probe gone, ack dropped", self.name);
        }
    }
}

pub struct ProbeService {
    sampler: Box<dyn Sampler>,
    samples: HashMap<String, f64>,
    poll_count: i64,
    poll_interval: Duration,
    rx: mpsc::Receiver<ProbeCommand>,
}

impl ProbeService {
    pub fn new(sampler: Box<dyn Sampler>, poll_interval: Duration) -> (Self, ProbeHandle) {
        let name = sampler.name();
        let (tx, rx) = mpsc::channel(16);
        let service = ProbeService {
            sampler,
            samples: HashMap::new(),
            poll_count: 0,
            poll_interval,
            rx,
        };
        (service, ProbeHandle { name, tx })
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        debug!("{} probe started", self.sampler.name());

        let mut ticker = interval(self.poll_interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.sampler.refresh(&mut self.samples);
                    self.poll_count += 1;
                }
                command = self.rx.recv() => match command {
                    None => break,
                    Some(ProbeCommand::Snapshot { resp }) => {
                        let _ = resp.send(self.snapshot());
                    }
                    Some(ProbeCommand::Ack { baseline }) => {
                        self.poll_count = (self.poll_count - baseline).max(0);
                    }
                },
            }
        }

        debug!("{} probe stopped", self.sampler.name());
    }

    fn snapshot(&self) -> ProbeSnapshot {
        let mut metrics: Vec<Metric> = self
            .samples
            .iter()
            .map(|(name, value)| Metric::gauge(name.clone(), *value))
            .collect();
        metrics.push(Metric::counter("PollCount", self.poll_count));
        ProbeSnapshot {
            metrics,
            poll_count: self.poll_count,
        }
    }
}
