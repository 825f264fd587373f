// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! In-process backend.
//!
//! A single service task owns both mappings and processes commands serially,
//! so every single-metric write and every whole batch is one critical
//! section. [`MemStore`] is the cheap-to-clone handle that implements
//! [`Repository`] by sending commands and awaiting oneshot responses.

use crate::repository::Repository;
use crate::snapshot;
use async_trait::async_trait;
use pulse_core::{Metric, MetricKind, RelayError};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

#[derive(Debug)]
enum StoreCommand {
    AddCounter {
        name: String,
        delta: i64,
        resp: oneshot::Sender<Result<(), RelayError>>,
    },
    SetCounter {
        name: String,
        value: i64,
        resp: oneshot::Sender<Result<(), RelayError>>,
    },
    SetGauge {
        name: String,
        value: f64,
        resp: oneshot::Sender<Result<(), RelayError>>,
    },
    GetCounter {
        name: String,
        resp: oneshot::Sender<Result<i64, RelayError>>,
    },
    GetGauge {
        name: String,
        resp: oneshot::Sender<Result<f64, RelayError>>,
    },
    AllCounters {
        resp: oneshot::Sender<HashMap<String, i64>>,
    },
    AllGauges {
        resp: oneshot::Sender<HashMap<String, f64>>,
    },
    ApplyBatch {
        metrics: Vec<Metric>,
        resp: oneshot::Sender<Result<(), RelayError>>,
    },
    Save {
        resp: oneshot::Sender<Result<(), RelayError>>,
    },
    Ping {
        resp: oneshot::Sender<()>,
    },
    Shutdown,
}

/// Construction parameters for the in-process backend.
#[derive(Debug, Clone, Default)]
pub struct MemStoreConfig {
    /// Replay the snapshot file into the store before serving traffic.
    pub restore: bool,
    /// Snapshot file location; `None` disables persistence entirely.
    pub snapshot_path: Option<PathBuf>,
    /// Zero means synchronous mode: every successful write triggers an
    /// immediate snapshot. Non-zero spawns a periodic saver task.
    pub snapshot_interval: Duration,
}

/// Handle to the in-process store.
#[derive(Clone)]
pub struct MemStore {
    tx: mpsc::UnboundedSender<StoreCommand>,
    cancel: CancellationToken,
}

impl MemStore {
    /// Restores state if configured, then spawns the service task and the
    /// periodic saver (when a path and a non-zero interval are set).
    pub fn init(config: MemStoreConfig) -> Result<Self, RelayError> {
        let mut counters: HashMap<String, i64> = HashMap::new();
        let mut gauges: HashMap<String, f64> = HashMap::new();

        if config.restore {
            if let Some(path) = &config.snapshot_path {
                for metric in snapshot::load(path)? {
                    match metric.kind {
                        MetricKind::Counter => {
                            counters.insert(metric.id.clone(), metric.counter_delta()?);
                        }
                        MetricKind::Gauge => {
                            gauges.insert(metric.id.clone(), metric.gauge_value()?);
                        }
                    }
                }
                debug!(
                    "restored {} counters and {} gauges from {}",
                    counters.len(),
                    gauges.len(),
                    path.display()
                );
            }
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let sync_save = config.snapshot_interval.is_zero();
        let service = StoreService {
            counters,
            gauges,
            snapshot_path: config.snapshot_path.clone(),
            sync_save,
            rx,
        };
        tokio::spawn(service.run());

        let store = MemStore { tx, cancel };

        if let Some(path) = config.snapshot_path {
            if !sync_save {
                tokio::spawn(run_saver(
                    store.clone(),
                    path,
                    config.snapshot_interval,
                    store.cancel.clone(),
                ));
            }
        }

        Ok(store)
    }

    fn send(&self, command: StoreCommand) -> Result<(), RelayError> {
        self.tx
            .send(command)
            .map_err(|_| RelayError::Unavailable("store service stopped".into()))
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> StoreCommand,
    ) -> Result<T, RelayError> {
        let (resp_tx, resp_rx) = oneshot::channel();
        self.send(make(resp_tx))?;
        resp_rx
            .await
            .map_err(|_| RelayError::Unavailable("store service dropped the request".into()))
    }

    /// Takes a snapshot of the current contents and writes it to disk.
    pub async fn save(&self) -> Result<(), RelayError> {
        self.request(|resp| StoreCommand::Save { resp }).await?
    }
}

#[async_trait]
impl Repository for MemStore {
    async fn add_counter(&self, name: &str, delta: i64) -> Result<(), RelayError> {
        let name = name.to_string();
        self.request(|resp| StoreCommand::AddCounter { name, delta, resp })
            .await?
    }

    async fn set_gauge(&self, name: &str, value: f64) -> Result<(), RelayError> {
        let name = name.to_string();
        self.request(|resp| StoreCommand::SetGauge { name, value, resp })
            .await?
    }

    async fn set_counter(&self, name: &str, value: i64) -> Result<(), RelayError> {
        let name = name.to_string();
        self.request(|resp| StoreCommand::SetCounter { name, value, resp })
            .await?
    }

    async fn counter(&self, name: &str) -> Result<i64, RelayError> {
        let name = name.to_string();
        self.request(|resp| StoreCommand::GetCounter { name, resp })
            .await?
    }

    async fn gauge(&self, name: &str) -> Result<f64, RelayError> {
        let name = name.to_string();
        self.request(|resp| StoreCommand::GetGauge { name, resp })
            .await?
    }

    async fn all_counters(&self) -> Result<HashMap<String, i64>, RelayError> {
        self.request(|resp| StoreCommand::AllCounters { resp }).await
    }

    async fn all_gauges(&self) -> Result<HashMap<String, f64>, RelayError> {
        self.request(|resp| StoreCommand::AllGauges { resp }).await
    }

    async fn apply_batch(&self, metrics: &[Metric]) -> Result<(), RelayError> {
        let metrics = metrics.to_vec();
        self.request(|resp| StoreCommand::ApplyBatch { metrics, resp })
            .await?
    }

    async fn check_health(&self, deadline: Duration) -> Result<(), RelayError> {
        tokio::time::timeout(deadline, self.request(|resp| StoreCommand::Ping { resp }))
            .await
            .map_err(|_| RelayError::Timeout("store health check".into()))?
    }

    async fn close(&self) -> Result<(), RelayError> {
        self.cancel.cancel();
        // A final save so a graceful shutdown never loses the tail of writes.
        if let Err(err) = self.save().await {
            warn!("final snapshot save failed: {err}");
        }
        let _ = self.tx.send(StoreCommand::Shutdown);
        Ok(())
    }
}

struct StoreService {
    counters: HashMap<String, i64>,
    gauges: HashMap<String, f64>,
    snapshot_path: Option<PathBuf>,
    sync_save: bool,
    rx: mpsc::UnboundedReceiver<StoreCommand>,
}

impl StoreService {
    async fn run(mut self) {
        debug!("store service started");

        while let Some(command) = self.rx.recv().await {
            match command {
                StoreCommand::AddCounter { name, delta, resp } => {
                    // Counter accumulation wraps on overflow, two's-complement.
                    let entry = self.counters.entry(name).or_insert(0);
                    *entry = entry.wrapping_add(delta);
                    self.save_if_sync();
                    let _ = resp.send(Ok(()));
                }
                StoreCommand::SetCounter { name, value, resp } => {
                    self.counters.insert(name, value);
                    self.save_if_sync();
                    let _ = resp.send(Ok(()));
                }
                StoreCommand::SetGauge { name, value, resp } => {
                    self.gauges.insert(name, value);
                    self.save_if_sync();
                    let _ = resp.send(Ok(()));
                }
                StoreCommand::GetCounter { name, resp } => {
                    let result = self
                        .counters
                        .get(&name)
                        .copied()
                        .ok_or(RelayError::NotFound(name));
                    let _ = resp.send(result);
                }
                StoreCommand::GetGauge { name, resp } => {
                    let result = self
                        .gauges
                        .get(&name)
                        .copied()
                        .ok_or(RelayError::NotFound(name));
                    let _ = resp.send(result);
                }
                StoreCommand::AllCounters { resp } => {
                    let _ = resp.send(self.counters.clone());
                }
                StoreCommand::AllGauges { resp } => {
                    let _ = resp.send(self.gauges.clone());
                }
                StoreCommand::ApplyBatch { metrics, resp } => {
                    let _ = resp.send(self.apply_batch(metrics));
                }
                StoreCommand::Save { resp } => {
                    let _ = resp.send(self.save());
                }
                StoreCommand::Ping { resp } => {
                    let _ = resp.send(());
                }
                StoreCommand::Shutdown => {
                    debug!("store service shutting down");
                    break;
                }
            }
        }

        debug!("store service stopped");
    }

    /// The whole batch is validated up front so a bad record leaves no
    /// partial subset behind, then applied inside this single command.
    fn apply_batch(&mut self, metrics: Vec<Metric>) -> Result<(), RelayError> {
        for metric in &metrics {
            metric.validate()?;
        }
        for metric in metrics {
            match metric.kind {
                MetricKind::Counter => {
                    let entry = self.counters.entry(metric.id).or_insert(0);
                    *entry = entry.wrapping_add(metric.delta.unwrap_or(0));
                }
                MetricKind::Gauge => {
                    self.gauges.insert(metric.id, metric.value.unwrap_or(0.0));
                }
            }
        }
        self.save_if_sync();
        Ok(())
    }

    fn save(&self) -> Result<(), RelayError> {
        match &self.snapshot_path {
            Some(path) => snapshot::save(path, &self.counters, &self.gauges),
            None => Ok(()),
        }
    }

    /// Snapshot durability is best-effort: a failed save is logged and never
    /// rolls back the in-memory write that triggered it.
    fn save_if_sync(&self) {
        if self.sync_save && self.snapshot_path.is_some() {
            if let Err(err) = self.save() {
                error!("synchronous snapshot save failed: {err}");
            }
        }
    }
}

async fn run_saver(
    store: MemStore,
    path: PathBuf,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = interval(period);
    ticker.tick().await; // the first tick fires immediately

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("snapshot saver stopped");
                return;
            }
            _ = ticker.tick() => {
                if let Err(err) = store.save().await {
                    error!("periodic snapshot to {} failed: {err}", path.display());
                }
            }
        }
    }
}
