// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! PostgreSQL backend.
//!
//! Every write opens a transaction and upserts with `ON CONFLICT`, letting
//! the database serialize concurrent writers on the `(name, kind)` key;
//! counter accumulation happens in the `DO UPDATE` arm so two first-writers
//! for a fresh name can never race to duplicate inserts. Any failure rolls
//! the transaction back. Durability comes from the database itself, so this
//! backend carries no snapshot machinery.

use crate::repository::Repository;
use async_trait::async_trait;
use pulse_core::{Metric, MetricKind, RelayError};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_postgres::{Client, NoTls, Transaction};
use tracing::{debug, error};

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS metrics (
    id BIGSERIAL PRIMARY KEY,
    name VARCHAR(100) NOT NULL,
    kind VARCHAR(16) NOT NULL,
    delta BIGINT,
    value DOUBLE PRECISION,
    UNIQUE (name, kind)
)";

/// Maps a driver error into the taxonomy, preserving the SQLSTATE so the
/// resilience classifier can recognize broken connections.
fn map_pg(err: tokio_postgres::Error) -> RelayError {
    let code = err.code().map(|state| state.code().to_string());
    RelayError::Database {
        code,
        message: err.to_string(),
    }
}

pub struct PgStore {
    client: Mutex<Client>,
    driver: std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl PgStore {
    /// Connects, spawns the connection driver task and ensures the metrics
    /// table exists.
    pub async fn init(dsn: &str) -> Result<Self, RelayError> {
        let (client, connection) = tokio_postgres::connect(dsn, NoTls).await.map_err(map_pg)?;

        let driver = tokio::spawn(async move {
            if let Err(err) = connection.await {
                error!("postgres connection terminated: {err}");
            }
        });

        client.execute(CREATE_TABLE, &[]).await.map_err(map_pg)?;
        debug!("postgres store ready");

        Ok(PgStore {
            client: Mutex::new(client),
            driver: std::sync::Mutex::new(Some(driver)),
        })
    }

    async fn upsert_counter(
        tx: &Transaction<'_>,
        name: &str,
        delta: i64,
        accumulate: bool,
    ) -> Result<(), RelayError> {
        let statement = if accumulate {
            "INSERT INTO metrics (name, kind, delta) VALUES ($1, 'counter', $2)
             ON CONFLICT (name, kind) DO UPDATE SET delta = metrics.delta + EXCLUDED.delta"
        } else {
            "INSERT INTO metrics (name, kind, delta) VALUES ($1, 'counter', $2)
             ON CONFLICT (name, kind) DO UPDATE SET delta = EXCLUDED.delta"
        };
        tx.execute(statement, &[&name, &delta]).await.map_err(map_pg)?;
        Ok(())
    }

    async fn upsert_gauge(tx: &Transaction<'_>, name: &str, value: f64) -> Result<(), RelayError> {
        tx.execute(
            "INSERT INTO metrics (name, kind, value) VALUES ($1, 'gauge', $2)
             ON CONFLICT (name, kind) DO UPDATE SET value = EXCLUDED.value",
            &[&name, &value],
        )
        .await
        .map_err(map_pg)?;
        Ok(())
    }
}

#[async_trait]
impl Repository for PgStore {
    async fn add_counter(&self, name: &str, delta: i64) -> Result<(), RelayError> {
        let mut client = self.client.lock().await;
        let tx = client.transaction().await.map_err(map_pg)?;
        Self::upsert_counter(&tx, name, delta, true).await?;
        tx.commit().await.map_err(map_pg)
    }

    async fn set_gauge(&self, name: &str, value: f64) -> Result<(), RelayError> {
        let mut client = self.client.lock().await;
        let tx = client.transaction().await.map_err(map_pg)?;
        Self::upsert_gauge(&tx, name, value).await?;
        tx.commit().await.map_err(map_pg)
    }

    async fn set_counter(&self, name: &str, value: i64) -> Result<(), RelayError> {
        let mut client = self.client.lock().await;
        let tx = client.transaction().await.map_err(map_pg)?;
        Self::upsert_counter(&tx, name, value, false).await?;
        tx.commit().await.map_err(map_pg)
    }

    async fn counter(&self, name: &str) -> Result<i64, RelayError> {
        let client = self.client.lock().await;
        let row = client
            .query_opt(
                "SELECT delta FROM metrics WHERE kind = 'counter' AND name = $1",
                &[&name],
            )
            .await
            .map_err(map_pg)?;
        match row {
            Some(row) => row.try_get(0).map_err(map_pg),
            None => Err(RelayError::NotFound(name.to_string())),
        }
    }

    async fn gauge(&self, name: &str) -> Result<f64, RelayError> {
        let client = self.client.lock().await;
        let row = client
            .query_opt(
                "SELECT value FROM metrics WHERE kind = 'gauge' AND name = $1",
                &[&name],
            )
            .await
            .map_err(map_pg)?;
        match row {
            Some(row) => row.try_get(0).map_err(map_pg),
            None => Err(RelayError::NotFound(name.to_string())),
        }
    }

    async fn all_counters(&self) -> Result<HashMap<String, i64>, RelayError> {
        let client = self.client.lock().await;
        let rows = client
            .query("SELECT name, delta FROM metrics WHERE kind = 'counter'", &[])
            .await
            .map_err(map_pg)?;

        let mut counters = HashMap::with_capacity(rows.len());
        for row in rows {
            let name: String = row.try_get(0).map_err(map_pg)?;
            let delta: i64 = row.try_get(1).map_err(map_pg)?;
            counters.insert(name, delta);
        }
        Ok(counters)
    }

    async fn all_gauges(&self) -> Result<HashMap<String, f64>, RelayError> {
        let client = self.client.lock().await;
        let rows = client
            .query("SELECT name, value FROM metrics WHERE kind = 'gauge'", &[])
            .await
            .map_err(map_pg)?;

        let mut gauges = HashMap::with_capacity(rows.len());
        for row in rows {
            let name: String = row.try_get(0).map_err(map_pg)?;
            let value: f64 = row.try_get(1).map_err(map_pg)?;
            gauges.insert(name, value);
        }
        Ok(gauges)
    }

    /// One transaction for the whole batch: all-or-nothing.
    async fn apply_batch(&self, metrics: &[Metric]) -> Result<(), RelayError> {
        for metric in metrics {
            metric.validate()?;
        }

        let mut client = self.client.lock().await;
        let tx = client.transaction().await.map_err(map_pg)?;
        for metric in metrics {
            match metric.kind {
                MetricKind::Counter => {
                    Self::upsert_counter(&tx, &metric.id, metric.delta.unwrap_or(0), true).await?;
                }
                MetricKind::Gauge => {
                    Self::upsert_gauge(&tx, &metric.id, metric.value.unwrap_or(0.0)).await?;
                }
            }
        }
        tx.commit().await.map_err(map_pg)
    }

    async fn check_health(&self, deadline: Duration) -> Result<(), RelayError> {
        let client = self.client.lock().await;
        tokio::time::timeout(deadline, client.simple_query("SELECT 1"))
            .await
            .map_err(|_| RelayError::Timeout("postgres health check".into()))?
            .map_err(map_pg)?;
        Ok(())
    }

    async fn close(&self) -> Result<(), RelayError> {
        if let Ok(mut guard) = self.driver.lock() {
            if let Some(driver) = guard.take() {
                driver.abort();
            }
        }
        Ok(())
    }
}
