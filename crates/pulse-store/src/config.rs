// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Store configuration and backend selection.
//!
//! The backend is chosen exactly once during wiring: a database DSN selects
//! PostgreSQL, otherwise the in-process store with optional snapshot
//! persistence is used. No component reads ambient global state afterwards.

use crate::memory::{MemStore, MemStoreConfig};
use crate::postgres::PgStore;
use crate::repository::Repository;
use pulse_core::RelayError;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// PostgreSQL DSN. When set, the relational backend is used and the
    /// snapshot settings below are ignored.
    pub database_dsn: Option<String>,
    /// Replay the snapshot file at startup (in-process backend only).
    pub restore: bool,
    /// Snapshot file path; `None` disables persistence.
    pub snapshot_path: Option<PathBuf>,
    /// Seconds between snapshot saves; zero means save synchronously after
    /// every write.
    pub snapshot_interval_seconds: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_dsn: None,
            restore: true,
            snapshot_path: Some(PathBuf::from("metrics.snapshot")),
            snapshot_interval_seconds: 300,
        }
    }
}

impl StoreConfig {
    /// Reads configuration from the environment, falling back to defaults.
    pub fn from_env() -> Result<Self, RelayError> {
        let defaults = Self::default();

        let database_dsn = env::var("DATABASE_DSN").ok().filter(|dsn| !dsn.is_empty());
        let restore = env::var("RESTORE")
            .map(|val| val.to_lowercase() != "false")
            .unwrap_or(defaults.restore);
        let snapshot_path = match env::var("FILE_STORAGE_PATH") {
            Ok(path) if path.is_empty() => None,
            Ok(path) => Some(PathBuf::from(path)),
            Err(_) => defaults.snapshot_path,
        };
        let snapshot_interval_seconds = env::var("STORE_INTERVAL")
            .ok()
            .and_then(|val| val.parse::<u64>().ok())
            .unwrap_or(defaults.snapshot_interval_seconds);

        let config = Self {
            database_dsn,
            restore,
            snapshot_path,
            snapshot_interval_seconds,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), RelayError> {
        if let Some(dsn) = &self.database_dsn {
            if dsn.trim().is_empty() {
                return Err(RelayError::Payload("database DSN must not be blank".into()));
            }
        }
        if self.restore && self.database_dsn.is_none() && self.snapshot_path.is_none() {
            return Err(RelayError::Payload(
                "restore requested but no snapshot path configured".into(),
            ));
        }
        Ok(())
    }

    /// Builds the repository this configuration describes.
    pub async fn open(&self) -> Result<Arc<dyn Repository>, RelayError> {
        self.validate()?;
        match &self.database_dsn {
            Some(dsn) => {
                info!("opening postgres-backed metrics store");
                Ok(Arc::new(PgStore::init(dsn).await?))
            }
            None => {
                info!("opening in-process metrics store");
                let store = MemStore::init(MemStoreConfig {
                    restore: self.restore,
                    snapshot_path: self.snapshot_path.clone(),
                    snapshot_interval: Duration::from_secs(self.snapshot_interval_seconds),
                })?;
                Ok(Arc::new(store))
            }
        }
    }
}
