// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The storage contract shared by both backends.

use async_trait::async_trait;
use pulse_core::{Metric, RelayError};
use std::collections::HashMap;
use std::time::Duration;

/// Atomic read/accumulate/overwrite operations over two disjoint mappings:
/// `name -> counter` and `name -> gauge`.
///
/// Counter writes accumulate, gauge writes overwrite, and no concurrent
/// reader ever observes a partially applied write or batch. The repository
/// reports errors but never retries internally; retry granularity is a
/// caller decision.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Adds `delta` to the named counter, creating it at `delta` if absent.
    async fn add_counter(&self, name: &str, delta: i64) -> Result<(), RelayError>;

    /// Overwrites the named gauge, creating it if absent.
    async fn set_gauge(&self, name: &str, value: f64) -> Result<(), RelayError>;

    /// Force-sets a counter to an absolute value, bypassing accumulation.
    /// Used only by snapshot restore.
    async fn set_counter(&self, name: &str, value: i64) -> Result<(), RelayError>;

    /// Fails with [`RelayError::NotFound`] for an unknown name, never a
    /// silent zero.
    async fn counter(&self, name: &str) -> Result<i64, RelayError>;

    async fn gauge(&self, name: &str) -> Result<f64, RelayError>;

    /// Point-in-time copy, never a live view.
    async fn all_counters(&self) -> Result<HashMap<String, i64>, RelayError>;

    async fn all_gauges(&self) -> Result<HashMap<String, f64>, RelayError>;

    /// Applies every metric per its kind, atomically as a unit: if the batch
    /// fails, no partial subset is visible.
    async fn apply_batch(&self, metrics: &[Metric]) -> Result<(), RelayError>;

    /// Liveness probe bounded by `deadline`; a miss yields
    /// [`RelayError::Timeout`] rather than hanging.
    async fn check_health(&self, deadline: Duration) -> Result<(), RelayError>;

    /// Releases background tasks and connections. Idempotent.
    async fn close(&self) -> Result<(), RelayError>;
}
