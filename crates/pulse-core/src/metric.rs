// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The metric data model.
//!
//! A [`Metric`] carries exactly one of the two value fields, determined by
//! its kind: counters accumulate signed 64-bit deltas, gauges overwrite a
//! 64-bit float. The serde field names (`id`, `type`, `delta`, `value`) are
//! the wire and snapshot-file format.

use crate::error::RelayError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Counter,
    Gauge,
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricKind::Counter => write!(f, "counter"),
            MetricKind::Gauge => write!(f, "gauge"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: MetricKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

impl Metric {
    pub fn counter(id: impl Into<String>, delta: i64) -> Self {
        Metric {
            id: id.into(),
            kind: MetricKind::Counter,
            delta: Some(delta),
            value: None,
        }
    }

    pub fn gauge(id: impl Into<String>, value: f64) -> Self {
        Metric {
            id: id.into(),
            kind: MetricKind::Gauge,
            delta: None,
            value: Some(value),
        }
    }

    /// Checks the name/kind/value invariant. A violation is a validation
    /// error, never a storage error.
    pub fn validate(&self) -> Result<(), RelayError> {
        if self.id.is_empty() {
            return Err(RelayError::InvalidMetric("missing metric name".into()));
        }
        match self.kind {
            MetricKind::Counter => {
                if self.delta.is_none() {
                    return Err(RelayError::InvalidMetric(format!(
                        "counter {} carries no delta",
                        self.id
                    )));
                }
                if self.value.is_some() {
                    return Err(RelayError::InvalidMetric(format!(
                        "counter {} carries a gauge value",
                        self.id
                    )));
                }
            }
            MetricKind::Gauge => {
                if self.value.is_none() {
                    return Err(RelayError::InvalidMetric(format!(
                        "gauge {} carries no value",
                        self.id
                    )));
                }
                if self.delta.is_some() {
                    return Err(RelayError::InvalidMetric(format!(
                        "gauge {} carries a counter delta",
                        self.id
                    )));
                }
            }
        }
        Ok(())
    }

    /// The counter delta, after validation.
    pub fn counter_delta(&self) -> Result<i64, RelayError> {
        self.validate()?;
        self.delta
            .ok_or_else(|| RelayError::InvalidMetric(format!("{} is not a counter", self.id)))
    }

    /// The gauge value, after validation.
    pub fn gauge_value(&self) -> Result<f64, RelayError> {
        self.validate()?;
        self.value
            .ok_or_else(|| RelayError::InvalidMetric(format!("{} is not a gauge", self.id)))
    }
}
