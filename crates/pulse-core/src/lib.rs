// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Shared core for the pulse metrics pipeline: the metric data model, the
//! wire payload codec, the error taxonomy with its transient/fatal
//! classifier, and the retry combinator built on top of it.

pub mod error;
pub mod metric;
pub mod payload;
pub mod retry;

pub use error::{is_transient, RelayError, TransportKind};
pub use metric::{Metric, MetricKind};
pub use payload::{PayloadCodec, SealedPayload};
