// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The metrics agent: periodic samplers feeding collector probes, and a
//! dispatcher that packages each probe's snapshot and ships it to the
//! collector service under bounded concurrency with backoff-based retries.

pub mod agent;
pub mod config;
pub mod dispatcher;
pub mod probe;
pub mod sampler;
pub mod sink;

pub use agent::{Agent, AgentHandle};
pub use config::AgentConfig;
