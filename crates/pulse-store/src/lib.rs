// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Storage for the collector service: the [`Repository`] contract with two
//! interchangeable backends (an in-process actor-backed store and a
//! transactional PostgreSQL store) plus snapshot save/restore for the
//! in-process one.

pub mod config;
pub mod memory;
pub mod postgres;
pub mod repository;
pub mod snapshot;

pub use config::StoreConfig;
pub use memory::{MemStore, MemStoreConfig};
pub use postgres::PgStore;
pub use repository::Repository;
