/*
 *  Copyright 2025-2026 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! # outboxd
//!
//! A reliable dispatcher for the transactional outbox pattern on
//! PostgreSQL. Producers commit business mutations and outbox rows in one
//! transaction; `outboxd` drains due rows, invokes a type-specific handler
//! per row, and records each outcome, guaranteeing at-least-once delivery.
//!
//! ## Architecture
//!
//! - [`models`]: the outbox event value type and its status state machine
//!   (`pending`/`retry` → `done` | `dead`).
//! - [`repository`]: the data-access boundary. Claims due rows with
//!   `FOR UPDATE SKIP LOCKED` and holds the locks until the batch's outcomes
//!   commit in the same transaction, so concurrent workers never duplicate
//!   work and a crash leaves rows claimable with their original state.
//! - [`registry`]: maps event types to handlers; a missing handler routes the
//!   row through the normal retry/dead path.
//! - [`worker`]: the per-instance loop: claim, execute handlers on a bounded
//!   executor, commit outcomes.
//! - [`supervisor`]: spawns N worker instances (one connection each),
//!   propagates shutdown, restarts abnormal exits with backoff.
//! - [`http`]: health/readiness probes, Prometheus metrics, and the
//!   dead-letter inspection/retry API on short-lived repositories.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use outboxd::{DispatcherConfig, HandlerRegistry, Supervisor};
//! use outboxd::metrics::DispatcherMetrics;
//! use outboxd::repository::PgStoreFactory;
//!
//! let config = DispatcherConfig::new("postgres://localhost/outbox");
//! config.validate()?;
//!
//! let mut registry = HandlerRegistry::new();
//! registry.register_fn("order.created", |payload| async move {
//!     // publish, notify, whatever the event means
//!     Ok(())
//! });
//!
//! let factory = PgStoreFactory::new(config.worker_repository());
//! let mut supervisor = Supervisor::new(
//!     config,
//!     registry,
//!     factory,
//!     Arc::new(DispatcherMetrics::new()),
//! );
//! supervisor.start();
//! ```

pub mod config;
pub mod database;
pub mod error;
pub mod handlers;
pub mod http;
pub mod metrics;
pub mod models;
pub mod registry;
pub mod repository;
pub mod supervisor;
pub mod worker;

pub use config::{DispatcherConfig, HttpConfig, RepositoryConfig};
pub use error::{ConfigError, HandlerError, ModelError, RepositoryError};
pub use models::{EventStatus, OutboxEvent};
pub use registry::{EventHandler, HandlerRegistry};
pub use repository::{
    DeadEventQuery, MarkOutcome, OutboxStore, PgRepository, PgStoreFactory, StoreFactory,
};
pub use supervisor::Supervisor;
pub use worker::{Worker, WorkerConfig};
