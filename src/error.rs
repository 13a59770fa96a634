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

//! Error types for the dispatcher.
//!
//! Four kinds, with distinct propagation rules:
//!
//! - [`ConfigError`]: fatal at startup, the process exits non-zero.
//! - [`RepositoryError`]: transient infrastructure failure. The affected claim
//!   transaction is aborted and the worker retries on its next iteration.
//! - [`HandlerError`]: captured per row and converted into a retry/dead
//!   transition. Never propagated into the worker loop.
//! - [`ModelError`]: schema/data anomaly on a fetched row. Logged, the row is
//!   skipped.

use thiserror::Error;

/// Invalid startup configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("DSN cannot be empty")]
    MissingDsn,

    #[error("worker count must be at least 1, got {0}")]
    InvalidWorkerCount(usize),

    #[error("batch size must be at least 1, got {0}")]
    InvalidBatchSize(i64),

    #[error("max attempts must be at least 1, got {0}")]
    InvalidMaxAttempts(i32),

    #[error("max parallel handlers must be at least 1, got {0}")]
    InvalidMaxParallel(usize),

    #[error("poll interval must be positive")]
    InvalidPollInterval,
}

/// Failure talking to the database.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection failed: {0}")]
    Connection(String),

    #[error("database query failed: {0}")]
    Query(#[from] diesel::result::Error),

    #[error("migration failed: {0}")]
    Migration(String),
}

/// Failure of a single handler invocation.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("no handler registered for event type '{event_type}'")]
    NotFound { event_type: String },

    #[error("handler panicked: {0}")]
    Panicked(String),

    #[error(transparent)]
    Execution(#[from] anyhow::Error),
}

/// A fetched row that does not match the expected schema.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("outbox row is missing next_run_at")]
    MissingNextRunAt,

    #[error("unknown outbox status '{0}'")]
    UnknownStatus(String),
}
