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

//! Dispatcher configuration.
//!
//! One struct carries every tuning knob; the CLI maps its flags onto it
//! one-to-one and calls [`DispatcherConfig::validate`] before anything touches
//! the database. Validation failures are fatal at startup.

use std::time::Duration;

use crate::error::ConfigError;

/// Default number of rows claimed per worker iteration.
pub const DEFAULT_BATCH_SIZE: i64 = 10;
/// Default sleep when a poll finds no due rows.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Default bound on concurrently executing handlers per worker.
pub const DEFAULT_MAX_PARALLEL: usize = 10;
/// Default delay before a failed row becomes due again.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(30);
/// Default number of attempts before a row is declared dead.
pub const DEFAULT_MAX_ATTEMPTS: i32 = 5;
/// Default number of worker instances.
pub const DEFAULT_WORKERS: usize = 1;

/// Configuration for the whole dispatcher process.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// PostgreSQL connection string.
    pub dsn: String,
    /// Number of independent worker instances to run.
    pub workers: usize,
    /// Rows claimed per iteration. Large batches combined with slow handlers
    /// hold row locks for the whole batch; keep this sized to what a worker
    /// can finish within a bounded interval.
    pub batch_size: i64,
    /// Sleep between polls when no work is due.
    pub poll_interval: Duration,
    /// Attempt count at which a failing row transitions to dead.
    pub max_attempts: i32,
    /// Fixed delay applied on each retry transition.
    pub retry_backoff: Duration,
    /// Bound on concurrently executing handlers within one worker.
    pub max_parallel: usize,
    /// Database connect timeout for worker repositories.
    pub connect_timeout: Duration,
    /// Per-statement timeout for worker repositories.
    pub query_timeout: Duration,
    /// How long shutdown waits for in-flight batches before aborting workers.
    pub shutdown_grace: Duration,
    /// Base delay before restarting an abnormally exited worker.
    pub restart_backoff: Duration,
    /// HTTP observability surface.
    pub http: HttpConfig,
}

/// Observability HTTP server settings.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl HttpConfig {
    /// Bind address in `host:port` form.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl DispatcherConfig {
    /// Creates a configuration with the given DSN and defaults everywhere else.
    pub fn new(dsn: impl Into<String>) -> Self {
        Self {
            dsn: dsn.into(),
            workers: DEFAULT_WORKERS,
            batch_size: DEFAULT_BATCH_SIZE,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            max_parallel: DEFAULT_MAX_PARALLEL,
            connect_timeout: Duration::from_secs(10),
            query_timeout: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(5),
            restart_backoff: Duration::from_secs(1),
            http: HttpConfig::default(),
        }
    }

    /// Validates every tuning value. Called once at startup; any error is
    /// fatal and the process exits non-zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dsn.trim().is_empty() {
            return Err(ConfigError::MissingDsn);
        }
        if self.workers < 1 {
            return Err(ConfigError::InvalidWorkerCount(self.workers));
        }
        if self.batch_size < 1 {
            return Err(ConfigError::InvalidBatchSize(self.batch_size));
        }
        if self.max_attempts < 1 {
            return Err(ConfigError::InvalidMaxAttempts(self.max_attempts));
        }
        if self.max_parallel < 1 {
            return Err(ConfigError::InvalidMaxParallel(self.max_parallel));
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::InvalidPollInterval);
        }
        Ok(())
    }

    /// Repository settings for a worker: long-lived connection, full timeouts.
    pub fn worker_repository(&self) -> RepositoryConfig {
        RepositoryConfig {
            dsn: self.dsn.trim().to_string(),
            connect_timeout: self.connect_timeout,
            query_timeout: self.query_timeout,
            retry_backoff: self.retry_backoff,
            max_attempts: self.max_attempts,
        }
    }

    /// Repository settings for observability callers: short-lived connections
    /// with tight timeouts so a slow database cannot stall the HTTP surface.
    pub fn observability_repository(&self) -> RepositoryConfig {
        RepositoryConfig {
            dsn: self.dsn.trim().to_string(),
            connect_timeout: Duration::from_secs(2),
            query_timeout: Duration::from_secs(5),
            retry_backoff: self.retry_backoff,
            max_attempts: self.max_attempts,
        }
    }
}

/// Settings for one repository instance.
#[derive(Debug, Clone)]
pub struct RepositoryConfig {
    pub dsn: String,
    pub connect_timeout: Duration,
    pub query_timeout: Duration,
    pub retry_backoff: Duration,
    pub max_attempts: i32,
}
