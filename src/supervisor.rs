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

//! Worker Supervision
//!
//! Spawns N independent worker instances and propagates shutdown to them.
//! Each instance opens its own store (its own database connection) and
//! shares nothing with its siblings beyond the stop channel, so worker count
//! maps one-to-one onto connection count. The supervisor itself never touches
//! the database.
//!
//! Shutdown waits up to a grace window for in-flight batches to commit, then
//! aborts stragglers. A worker that terminates abnormally before shutdown is
//! restarted with capped exponential backoff; a worker that cannot open its
//! store keeps retrying on the same schedule.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn, Instrument};

use crate::config::DispatcherConfig;
use crate::metrics::DispatcherMetrics;
use crate::registry::HandlerRegistry;
use crate::repository::StoreFactory;
use crate::worker::{Worker, WorkerConfig};

const RESTART_BACKOFF_CAP: Duration = Duration::from_secs(60);

/// Spawns and supervises the worker fleet.
pub struct Supervisor<F: StoreFactory> {
    config: Arc<DispatcherConfig>,
    registry: Arc<HandlerRegistry>,
    factory: Arc<F>,
    metrics: Arc<DispatcherMetrics>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    workers: Vec<JoinHandle<()>>,
}

impl<F: StoreFactory> Supervisor<F> {
    pub fn new(
        config: DispatcherConfig,
        registry: HandlerRegistry,
        factory: F,
        metrics: Arc<DispatcherMetrics>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            config: Arc::new(config),
            registry: Arc::new(registry),
            factory: Arc::new(factory),
            metrics,
            shutdown_tx,
            shutdown_rx,
            workers: Vec::new(),
        }
    }

    /// A receiver of the process-wide stop signal, for co-located services
    /// such as the HTTP server.
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    /// Spawns all worker instances.
    pub fn start(&mut self) {
        let pid = std::process::id();
        for idx in 0..self.config.workers {
            let name = format!("worker-{idx:02}-pid{pid}");
            let span = tracing::info_span!("worker", worker = %name);
            let handle = tokio::spawn(
                worker_loop(
                    name,
                    self.config.clone(),
                    self.registry.clone(),
                    self.factory.clone(),
                    self.metrics.clone(),
                    self.shutdown_rx.clone(),
                )
                .instrument(span),
            );
            self.workers.push(handle);
        }
        info!(workers = self.config.workers, "supervisor started worker instances");
    }

    /// Signals every worker to stop, waits out the grace window, and aborts
    /// any instance still running after it.
    pub async fn shutdown(mut self) {
        info!("supervisor stopping workers");
        let _ = self.shutdown_tx.send(true);

        let deadline = Instant::now() + self.config.shutdown_grace;
        for mut handle in self.workers.drain(..) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if tokio::time::timeout(remaining, &mut handle).await.is_err() {
                warn!("worker did not stop within the grace window, aborting");
                handle.abort();
                let _ = handle.await;
            }
        }
        info!("all workers stopped");
    }
}

/// Lifecycle of one worker instance: open a store, run the worker, restart on
/// abnormal termination until shutdown.
async fn worker_loop<F: StoreFactory>(
    name: String,
    config: Arc<DispatcherConfig>,
    registry: Arc<HandlerRegistry>,
    factory: Arc<F>,
    metrics: Arc<DispatcherMetrics>,
    stop: watch::Receiver<bool>,
) {
    let worker_config = WorkerConfig::from(config.as_ref());
    let mut backoff = config.restart_backoff;

    loop {
        if *stop.borrow() {
            break;
        }

        let store = match factory.open().await {
            Ok(store) => store,
            Err(err) => {
                warn!(error = %err, delay = ?backoff, "failed to open store, retrying");
                if stop_aware_sleep(stop.clone(), backoff).await {
                    break;
                }
                backoff = (backoff * 2).min(RESTART_BACKOFF_CAP);
                continue;
            }
        };

        let worker = Worker::new(
            name.clone(),
            store,
            registry.clone(),
            worker_config.clone(),
            metrics.clone(),
            stop.clone(),
        );

        let started = Instant::now();
        match tokio::spawn(worker.run()).await {
            Ok(()) => {
                if *stop.borrow() {
                    break;
                }
                warn!("worker loop returned unexpectedly, restarting");
            }
            Err(err) => {
                error!(error = %err, "worker terminated abnormally");
            }
        }

        if started.elapsed() >= RESTART_BACKOFF_CAP {
            backoff = config.restart_backoff;
        }
        warn!(delay = ?backoff, "restarting worker");
        if stop_aware_sleep(stop.clone(), backoff).await {
            break;
        }
        backoff = (backoff * 2).min(RESTART_BACKOFF_CAP);
    }
}

/// Sleeps for `duration`, returning true if the stop signal fired first.
async fn stop_aware_sleep(mut stop: watch::Receiver<bool>, duration: Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => *stop.borrow(),
        _ = stop.changed() => true,
    }
}
