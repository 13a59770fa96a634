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

//! Worker Loop
//!
//! One worker owns one store (one database connection), one bounded handler
//! executor, and one stop signal. Each iteration claims a batch of due rows,
//! runs their handlers concurrently up to `max_parallel`, then commits every
//! row's outcome inside the transaction that claimed it. The locks taken at
//! claim time are therefore held until the outcomes commit: no other worker
//! can touch the batch, and a crash aborts the transaction so the rows revert
//! untouched and become claimable again.
//!
//! Handler failures never escape their task; they become retry/dead
//! transitions. Store failures abort the iteration, release the claim, and
//! the loop carries on. A stop signal is honored at loop boundaries only: an
//! in-flight batch runs to completion and commits before the worker exits.

use std::sync::Arc;

use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info, warn};

use crate::config::DispatcherConfig;
use crate::error::{HandlerError, RepositoryError};
use crate::metrics::DispatcherMetrics;
use crate::models::OutboxEvent;
use crate::registry::HandlerRegistry;
use crate::repository::{MarkOutcome, OutboxStore};

/// Worker tuning, extracted from the dispatcher configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub batch_size: i64,
    pub poll_interval: std::time::Duration,
    pub max_parallel: usize,
}

impl From<&DispatcherConfig> for WorkerConfig {
    fn from(config: &DispatcherConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            poll_interval: config.poll_interval,
            max_parallel: config.max_parallel,
        }
    }
}

/// A single worker instance.
pub struct Worker<S: OutboxStore> {
    name: String,
    store: S,
    registry: Arc<HandlerRegistry>,
    config: WorkerConfig,
    metrics: Arc<DispatcherMetrics>,
    stop: watch::Receiver<bool>,
    semaphore: Arc<Semaphore>,
}

impl<S: OutboxStore> Worker<S> {
    pub fn new(
        name: impl Into<String>,
        store: S,
        registry: Arc<HandlerRegistry>,
        config: WorkerConfig,
        metrics: Arc<DispatcherMetrics>,
        stop: watch::Receiver<bool>,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_parallel.max(1)));
        Self {
            name: name.into(),
            store,
            registry,
            config,
            metrics,
            stop,
            semaphore,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runs the main loop until the stop signal is set.
    pub async fn run(mut self) {
        info!(worker = %self.name, "worker started");

        loop {
            if *self.stop.borrow() {
                break;
            }

            if let Err(err) = self.store.ensure_connected().await {
                self.metrics.incr_connection_failures();
                warn!(worker = %self.name, error = %err, "database unavailable, retrying after poll interval");
                self.idle_sleep().await;
                continue;
            }

            if let Err(err) = self.run_iteration().await {
                warn!(worker = %self.name, error = %err, "iteration aborted, releasing claimed rows");
                if let Err(release_err) = self.store.release_claim().await {
                    warn!(worker = %self.name, error = %release_err, "failed to release claim transaction");
                }
            }
        }

        info!(worker = %self.name, "worker stopped");
    }

    /// One poll cycle: claim, execute, commit outcomes.
    async fn run_iteration(&mut self) -> Result<(), RepositoryError> {
        let events = self.store.claim_due(self.config.batch_size).await?;

        if events.is_empty() {
            self.store.release_claim().await?;
            self.idle_sleep().await;
            return Ok(());
        }

        debug!(worker = %self.name, count = events.len(), "claimed batch");
        self.metrics.add_claimed(events.len() as u64);

        let outcomes = self.execute_batch(&events).await;

        for (event, outcome) in events.iter().zip(outcomes) {
            // A row without an id means the table is corrupt; skipping keeps
            // the worker alive while the operator investigates.
            let Some(event_id) = event.id else {
                error!(worker = %self.name, "claimed row has no id, skipping");
                continue;
            };

            match outcome {
                Ok(()) => {
                    self.store.mark_success(event_id).await?;
                    self.metrics.incr_succeeded();
                    debug!(worker = %self.name, event_id, "event processed");
                }
                Err(err) => {
                    error!(worker = %self.name, event_id, error = %err, "handler failed");
                    match self
                        .store
                        .mark_retry_or_dead(event_id, event.attempts)
                        .await?
                    {
                        MarkOutcome::Retry => self.metrics.incr_retried(),
                        MarkOutcome::Dead => self.metrics.incr_dead(),
                    }
                }
            }
        }

        self.store.commit_claim().await?;
        Ok(())
    }

    /// Runs every handler in the batch on the bounded executor and waits for
    /// all of them. Panics are captured as failure outcomes.
    async fn execute_batch(&self, events: &[OutboxEvent]) -> Vec<Result<(), HandlerError>> {
        let mut handles = Vec::with_capacity(events.len());
        for event in events {
            let registry = self.registry.clone();
            let semaphore = self.semaphore.clone();
            let event_type = event.event_type.clone();
            let payload = event.payload.clone();

            handles.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| HandlerError::Execution(anyhow::anyhow!("executor unavailable")))?;
                match registry.resolve(&event_type) {
                    Some(handler) => handler.handle(&payload).await,
                    None => Err(HandlerError::NotFound { event_type }),
                }
            }));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for handle in handles {
            outcomes.push(match handle.await {
                Ok(outcome) => outcome,
                Err(err) => Err(HandlerError::Panicked(err.to_string())),
            });
        }
        outcomes
    }

    /// Sleeps for the poll interval, waking early on the stop signal.
    async fn idle_sleep(&mut self) {
        let mut stop = self.stop.clone();
        tokio::select! {
            _ = tokio::time::sleep(self.config.poll_interval) => {}
            _ = stop.changed() => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HandlerError;
    use crate::models::EventStatus;
    use crate::repository::mock::{due_event, MockState, MockStore};
    use chrono::Utc;
    use serde_json::Value as JsonValue;
    use std::sync::Mutex;
    use std::time::Duration;

    fn test_config() -> WorkerConfig {
        WorkerConfig {
            batch_size: 10,
            poll_interval: Duration::from_millis(10),
            max_parallel: 4,
        }
    }

    fn spawn_worker(
        state: Arc<Mutex<MockState>>,
        registry: HandlerRegistry,
        config: WorkerConfig,
    ) -> (watch::Sender<bool>, tokio::task::JoinHandle<()>) {
        let (stop_tx, stop_rx) = watch::channel(false);
        let worker = Worker::new(
            "worker-00-test",
            MockStore::new(state),
            Arc::new(registry),
            config,
            Arc::new(DispatcherMetrics::new()),
            stop_rx,
        );
        (stop_tx, tokio::spawn(worker.run()))
    }

    async fn wait_until(state: &Arc<Mutex<MockState>>, f: impl Fn(&MockState) -> bool) {
        for _ in 0..400 {
            if f(&state.lock().unwrap()) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached within two seconds");
    }

    #[tokio::test]
    async fn successful_handler_marks_event_done_with_one_attempt() {
        let state = Arc::new(Mutex::new(MockState::with_events(vec![due_event(
            1,
            "order.created",
        )])));
        let mut registry = HandlerRegistry::new();
        registry.register_fn("order.created", |_: JsonValue| async { Ok(()) });

        let (stop_tx, handle) = spawn_worker(state.clone(), registry, test_config());
        wait_until(&state, |s| s.events[0].status == EventStatus::Done).await;
        stop_tx.send(true).unwrap();
        handle.await.unwrap();

        let state = state.lock().unwrap();
        assert_eq!(state.events[0].attempts, 1);
        assert!(state.commits >= 1);
    }

    #[tokio::test]
    async fn failing_handler_schedules_retry_with_backoff() {
        let mut mock = MockState::with_events(vec![due_event(1, "order.created")]);
        mock.max_attempts = 5;
        mock.retry_backoff_secs = 30;
        let state = Arc::new(Mutex::new(mock));

        let mut registry = HandlerRegistry::new();
        registry.register_fn("order.created", |_: JsonValue| async {
            Err(HandlerError::Execution(anyhow::anyhow!("boom")))
        });

        let before = Utc::now();
        let (stop_tx, handle) = spawn_worker(state.clone(), registry, test_config());
        wait_until(&state, |s| s.events[0].status == EventStatus::Retry).await;
        stop_tx.send(true).unwrap();
        handle.await.unwrap();

        let state = state.lock().unwrap();
        let event = &state.events[0];
        assert_eq!(event.attempts, 1);
        // Rescheduled no earlier than backoff from the failure time.
        assert!(event.next_run_at >= before + chrono::Duration::seconds(29));
    }

    #[tokio::test]
    async fn attempts_exhaustion_moves_event_to_dead_and_freezes_schedule() {
        let mut mock = MockState::with_events(vec![due_event(1, "order.created")]);
        mock.max_attempts = 1;
        let state = Arc::new(Mutex::new(mock));
        let scheduled_at = state.lock().unwrap().events[0].next_run_at;

        let mut registry = HandlerRegistry::new();
        registry.register_fn("order.created", |_: JsonValue| async {
            Err(HandlerError::Execution(anyhow::anyhow!("boom")))
        });

        let (stop_tx, handle) = spawn_worker(state.clone(), registry, test_config());
        wait_until(&state, |s| s.events[0].status == EventStatus::Dead).await;
        stop_tx.send(true).unwrap();
        handle.await.unwrap();

        let state = state.lock().unwrap();
        assert_eq!(state.events[0].attempts, 1);
        assert_eq!(state.events[0].next_run_at, scheduled_at);
    }

    #[tokio::test]
    async fn missing_handler_flows_through_the_retry_path() {
        let state = Arc::new(Mutex::new(MockState::with_events(vec![due_event(
            1,
            "order.unknown",
        )])));

        let (stop_tx, handle) = spawn_worker(state.clone(), HandlerRegistry::new(), test_config());
        wait_until(&state, |s| s.events[0].status == EventStatus::Retry).await;
        stop_tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(state.lock().unwrap().events[0].attempts, 1);
    }

    #[tokio::test]
    async fn panicking_handler_is_captured_as_a_failure() {
        let state = Arc::new(Mutex::new(MockState::with_events(vec![due_event(
            1,
            "order.created",
        )])));
        let mut registry = HandlerRegistry::new();
        registry.register_fn("order.created", |payload: JsonValue| async move {
            if payload.is_object() {
                panic!("handler bug");
            }
            Ok(())
        });

        let (stop_tx, handle) = spawn_worker(state.clone(), registry, test_config());
        wait_until(&state, |s| s.events[0].status == EventStatus::Retry).await;
        stop_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn row_without_id_is_skipped_not_fatal() {
        let mut broken = due_event(0, "order.created");
        broken.id = None;
        let state = Arc::new(Mutex::new(MockState::with_events(vec![
            broken,
            due_event(2, "order.created"),
        ])));
        let mut registry = HandlerRegistry::new();
        registry.register_fn("order.created", |_: JsonValue| async { Ok(()) });

        let (stop_tx, handle) = spawn_worker(state.clone(), registry, test_config());
        wait_until(&state, |s| s.events[1].status == EventStatus::Done).await;
        stop_tx.send(true).unwrap();
        handle.await.unwrap();

        let state = state.lock().unwrap();
        // The corrupt row is never transitioned.
        assert_eq!(state.events[0].status, EventStatus::Pending);
        assert_eq!(state.events[0].attempts, 0);
    }

    #[tokio::test]
    async fn empty_batches_release_the_claim_and_sleep() {
        let state = Arc::new(Mutex::new(MockState::with_events(Vec::new())));

        let (stop_tx, handle) = spawn_worker(state.clone(), HandlerRegistry::new(), test_config());
        wait_until(&state, |s| s.releases >= 2).await;
        stop_tx.send(true).unwrap();
        handle.await.unwrap();

        let state = state.lock().unwrap();
        assert_eq!(state.commits, 0);
    }

    #[tokio::test]
    async fn stop_signal_prevents_any_further_claims() {
        let state = Arc::new(Mutex::new(MockState::with_events(vec![due_event(
            1,
            "order.created",
        )])));
        let (stop_tx, stop_rx) = watch::channel(true);
        let worker = Worker::new(
            "worker-00-test",
            MockStore::new(state.clone()),
            Arc::new(HandlerRegistry::new()),
            test_config(),
            Arc::new(DispatcherMetrics::new()),
            stop_rx,
        );
        worker.run().await;
        drop(stop_tx);

        assert_eq!(state.lock().unwrap().claim_calls, 0);
    }

    #[tokio::test]
    async fn connection_outage_is_retried_without_claiming() {
        let mut mock = MockState::with_events(vec![due_event(1, "order.created")]);
        mock.ensure_failures = 2;
        let state = Arc::new(Mutex::new(mock));
        let mut registry = HandlerRegistry::new();
        registry.register_fn("order.created", |_: JsonValue| async { Ok(()) });

        let (stop_tx, handle) = spawn_worker(state.clone(), registry, test_config());
        wait_until(&state, |s| s.events[0].status == EventStatus::Done).await;
        stop_tx.send(true).unwrap();
        handle.await.unwrap();

        let state = state.lock().unwrap();
        // Both failed connectivity checks happened before any claim.
        assert!(state.ensure_calls >= 3);
        assert!(state.claim_calls >= 1);
    }
}
