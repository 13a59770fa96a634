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

//! In-memory [`OutboxStore`] for worker and supervisor tests.
//!
//! Mimics the store-side transition rules (due-row selection by id, the
//! retry-vs-dead attempt threshold, frozen `next_run_at` on death) without a
//! database. State is shared through an `Arc` so tests can inspect it after
//! the worker finishes.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;

use super::{DeadEventQuery, MarkOutcome, OutboxStore, StoreFactory};
use crate::error::RepositoryError;
use crate::models::{EventStatus, OutboxEvent};

#[derive(Debug, Default)]
pub(crate) struct MockState {
    pub events: Vec<OutboxEvent>,
    pub commits: usize,
    pub releases: usize,
    pub claim_calls: usize,
    pub ensure_calls: usize,
    /// Fail this many `ensure_connected` calls before succeeding.
    pub ensure_failures: usize,
    /// Panic on the next `claim_due`, once.
    pub panic_on_claim: bool,
    pub max_attempts: i32,
    pub retry_backoff_secs: i64,
}

impl MockState {
    pub fn with_events(events: Vec<OutboxEvent>) -> Self {
        Self {
            events,
            max_attempts: 5,
            retry_backoff_secs: 30,
            ..Default::default()
        }
    }
}

/// Builds a due pending event for tests.
pub(crate) fn due_event(id: i64, event_type: &str) -> OutboxEvent {
    OutboxEvent {
        id: Some(id),
        aggregate_type: "order".to_string(),
        aggregate_id: id.to_string(),
        event_type: event_type.to_string(),
        payload: json!({"orderId": id.to_string()}),
        status: EventStatus::Pending,
        attempts: 0,
        next_run_at: Utc::now() - ChronoDuration::seconds(1),
        created_at: Some(Utc::now()),
    }
}

#[derive(Clone)]
pub(crate) struct MockStore {
    pub state: Arc<Mutex<MockState>>,
}

impl MockStore {
    pub fn new(state: Arc<Mutex<MockState>>) -> Self {
        Self { state }
    }
}

#[async_trait]
impl OutboxStore for MockStore {
    async fn ensure_connected(&mut self) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().unwrap();
        state.ensure_calls += 1;
        if state.ensure_failures > 0 {
            state.ensure_failures -= 1;
            return Err(RepositoryError::Connection("mock outage".to_string()));
        }
        Ok(())
    }

    async fn is_connected(&mut self) -> bool {
        self.state.lock().unwrap().ensure_failures == 0
    }

    async fn claim_due(&mut self, batch_size: i64) -> Result<Vec<OutboxEvent>, RepositoryError> {
        let mut state = self.state.lock().unwrap();
        state.claim_calls += 1;
        if state.panic_on_claim {
            state.panic_on_claim = false;
            drop(state);
            panic!("injected claim failure");
        }

        let now = Utc::now();
        let mut due: Vec<OutboxEvent> = state
            .events
            .iter()
            .filter(|e| e.is_due(now))
            .cloned()
            .collect();
        due.sort_by_key(|e| e.id);
        due.truncate(batch_size.max(0) as usize);
        Ok(due)
    }

    async fn mark_success(&mut self, event_id: i64) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().unwrap();
        if let Some(event) = state.events.iter_mut().find(|e| e.id == Some(event_id)) {
            event.status = EventStatus::Done;
            event.attempts += 1;
        }
        Ok(())
    }

    async fn mark_retry_or_dead(
        &mut self,
        event_id: i64,
        _current_attempts: i32,
    ) -> Result<MarkOutcome, RepositoryError> {
        let mut state = self.state.lock().unwrap();
        let max_attempts = state.max_attempts;
        let backoff = ChronoDuration::seconds(state.retry_backoff_secs);
        let Some(event) = state.events.iter_mut().find(|e| e.id == Some(event_id)) else {
            return Err(RepositoryError::Query(diesel::result::Error::NotFound));
        };

        event.attempts += 1;
        if event.attempts >= max_attempts {
            event.status = EventStatus::Dead;
            Ok(MarkOutcome::Dead)
        } else {
            event.status = EventStatus::Retry;
            event.next_run_at = Utc::now() + backoff;
            Ok(MarkOutcome::Retry)
        }
    }

    async fn commit_claim(&mut self) -> Result<(), RepositoryError> {
        self.state.lock().unwrap().commits += 1;
        Ok(())
    }

    async fn release_claim(&mut self) -> Result<(), RepositoryError> {
        self.state.lock().unwrap().releases += 1;
        Ok(())
    }

    async fn fetch_dead_events(
        &mut self,
        query: DeadEventQuery,
    ) -> Result<Vec<OutboxEvent>, RepositoryError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .events
            .iter()
            .filter(|e| e.status == EventStatus::Dead)
            .filter(|e| {
                query
                    .aggregate_type
                    .as_deref()
                    .map_or(true, |t| e.aggregate_type == t)
            })
            .filter(|e| query.event_type.as_deref().map_or(true, |t| e.event_type == t))
            .skip(query.offset as usize)
            .take(query.limit as usize)
            .cloned()
            .collect())
    }

    async fn count_dead_events(
        &mut self,
        aggregate_type: Option<String>,
        event_type: Option<String>,
    ) -> Result<i64, RepositoryError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .events
            .iter()
            .filter(|e| e.status == EventStatus::Dead)
            .filter(|e| aggregate_type.as_deref().map_or(true, |t| e.aggregate_type == t))
            .filter(|e| event_type.as_deref().map_or(true, |t| e.event_type == t))
            .count() as i64)
    }

    async fn get_dead_event(
        &mut self,
        event_id: i64,
    ) -> Result<Option<OutboxEvent>, RepositoryError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .events
            .iter()
            .find(|e| e.id == Some(event_id) && e.status == EventStatus::Dead)
            .cloned())
    }

    async fn reset_dead_to_pending(&mut self, event_id: i64) -> Result<bool, RepositoryError> {
        let mut state = self.state.lock().unwrap();
        let Some(event) = state
            .events
            .iter_mut()
            .find(|e| e.id == Some(event_id) && e.status == EventStatus::Dead)
        else {
            return Ok(false);
        };
        event.status = EventStatus::Pending;
        event.attempts = 0;
        event.next_run_at = Utc::now();
        Ok(true)
    }

    async fn reset_dead_to_pending_batch(
        &mut self,
        event_ids: Vec<i64>,
    ) -> Result<usize, RepositoryError> {
        let mut count = 0;
        for id in event_ids {
            if self.reset_dead_to_pending(id).await? {
                count += 1;
            }
        }
        Ok(count)
    }
}

/// Factory handing out clones of one shared mock store.
pub(crate) struct MockStoreFactory {
    pub state: Arc<Mutex<MockState>>,
    /// Fail this many `open` calls before succeeding.
    pub open_failures: Arc<Mutex<usize>>,
}

impl MockStoreFactory {
    pub fn new(state: Arc<Mutex<MockState>>) -> Self {
        Self {
            state,
            open_failures: Arc::new(Mutex::new(0)),
        }
    }
}

#[async_trait]
impl StoreFactory for MockStoreFactory {
    type Store = MockStore;

    async fn open(&self) -> Result<MockStore, RepositoryError> {
        let mut failures = self.open_failures.lock().unwrap();
        if *failures > 0 {
            *failures -= 1;
            return Err(RepositoryError::Connection("mock open failure".to_string()));
        }
        Ok(MockStore::new(self.state.clone()))
    }
}
