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

//! HTTP surface integration tests.
//!
//! Starts the axum app on an ephemeral port with an in-memory store and
//! exercises it with reqwest.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

use outboxd::http::{router, ApiState};
use outboxd::metrics::DispatcherMetrics;
use outboxd::repository::{DeadEventQuery, MarkOutcome, OutboxStore, StoreFactory};
use outboxd::{EventStatus, OutboxEvent, RepositoryError};

fn dead_event(id: i64, aggregate_type: &str, event_type: &str) -> OutboxEvent {
    OutboxEvent {
        id: Some(id),
        aggregate_type: aggregate_type.to_string(),
        aggregate_id: id.to_string(),
        event_type: event_type.to_string(),
        payload: json!({"orderId": id.to_string()}),
        status: EventStatus::Dead,
        attempts: 5,
        next_run_at: Utc::now(),
        created_at: Some(Utc::now()),
    }
}

#[derive(Default)]
struct TestState {
    events: Vec<OutboxEvent>,
    connected: bool,
}

struct TestStore {
    state: Arc<Mutex<TestState>>,
}

#[async_trait]
impl OutboxStore for TestStore {
    async fn ensure_connected(&mut self) -> Result<(), RepositoryError> {
        Ok(())
    }

    async fn is_connected(&mut self) -> bool {
        self.state.lock().unwrap().connected
    }

    async fn claim_due(&mut self, _batch_size: i64) -> Result<Vec<OutboxEvent>, RepositoryError> {
        Ok(Vec::new())
    }

    async fn mark_success(&mut self, _event_id: i64) -> Result<(), RepositoryError> {
        Ok(())
    }

    async fn mark_retry_or_dead(
        &mut self,
        _event_id: i64,
        _current_attempts: i32,
    ) -> Result<MarkOutcome, RepositoryError> {
        Ok(MarkOutcome::Retry)
    }

    async fn commit_claim(&mut self) -> Result<(), RepositoryError> {
        Ok(())
    }

    async fn release_claim(&mut self) -> Result<(), RepositoryError> {
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

struct TestFactory {
    state: Arc<Mutex<TestState>>,
    fail_open: bool,
}

#[async_trait]
impl StoreFactory for TestFactory {
    type Store = TestStore;

    async fn open(&self) -> Result<TestStore, RepositoryError> {
        if self.fail_open {
            return Err(RepositoryError::Connection(
                "connection refused".to_string(),
            ));
        }
        Ok(TestStore {
            state: self.state.clone(),
        })
    }
}

struct Server {
    base: String,
    state: Arc<Mutex<TestState>>,
}

async fn start_server(
    events: Vec<OutboxEvent>,
    metrics: Option<Arc<DispatcherMetrics>>,
    fail_open: bool,
) -> Server {
    let state = Arc::new(Mutex::new(TestState {
        events,
        connected: true,
    }));
    let api_state = Arc::new(ApiState {
        factory: Arc::new(TestFactory {
            state: state.clone(),
            fail_open,
        }),
        metrics,
    });

    let app = router(api_state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Server {
        base: format!("http://{addr}"),
        state,
    }
}

fn seeded_events() -> Vec<OutboxEvent> {
    vec![
        dead_event(1, "order", "order.created"),
        dead_event(2, "order", "order.created.crm"),
        dead_event(3, "invoice", "invoice.issued"),
    ]
}

#[tokio::test]
async fn health_reports_ok() {
    let server = start_server(Vec::new(), None, false).await;
    let resp = reqwest::get(format!("{}/health", server.base)).await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn ready_reports_ready_when_database_pings() {
    let server = start_server(Vec::new(), None, false).await;
    let resp = reqwest::get(format!("{}/ready", server.base)).await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ready");
}

#[tokio::test]
async fn ready_reports_503_when_database_is_unreachable() {
    let server = start_server(Vec::new(), None, true).await;
    let resp = reqwest::get(format!("{}/ready", server.base)).await.unwrap();
    assert_eq!(resp.status(), 503);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "not ready");
    assert!(body["reason"].as_str().unwrap().contains("connection refused"));
}

#[tokio::test]
async fn metrics_returns_501_when_not_configured() {
    let server = start_server(Vec::new(), None, false).await;
    let resp = reqwest::get(format!("{}/metrics", server.base)).await.unwrap();
    assert_eq!(resp.status(), 501);
}

#[tokio::test]
async fn metrics_renders_prometheus_exposition() {
    let metrics = Arc::new(DispatcherMetrics::new());
    metrics.add_claimed(7);
    metrics.incr_succeeded();

    let server = start_server(Vec::new(), Some(metrics), false).await;
    let resp = reqwest::get(format!("{}/metrics", server.base)).await.unwrap();
    assert_eq!(resp.status(), 200);
    assert!(resp
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("text/plain"));
    let body = resp.text().await.unwrap();
    assert!(body.contains("outboxd_events_claimed_total 7"));
    assert!(body.contains("outboxd_events_succeeded_total 1"));
}

#[tokio::test]
async fn dead_events_are_listed_with_pagination_metadata() {
    let server = start_server(seeded_events(), None, false).await;
    let resp = reqwest::get(format!("{}/api/dead-events", server.base))
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["count"], 3);
    assert_eq!(body["limit"], 100);
    assert_eq!(body["offset"], 0);
    assert_eq!(body["events"].as_array().unwrap().len(), 3);
    // Payloads come back as structured JSON.
    assert!(body["events"][0]["payload"].is_object());
}

#[tokio::test]
async fn dead_event_listing_supports_filters() {
    let server = start_server(seeded_events(), None, false).await;
    let resp = reqwest::get(format!(
        "{}/api/dead-events?aggregate_type=order",
        server.base
    ))
    .await
    .unwrap();
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["count"], 2);

    let resp = reqwest::get(format!(
        "{}/api/dead-events?event_type=invoice.issued",
        server.base
    ))
    .await
    .unwrap();
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["count"], 1);
    assert_eq!(body["events"][0]["id"], 3);
}

#[tokio::test]
async fn dead_event_listing_clamps_oversized_limits() {
    let server = start_server(seeded_events(), None, false).await;
    let resp = reqwest::get(format!("{}/api/dead-events?limit=5000", server.base))
        .await
        .unwrap();
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["limit"], 1000);
}

#[tokio::test]
async fn stats_counts_matching_dead_events() {
    let server = start_server(seeded_events(), None, false).await;
    let resp = reqwest::get(format!(
        "{}/api/dead-events/stats?aggregate_type=order",
        server.base
    ))
    .await
    .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["total"], 2);
    assert_eq!(body["aggregate_type"], "order");
}

#[tokio::test]
async fn single_dead_event_fetch_and_404() {
    let server = start_server(seeded_events(), None, false).await;

    let resp = reqwest::get(format!("{}/api/dead-events/1", server.base))
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["id"], 1);
    assert_eq!(body["status"], "dead");

    let resp = reqwest::get(format!("{}/api/dead-events/99", server.base))
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn retrying_a_dead_event_resets_it_to_pending() {
    let server = start_server(seeded_events(), None, false).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/api/dead-events/1/retry", server.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "success");
    assert_eq!(body["event_id"], 1);

    {
        let state = server.state.lock().unwrap();
        let event = state.events.iter().find(|e| e.id == Some(1)).unwrap();
        assert_eq!(event.status, EventStatus::Pending);
        assert_eq!(event.attempts, 0);
    }

    // A second retry finds nothing dead under that id.
    let resp = client
        .post(format!("{}/api/dead-events/1/retry", server.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn batch_retry_processes_only_dead_ids() {
    let server = start_server(seeded_events(), None, false).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/api/dead-events/retry-batch", server.base))
        .json(&json!({"event_ids": [1, 2, 99]}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["requested"], 3);
    assert_eq!(body["processed"], 2);
}

#[tokio::test]
async fn batch_retry_validates_the_id_list() {
    let server = start_server(seeded_events(), None, false).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/api/dead-events/retry-batch", server.base))
        .json(&json!({"event_ids": []}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = client
        .post(format!("{}/api/dead-events/retry-batch", server.base))
        .json(&json!({"event_ids": [1, -2]}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn unknown_routes_return_json_404() {
    let server = start_server(Vec::new(), None, false).await;
    let resp = reqwest::get(format!("{}/nope", server.base)).await.unwrap();
    assert_eq!(resp.status(), 404);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "Not Found");
}
