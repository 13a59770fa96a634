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

//! HTTP observability surface.
//!
//! Health and readiness probes, the Prometheus endpoint, and the dead-letter
//! inspection/retry API. Every database-touching endpoint opens its own
//! short-lived repository through the configured [`StoreFactory`]; the
//! worker connections are never shared with this surface, so its presence
//! cannot change a worker's schedule or connection count.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::watch;
use tracing::{error, info};

use crate::metrics::DispatcherMetrics;
use crate::repository::{DeadEventQuery, OutboxStore, StoreFactory};

/// Shared state for the HTTP surface.
pub struct ApiState<F: StoreFactory> {
    pub factory: Arc<F>,
    pub metrics: Option<Arc<DispatcherMetrics>>,
}

/// Builds the axum router for the observability surface.
pub fn router<F: StoreFactory>(state: Arc<ApiState<F>>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready::<F>))
        .route("/metrics", get(metrics::<F>))
        .route("/api/dead-events", get(list_dead_events::<F>))
        .route("/api/dead-events/stats", get(dead_events_stats::<F>))
        .route("/api/dead-events/:id", get(get_dead_event::<F>))
        .route("/api/dead-events/:id/retry", post(retry_dead_event::<F>))
        .route(
            "/api/dead-events/retry-batch",
            post(retry_dead_events_batch::<F>),
        )
        .fallback(not_found)
        .with_state(state)
}

/// Serves the observability surface until the shutdown signal fires.
pub async fn serve<F: StoreFactory>(
    state: Arc<ApiState<F>>,
    addr: String,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), std::io::Error> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "http server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await
}

/// Liveness probe: the process is up.
async fn health() -> Response {
    Json(json!({"status": "ok"})).into_response()
}

/// Readiness probe: a fresh database ping must succeed.
async fn ready<F: StoreFactory>(State(state): State<Arc<ApiState<F>>>) -> Response {
    match state.factory.open().await {
        Ok(mut store) => {
            if store.is_connected().await {
                Json(json!({"status": "ready"})).into_response()
            } else {
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    Json(json!({"status": "not ready", "reason": "database not connected"})),
                )
                    .into_response()
            }
        }
        Err(err) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"status": "not ready", "reason": err.to_string()})),
        )
            .into_response(),
    }
}

/// Prometheus text exposition, or 501 when metrics are not configured.
async fn metrics<F: StoreFactory>(State(state): State<Arc<ApiState<F>>>) -> Response {
    match &state.metrics {
        Some(metrics) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                "text/plain; version=0.0.4; charset=utf-8",
            )],
            metrics.render(),
        )
            .into_response(),
        None => (StatusCode::NOT_IMPLEMENTED, "# metrics not configured\n").into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct ListDeadEventsParams {
    limit: Option<i64>,
    offset: Option<i64>,
    aggregate_type: Option<String>,
    event_type: Option<String>,
}

async fn list_dead_events<F: StoreFactory>(
    State(state): State<Arc<ApiState<F>>>,
    Query(params): Query<ListDeadEventsParams>,
) -> Response {
    let query = DeadEventQuery::new(
        params.limit.unwrap_or(100),
        params.offset.unwrap_or(0),
        params.aggregate_type,
        params.event_type,
    );

    let mut store = match open_store(&state).await {
        Ok(store) => store,
        Err(response) => return response,
    };

    let limit = query.limit;
    let offset = query.offset;
    match store.fetch_dead_events(query).await {
        Ok(events) => Json(json!({
            "events": events,
            "count": events.len(),
            "limit": limit,
            "offset": offset,
        }))
        .into_response(),
        Err(err) => {
            error!(error = %err, "failed to list dead events");
            internal_error()
        }
    }
}

#[derive(Debug, Deserialize)]
struct StatsParams {
    aggregate_type: Option<String>,
    event_type: Option<String>,
}

async fn dead_events_stats<F: StoreFactory>(
    State(state): State<Arc<ApiState<F>>>,
    Query(params): Query<StatsParams>,
) -> Response {
    let mut store = match open_store(&state).await {
        Ok(store) => store,
        Err(response) => return response,
    };

    match store
        .count_dead_events(params.aggregate_type.clone(), params.event_type.clone())
        .await
    {
        Ok(total) => Json(json!({
            "total": total,
            "aggregate_type": params.aggregate_type,
            "event_type": params.event_type,
        }))
        .into_response(),
        Err(err) => {
            error!(error = %err, "failed to count dead events");
            internal_error()
        }
    }
}

async fn get_dead_event<F: StoreFactory>(
    State(state): State<Arc<ApiState<F>>>,
    Path(event_id): Path<i64>,
) -> Response {
    if event_id < 1 {
        return bad_request("event_id must be a positive integer");
    }

    let mut store = match open_store(&state).await {
        Ok(store) => store,
        Err(response) => return response,
    };

    match store.get_dead_event(event_id).await {
        Ok(Some(event)) => Json(event).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": format!("Dead event {event_id} not found")})),
        )
            .into_response(),
        Err(err) => {
            error!(event_id, error = %err, "failed to fetch dead event");
            internal_error()
        }
    }
}

async fn retry_dead_event<F: StoreFactory>(
    State(state): State<Arc<ApiState<F>>>,
    Path(event_id): Path<i64>,
) -> Response {
    if event_id < 1 {
        return bad_request("event_id must be a positive integer");
    }

    let mut store = match open_store(&state).await {
        Ok(store) => store,
        Err(response) => return response,
    };

    match store.reset_dead_to_pending(event_id).await {
        Ok(true) => Json(json!({
            "status": "success",
            "message": format!("Event {event_id} reset to pending"),
            "event_id": event_id,
        }))
        .into_response(),
        Ok(false) => (
            StatusCode::NOT_FOUND,
            Json(json!({
                "error": format!("Dead event {event_id} not found or already processed")
            })),
        )
            .into_response(),
        Err(err) => {
            error!(event_id, error = %err, "failed to retry dead event");
            internal_error()
        }
    }
}

#[derive(Debug, Deserialize)]
struct RetryBatchRequest {
    #[serde(default)]
    event_ids: Vec<i64>,
}

async fn retry_dead_events_batch<F: StoreFactory>(
    State(state): State<Arc<ApiState<F>>>,
    Json(body): Json<RetryBatchRequest>,
) -> Response {
    if body.event_ids.is_empty() || body.event_ids.iter().any(|id| *id < 1) {
        return bad_request("event_ids must be a non-empty list of positive integers");
    }

    let mut store = match open_store(&state).await {
        Ok(store) => store,
        Err(response) => return response,
    };

    let requested = body.event_ids.len();
    match store.reset_dead_to_pending_batch(body.event_ids).await {
        Ok(processed) => Json(json!({
            "status": "success",
            "message": format!("{processed} event(s) reset to pending"),
            "requested": requested,
            "processed": processed,
        }))
        .into_response(),
        Err(err) => {
            error!(error = %err, "failed to retry dead events batch");
            internal_error()
        }
    }
}

async fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": "Not Found",
            "message": "The requested resource was not found"
        })),
    )
        .into_response()
}

async fn open_store<F: StoreFactory>(state: &ApiState<F>) -> Result<F::Store, Response> {
    state.factory.open().await.map_err(|err| {
        error!(error = %err, "failed to open repository for request");
        internal_error()
    })
}

fn internal_error() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": "Internal server error"})),
    )
        .into_response()
}

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({"error": message}))).into_response()
}
