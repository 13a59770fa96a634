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

//! Dead-letter queue queries and resets.
//!
//! These run outside the claim transaction on short-lived observability
//! repositories. A reset is conditional on `status = 'dead'` so it is
//! serialized against the worker-side retry/dead update at the store.

use chrono::Utc;
use diesel::prelude::*;
use diesel::PgConnection;

use crate::database::schema::outbox_event;
use crate::models::{EventRecord, EventStatus};

/// Upper bound on a single dead-event page.
pub const MAX_DEAD_EVENT_LIMIT: i64 = 1000;

/// Pagination and filtering for dead-event listings.
///
/// Out-of-range arguments clamp rather than error.
#[derive(Debug, Clone)]
pub struct DeadEventQuery {
    pub limit: i64,
    pub offset: i64,
    pub aggregate_type: Option<String>,
    pub event_type: Option<String>,
}

impl Default for DeadEventQuery {
    fn default() -> Self {
        Self {
            limit: 100,
            offset: 0,
            aggregate_type: None,
            event_type: None,
        }
    }
}

impl DeadEventQuery {
    pub fn new(
        limit: i64,
        offset: i64,
        aggregate_type: Option<String>,
        event_type: Option<String>,
    ) -> Self {
        Self {
            limit: limit.clamp(1, MAX_DEAD_EVENT_LIMIT),
            offset: offset.max(0),
            aggregate_type: aggregate_type.filter(|s| !s.is_empty()),
            event_type: event_type.filter(|s| !s.is_empty()),
        }
    }
}

pub(super) fn fetch_dead(
    conn: &mut PgConnection,
    query: DeadEventQuery,
) -> QueryResult<Vec<EventRecord>> {
    let mut stmt = outbox_event::table
        .select(EventRecord::as_select())
        .into_boxed()
        .filter(outbox_event::status.eq(EventStatus::Dead.as_str()));

    if let Some(aggregate_type) = query.aggregate_type {
        stmt = stmt.filter(outbox_event::aggregate_type.eq(aggregate_type));
    }
    if let Some(event_type) = query.event_type {
        stmt = stmt.filter(outbox_event::event_type.eq(event_type));
    }

    stmt.order(outbox_event::created_at.desc())
        .limit(query.limit)
        .offset(query.offset)
        .load(conn)
}

pub(super) fn count_dead(
    conn: &mut PgConnection,
    aggregate_type: Option<String>,
    event_type: Option<String>,
) -> QueryResult<i64> {
    let mut stmt = outbox_event::table
        .select(diesel::dsl::count_star())
        .into_boxed()
        .filter(outbox_event::status.eq(EventStatus::Dead.as_str()));

    if let Some(aggregate_type) = aggregate_type {
        stmt = stmt.filter(outbox_event::aggregate_type.eq(aggregate_type));
    }
    if let Some(event_type) = event_type {
        stmt = stmt.filter(outbox_event::event_type.eq(event_type));
    }

    stmt.first(conn)
}

pub(super) fn get_dead(
    conn: &mut PgConnection,
    event_id: i64,
) -> QueryResult<Option<EventRecord>> {
    outbox_event::table
        .select(EventRecord::as_select())
        .filter(outbox_event::id.eq(event_id))
        .filter(outbox_event::status.eq(EventStatus::Dead.as_str()))
        .first(conn)
        .optional()
}

/// Resets one dead row to `pending` with a zeroed attempt counter; returns the
/// number of rows changed (0 when the row is missing or not dead).
pub(super) fn reset_dead(conn: &mut PgConnection, event_id: i64) -> QueryResult<usize> {
    diesel::update(
        outbox_event::table
            .filter(outbox_event::id.eq(event_id))
            .filter(outbox_event::status.eq(EventStatus::Dead.as_str())),
    )
    .set((
        outbox_event::status.eq(EventStatus::Pending.as_str()),
        outbox_event::attempts.eq(0),
        outbox_event::next_run_at.eq(Utc::now()),
    ))
    .execute(conn)
}

/// Batch variant of [`reset_dead`]; non-dead ids are silently ignored.
pub(super) fn reset_dead_batch(conn: &mut PgConnection, event_ids: Vec<i64>) -> QueryResult<usize> {
    diesel::update(
        outbox_event::table
            .filter(outbox_event::id.eq_any(event_ids))
            .filter(outbox_event::status.eq(EventStatus::Dead.as_str())),
    )
    .set((
        outbox_event::status.eq(EventStatus::Pending.as_str()),
        outbox_event::attempts.eq(0),
        outbox_event::next_run_at.eq(Utc::now()),
    ))
    .execute(conn)
}
