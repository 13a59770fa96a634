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

//! Outbox Event Model
//!
//! This module defines the value type representing one outbox row, together
//! with its controlled status enumeration and the two database-facing row
//! shapes it is constructed from: [`EventRow`] (raw claim query, nullable
//! columns so schema drift is detected rather than crashing a worker) and
//! [`EventRecord`] (typed DSL queries over the `outbox_event` table).
//!
//! The payload stays a structured [`serde_json::Value`] end to end; it is
//! never round-tripped through a string.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::ModelError;

/// Lifecycle status of an outbox row.
///
/// `Done` and `Dead` are terminal under engine control; a dead row leaves the
/// terminal state only through an explicit DLQ reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Pending,
    Retry,
    Done,
    Dead,
}

impl EventStatus {
    /// Returns the string representation stored in the `status` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Pending => "pending",
            EventStatus::Retry => "retry",
            EventStatus::Done => "done",
            EventStatus::Dead => "dead",
        }
    }

    /// Parses a status from its column representation.
    pub fn parse(s: &str) -> Result<Self, ModelError> {
        match s {
            "pending" => Ok(EventStatus::Pending),
            "retry" => Ok(EventStatus::Retry),
            "done" => Ok(EventStatus::Done),
            "dead" => Ok(EventStatus::Dead),
            other => Err(ModelError::UnknownStatus(other.to_string())),
        }
    }

    /// Returns true if the engine will never claim a row in this status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, EventStatus::Done | EventStatus::Dead)
    }
}

impl std::fmt::Display for EventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One outbox row as seen by the engine.
///
/// `id` is `None` only for defensively-handled corrupt rows; the worker logs
/// and skips such rows instead of crashing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub event_type: String,
    pub payload: JsonValue,
    pub status: EventStatus,
    pub attempts: i32,
    pub next_run_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl OutboxEvent {
    /// Builds an event from a raw claim-query row.
    ///
    /// A missing `next_run_at` or an unknown status means the table does not
    /// match the expected schema; both fail loudly so the caller can log and
    /// skip the row.
    pub fn from_row(row: EventRow) -> Result<Self, ModelError> {
        let next_run_at = row.next_run_at.ok_or(ModelError::MissingNextRunAt)?;
        let status = EventStatus::parse(&row.status)?;

        Ok(Self {
            id: row.id,
            aggregate_type: row.aggregate_type,
            aggregate_id: row.aggregate_id,
            event_type: row.event_type,
            payload: row.payload,
            status,
            attempts: row.attempts,
            next_run_at,
            created_at: row.created_at,
        })
    }

    /// Returns true if the row is eligible for claiming at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.status.is_terminal() && self.next_run_at <= now
    }
}

impl TryFrom<EventRecord> for OutboxEvent {
    type Error = ModelError;

    fn try_from(record: EventRecord) -> Result<Self, ModelError> {
        let status = EventStatus::parse(&record.status)?;
        Ok(Self {
            id: Some(record.id),
            aggregate_type: record.aggregate_type,
            aggregate_id: record.aggregate_id,
            event_type: record.event_type,
            payload: record.payload,
            status,
            attempts: record.attempts,
            next_run_at: record.next_run_at,
            created_at: Some(record.created_at),
        })
    }
}

/// Raw row shape returned by the locking claim query.
///
/// Columns are nullable on purpose: a row that comes back without an id or a
/// `next_run_at` indicates schema corruption, and the repository must be able
/// to observe that instead of aborting the whole batch.
#[derive(Debug, QueryableByName)]
pub struct EventRow {
    #[diesel(sql_type = diesel::sql_types::Nullable<diesel::sql_types::BigInt>)]
    pub id: Option<i64>,
    #[diesel(sql_type = diesel::sql_types::Text)]
    pub aggregate_type: String,
    #[diesel(sql_type = diesel::sql_types::Text)]
    pub aggregate_id: String,
    #[diesel(sql_type = diesel::sql_types::Text)]
    pub event_type: String,
    #[diesel(sql_type = diesel::sql_types::Jsonb)]
    pub payload: JsonValue,
    #[diesel(sql_type = diesel::sql_types::Text)]
    pub status: String,
    #[diesel(sql_type = diesel::sql_types::Integer)]
    pub attempts: i32,
    #[diesel(sql_type = diesel::sql_types::Nullable<diesel::sql_types::Timestamptz>)]
    pub next_run_at: Option<DateTime<Utc>>,
    #[diesel(sql_type = diesel::sql_types::Nullable<diesel::sql_types::Timestamptz>)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Typed row shape for DSL queries over `outbox_event`.
#[derive(Debug, Queryable, Selectable)]
#[diesel(table_name = crate::database::schema::outbox_event)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct EventRecord {
    pub id: i64,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub event_type: String,
    pub payload: JsonValue,
    pub status: String,
    pub attempts: i32,
    pub next_run_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}
