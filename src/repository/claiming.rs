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

//! Claim and outcome SQL.
//!
//! The claim uses `FOR UPDATE SKIP LOCKED` so concurrent workers never block
//! on or duplicate each other's rows, and the retry-vs-dead decision is a
//! single server-evaluated `UPDATE` so it cannot race a DLQ reset. Everything
//! here runs on a connection whose claim transaction is managed by the
//! repository; these functions never commit.

use chrono::{DateTime, Utc};
use diesel::connection::{AnsiTransactionManager, TransactionManager};
use diesel::prelude::*;
use diesel::PgConnection;

use crate::database::schema::outbox_event;
use crate::models::{EventRow, EventStatus};

/// Selects due rows in id order and locks them for the life of the enclosing
/// transaction. Rows locked by other workers are skipped, not waited on.
const CLAIM_DUE_SQL: &str = r#"
SELECT id, aggregate_type, aggregate_id, event_type, payload,
       status, attempts, next_run_at, created_at
FROM outbox_event
WHERE status IN ('pending', 'retry')
  AND next_run_at <= now()
ORDER BY id
FOR UPDATE SKIP LOCKED
LIMIT $1
"#;

/// Computes retry-vs-dead on the server. `next_run_at` is frozen on the dead
/// branch so the DLQ shows when the row last would have run.
const MARK_RETRY_OR_DEAD_SQL: &str = r#"
UPDATE outbox_event
SET status = CASE WHEN attempts + 1 >= $1 THEN 'dead' ELSE 'retry' END,
    attempts = attempts + 1,
    next_run_at = CASE WHEN attempts + 1 >= $2 THEN next_run_at ELSE $3 END
WHERE id = $4
RETURNING status
"#;

#[derive(Debug, QueryableByName)]
struct StatusRow {
    #[diesel(sql_type = diesel::sql_types::Text)]
    status: String,
}

/// Opens the claim transaction and locks up to `batch_size` due rows.
///
/// If the select fails the transaction is rolled back before the error is
/// returned, so a failed claim never leaves an open transaction behind.
pub(super) fn begin_claim(
    conn: &mut PgConnection,
    batch_size: i64,
) -> QueryResult<Vec<EventRow>> {
    AnsiTransactionManager::begin_transaction(conn)?;
    match diesel::sql_query(CLAIM_DUE_SQL)
        .bind::<diesel::sql_types::BigInt, _>(batch_size)
        .load(conn)
    {
        Ok(rows) => Ok(rows),
        Err(err) => {
            let _ = AnsiTransactionManager::rollback_transaction(conn);
            Err(err)
        }
    }
}

/// Transitions a claimed row to `done`, incrementing its attempt count.
pub(super) fn mark_success(conn: &mut PgConnection, event_id: i64) -> QueryResult<usize> {
    diesel::update(outbox_event::table.find(event_id))
        .set((
            outbox_event::status.eq(EventStatus::Done.as_str()),
            outbox_event::attempts.eq(outbox_event::attempts + 1),
        ))
        .execute(conn)
}

/// Transitions a claimed row to `retry` or `dead` and returns the resulting
/// status string.
pub(super) fn mark_retry_or_dead(
    conn: &mut PgConnection,
    event_id: i64,
    max_attempts: i32,
    next_run_at: DateTime<Utc>,
) -> QueryResult<String> {
    let row: StatusRow = diesel::sql_query(MARK_RETRY_OR_DEAD_SQL)
        .bind::<diesel::sql_types::Integer, _>(max_attempts)
        .bind::<diesel::sql_types::Integer, _>(max_attempts)
        .bind::<diesel::sql_types::Timestamptz, _>(next_run_at)
        .bind::<diesel::sql_types::BigInt, _>(event_id)
        .get_result(conn)?;
    Ok(row.status)
}

/// Commits the open claim transaction.
pub(super) fn commit_claim(conn: &mut PgConnection) -> QueryResult<()> {
    AnsiTransactionManager::commit_transaction(conn)
}

/// Rolls back the open claim transaction, releasing every row lock.
pub(super) fn release_claim(conn: &mut PgConnection) -> QueryResult<()> {
    AnsiTransactionManager::rollback_transaction(conn)
}
