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

//! Database schema and migration support.
//!
//! The dispatcher consumes exactly one table, `outbox_event`. Producers insert
//! rows in their own transactions; the engine only claims and transitions them.
//! Migrations are embedded so a deployment can bootstrap its own table.

pub mod schema;

use deadpool_diesel::postgres::{Manager as PgManager, Pool as PgPool, Runtime as PgRuntime};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use tracing::info;

use crate::error::RepositoryError;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// Applies any pending migrations against the given DSN.
///
/// Opens a dedicated short-lived connection; the worker connections are never
/// used for schema management.
pub async fn run_migrations(dsn: &str) -> Result<(), RepositoryError> {
    let manager = PgManager::new(dsn, PgRuntime::Tokio1);
    let pool = PgPool::builder(manager)
        .max_size(1)
        .build()
        .map_err(|e| RepositoryError::Connection(e.to_string()))?;

    let conn = pool
        .get()
        .await
        .map_err(|e| RepositoryError::Connection(e.to_string()))?;

    let applied = conn
        .interact(|conn| {
            conn.run_pending_migrations(MIGRATIONS)
                .map(|versions| versions.len())
                .map_err(|e| RepositoryError::Migration(e.to_string()))
        })
        .await
        .map_err(|e| RepositoryError::Connection(e.to_string()))??;

    if applied > 0 {
        info!(applied, "database migrations applied");
    }
    Ok(())
}
