//! `PostgreSQL` destination.
//!
//! Every row write is its own statement; there is no transaction spanning
//! records, so a failed run leaves valid partial progress that a re-run
//! converges through the upsert.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, FromRow, PgPool};
use std::time::Duration;
use tracing::debug;

use crate::config::PostgresConfig;
use crate::error::{Error, Result};
use crate::relational::{RelationalRow, RowSink, Table, UpsertOutcome};
use crate::schema::{Migration, MigrationRecord, MigrationStore};

const HISTORY_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS migrations (
    id          VARCHAR(255) PRIMARY KEY,
    applied_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
)"#;

#[derive(Debug, FromRow)]
struct HistoryRow {
    id: String,
    applied_at: DateTime<Utc>,
}

/// Pooled `PostgreSQL` connection.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connects using the configured settings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if the server cannot be reached.
    pub async fn connect(config: &PostgresConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(config.connect_options()?)
            .await
            .map_err(|e| Error::Connection(format!("cannot connect to postgres: {}", e)))?;
        Ok(Self { pool })
    }

    /// Wraps an existing pool.
    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Closes every pooled connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Number of live rows in `table`.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn count_rows(&self, table: Table) -> Result<i64> {
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE deleted_at IS NULL",
            table.name()
        );
        sqlx::query_scalar::<_, i64>(&sql)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| sql_error(&format!("count {}", table.name()), e))
    }
}

/// Upsert statement for `table`.
///
/// Returns no row when an identical live row already exists; otherwise
/// `inserted` tells a fresh insert (`xmax = 0`) from an update.
fn upsert_sql(table: Table) -> String {
    let name = table.name();
    let key = table.key_column();
    format!(
        "INSERT INTO {name} ({key}, value, created_at, updated_at) \
         VALUES ($1, $2, NOW(), NOW()) \
         ON CONFLICT ({key}) DO UPDATE \
         SET value = EXCLUDED.value, updated_at = NOW(), deleted_at = NULL \
         WHERE {name}.value IS DISTINCT FROM EXCLUDED.value OR {name}.deleted_at IS NOT NULL \
         RETURNING (xmax = 0) AS inserted"
    )
}

#[async_trait]
impl RowSink for PgStore {
    async fn upsert(&self, row: &RelationalRow) -> Result<UpsertOutcome> {
        let inserted = sqlx::query_scalar::<_, bool>(&upsert_sql(row.table()))
            .bind(row.natural_key())
            .bind(row.value())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                sql_error(
                    &format!("{} '{}'", row.table().name(), row.natural_key()),
                    e,
                )
            })?;

        Ok(match inserted {
            Some(true) => UpsertOutcome::Inserted,
            Some(false) => UpsertOutcome::Updated,
            None => UpsertOutcome::Unchanged,
        })
    }
}

#[async_trait]
impl MigrationStore for PgStore {
    async fn ensure_history(&self) -> Result<()> {
        sqlx::query(HISTORY_TABLE)
            .execute(&self.pool)
            .await
            .map_err(|e| sql_error("cannot create migrations table", e))?;
        Ok(())
    }

    async fn applied(&self) -> Result<Vec<MigrationRecord>> {
        let rows = sqlx::query_as::<_, HistoryRow>(
            "SELECT id, applied_at FROM migrations ORDER BY applied_at, id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| sql_error("cannot read migrations table", e))?;

        Ok(rows
            .into_iter()
            .map(|r| MigrationRecord {
                id: r.id,
                applied_at: r.applied_at,
            })
            .collect())
    }

    async fn apply(&self, migration: &Migration) -> Result<()> {
        let context = format!("apply migration '{}'", migration.id);
        let mut tx = self.pool.begin().await.map_err(|e| sql_error(&context, e))?;
        // A bare &str runs as a simple query, which allows several statements.
        (&mut *tx)
            .execute(migration.up)
            .await
            .map_err(|e| sql_error(&context, e))?;
        sqlx::query("INSERT INTO migrations (id, applied_at) VALUES ($1, NOW())")
            .bind(migration.id)
            .execute(&mut *tx)
            .await
            .map_err(|e| sql_error(&context, e))?;
        tx.commit().await.map_err(|e| sql_error(&context, e))?;
        debug!("Recorded migration '{}'", migration.id);
        Ok(())
    }

    async fn revert(&self, migration: &Migration) -> Result<()> {
        let context = format!("revert migration '{}'", migration.id);
        let mut tx = self.pool.begin().await.map_err(|e| sql_error(&context, e))?;
        (&mut *tx)
            .execute(migration.down)
            .await
            .map_err(|e| sql_error(&context, e))?;
        sqlx::query("DELETE FROM migrations WHERE id = $1")
            .bind(migration.id)
            .execute(&mut *tx)
            .await
            .map_err(|e| sql_error(&context, e))?;
        tx.commit().await.map_err(|e| sql_error(&context, e))?;
        debug!("Removed migration record '{}'", migration.id);
        Ok(())
    }
}

/// Maps a driver error onto the crate error.
///
/// Losing the server (pool exhausted or closed, socket or TLS failure) is a
/// [`Error::Connection`] and stops the run; anything else stays a per-record
/// [`Error::Write`].
fn sql_error(context: &str, e: sqlx::Error) -> Error {
    match e {
        sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_) => Error::Connection(format!("{}: {}", context, e)),
        other => Error::Write(format!("{}: {}", context, other)),
    }
}
