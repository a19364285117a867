//! Schema migration manager.
//!
//! Migrations form a stack: they are applied in declared order and only the
//! most recently applied one can be rolled back. The applied set is kept in
//! the store's `migrations` table, one record per step.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tracing::info;

use crate::error::{Error, Result};

/// One schema step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Migration {
    /// Unique id recorded once the step is applied.
    pub id: &'static str,
    /// Forward SQL.
    pub up: &'static str,
    /// Rollback SQL.
    pub down: &'static str,
}

/// A step recorded as applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationRecord {
    /// Migration id.
    pub id: String,
    /// When the step was applied.
    pub applied_at: DateTime<Utc>,
}

/// Status of a declared migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationStatus {
    /// Migration id.
    pub id: &'static str,
    /// Application time, if applied.
    pub applied_at: Option<DateTime<Utc>>,
}

/// Outcome of [`Migrator::apply`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplySummary {
    /// Ids applied by this call, in order.
    pub applied: Vec<String>,
    /// Steps that were already applied.
    pub already_applied: usize,
}

/// Storage for schema steps and their history.
#[async_trait]
pub trait MigrationStore: Send + Sync {
    /// Creates the history table if needed.
    async fn ensure_history(&self) -> Result<()>;

    /// Every recorded step.
    async fn applied(&self) -> Result<Vec<MigrationRecord>>;

    /// Runs `migration.up` and records it, atomically.
    async fn apply(&self, migration: &Migration) -> Result<()>;

    /// Runs `migration.down` and removes its record, atomically.
    async fn revert(&self, migration: &Migration) -> Result<()>;
}

/// Creates the three destination tables.
pub const INITIAL: Migration = Migration {
    id: "initial",
    up: r#"
CREATE TABLE IF NOT EXISTS cert_details (
    id          SERIAL PRIMARY KEY,
    created_at  TIMESTAMPTZ,
    updated_at  TIMESTAMPTZ,
    deleted_at  TIMESTAMPTZ,
    domain      TEXT UNIQUE,
    value       TEXT
);
CREATE INDEX IF NOT EXISTS idx_cert_details_deleted_at ON cert_details (deleted_at);

CREATE TABLE IF NOT EXISTS domain_altnames (
    id          SERIAL PRIMARY KEY,
    created_at  TIMESTAMPTZ,
    updated_at  TIMESTAMPTZ,
    deleted_at  TIMESTAMPTZ,
    domain      TEXT UNIQUE,
    value       TEXT
);
CREATE INDEX IF NOT EXISTS idx_domain_altnames_deleted_at ON domain_altnames (deleted_at);

CREATE TABLE IF NOT EXISTS user_infos (
    id          SERIAL PRIMARY KEY,
    created_at  TIMESTAMPTZ,
    updated_at  TIMESTAMPTZ,
    deleted_at  TIMESTAMPTZ,
    email       TEXT UNIQUE,
    value       TEXT
);
CREATE INDEX IF NOT EXISTS idx_user_infos_deleted_at ON user_infos (deleted_at);
"#,
    down: "DROP TABLE IF EXISTS cert_details, domain_altnames, user_infos;",
};

/// Declared migrations, in order.
#[must_use]
pub fn migrations() -> Vec<Migration> {
    vec![INITIAL]
}

/// Applies and rolls back a declared list of migrations.
pub struct Migrator<'a, S: MigrationStore + ?Sized> {
    store: &'a S,
    migrations: Vec<Migration>,
}

impl<'a, S: MigrationStore + ?Sized> Migrator<'a, S> {
    /// Creates a migrator over the crate's declared migrations.
    #[must_use]
    pub fn new(store: &'a S) -> Self {
        Self {
            store,
            migrations: migrations(),
        }
    }

    /// Creates a migrator over an explicit list.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if an id is empty or repeated.
    pub fn with_migrations(store: &'a S, migrations: Vec<Migration>) -> Result<Self> {
        let mut seen = HashSet::new();
        for migration in &migrations {
            if migration.id.is_empty() {
                return Err(Error::Config("migration id cannot be empty".to_string()));
            }
            if !seen.insert(migration.id) {
                return Err(Error::Config(format!(
                    "duplicate migration id '{}'",
                    migration.id
                )));
            }
        }
        Ok(Self { store, migrations })
    }

    /// Applies every step not yet recorded, in declared order.
    ///
    /// Safe to call when everything is applied. Stops at the first failing
    /// step; that step is not recorded.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Schema`] naming the failing step.
    pub async fn apply(&self) -> Result<ApplySummary> {
        let applied_count = self.applied_prefix().await?;
        let mut summary = ApplySummary {
            applied: Vec::new(),
            already_applied: applied_count,
        };

        for migration in &self.migrations[applied_count..] {
            info!("Applying migration '{}'", migration.id);
            self.store
                .apply(migration)
                .await
                .map_err(|e| schema_error(migration.id, e))?;
            summary.applied.push(migration.id.to_string());
        }

        if summary.applied.is_empty() {
            info!("Schema up to date ({} applied)", applied_count);
        }
        Ok(summary)
    }

    /// Rolls back the most recently applied step.
    ///
    /// Returns the id rolled back, or `None` if nothing was applied.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Schema`] if the rollback fails.
    pub async fn rollback(&self) -> Result<Option<String>> {
        let applied_count = self.applied_prefix().await?;
        let Some(migration) = applied_count
            .checked_sub(1)
            .map(|last| &self.migrations[last])
        else {
            info!("Nothing to roll back");
            return Ok(None);
        };

        info!("Rolling back migration '{}'", migration.id);
        self.store
            .revert(migration)
            .await
            .map_err(|e| schema_error(migration.id, e))?;
        Ok(Some(migration.id.to_string()))
    }

    /// Rolls back every applied step, most recent first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Schema`] on the first failing rollback.
    pub async fn rollback_all(&self) -> Result<Vec<String>> {
        let mut rolled_back = Vec::new();
        while let Some(id) = self.rollback().await? {
            rolled_back.push(id);
        }
        Ok(rolled_back)
    }

    /// Each declared step with its application time.
    ///
    /// # Errors
    ///
    /// Returns an error if the history cannot be read.
    pub async fn status(&self) -> Result<Vec<MigrationStatus>> {
        self.store.ensure_history().await?;
        let applied: HashMap<String, DateTime<Utc>> = self
            .store
            .applied()
            .await?
            .into_iter()
            .map(|r| (r.id, r.applied_at))
            .collect();
        Ok(self
            .migrations
            .iter()
            .map(|m| MigrationStatus {
                id: m.id,
                applied_at: applied.get(m.id).copied(),
            })
            .collect())
    }

    /// Number of leading declared steps that are applied.
    ///
    /// The history must be exactly a prefix of the declared order.
    async fn applied_prefix(&self) -> Result<usize> {
        self.store
            .ensure_history()
            .await
            .map_err(|e| schema_error("migrations", e))?;
        let applied: HashSet<String> = self
            .store
            .applied()
            .await
            .map_err(|e| schema_error("migrations", e))?
            .into_iter()
            .map(|r| r.id)
            .collect();

        if let Some(unknown) = applied
            .iter()
            .find(|id| !self.migrations.iter().any(|m| m.id == id.as_str()))
        {
            return Err(Error::Schema {
                id: unknown.clone(),
                reason: "recorded but not declared".to_string(),
            });
        }

        let prefix = self
            .migrations
            .iter()
            .take_while(|m| applied.contains(m.id))
            .count();
        if prefix != applied.len() {
            let gap = self.migrations[prefix].id;
            return Err(Error::Schema {
                id: gap.to_string(),
                reason: "history out of order: later steps applied before this one".to_string(),
            });
        }
        Ok(prefix)
    }
}

fn schema_error(id: &str, e: Error) -> Error {
    match e {
        Error::Schema { .. } => e,
        other => Error::Schema {
            id: id.to_string(),
            reason: other.to_string(),
        },
    }
}

#[cfg(test)]
#[path = "schema_tests.rs"]
mod tests;
