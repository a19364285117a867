//! Tests for the schema migration manager.

use super::*;
use std::sync::Mutex;

/// In-memory store; `objects` stands in for the schema objects each step creates.
#[derive(Default)]
struct MemoryStore {
    history_ready: Mutex<bool>,
    records: Mutex<Vec<MigrationRecord>>,
    objects: Mutex<Vec<&'static str>>,
    fail_on: Option<&'static str>,
}

impl MemoryStore {
    fn failing_on(id: &'static str) -> Self {
        Self {
            fail_on: Some(id),
            ..Default::default()
        }
    }

    fn record_ids(&self) -> Vec<String> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.id.clone())
            .collect()
    }

    fn objects(&self) -> Vec<&'static str> {
        self.objects.lock().unwrap().clone()
    }
}

#[async_trait]
impl MigrationStore for MemoryStore {
    async fn ensure_history(&self) -> Result<()> {
        *self.history_ready.lock().unwrap() = true;
        Ok(())
    }

    async fn applied(&self) -> Result<Vec<MigrationRecord>> {
        assert!(*self.history_ready.lock().unwrap());
        Ok(self.records.lock().unwrap().clone())
    }

    async fn apply(&self, migration: &Migration) -> Result<()> {
        if self.fail_on == Some(migration.id) {
            return Err(Error::Write(format!("syntax error in {}", migration.id)));
        }
        self.objects.lock().unwrap().push(migration.up);
        self.records.lock().unwrap().push(MigrationRecord {
            id: migration.id.to_string(),
            applied_at: Utc::now(),
        });
        Ok(())
    }

    async fn revert(&self, migration: &Migration) -> Result<()> {
        self.objects.lock().unwrap().retain(|o| *o != migration.up);
        self.records.lock().unwrap().retain(|r| r.id != migration.id);
        Ok(())
    }
}

fn steps() -> Vec<Migration> {
    vec![
        Migration {
            id: "0001",
            up: "create a",
            down: "drop a",
        },
        Migration {
            id: "0002",
            up: "create b",
            down: "drop b",
        },
        Migration {
            id: "0003",
            up: "create c",
            down: "drop c",
        },
    ]
}

#[tokio::test]
async fn test_apply_runs_all_in_order() {
    // Arrange
    let store = MemoryStore::default();
    let migrator = Migrator::with_migrations(&store, steps()).unwrap();

    // Act
    let summary = migrator.apply().await.unwrap();

    // Assert
    assert_eq!(summary.applied, vec!["0001", "0002", "0003"]);
    assert_eq!(summary.already_applied, 0);
    assert_eq!(store.record_ids(), vec!["0001", "0002", "0003"]);
}

#[tokio::test]
async fn test_apply_twice_is_noop() {
    // Arrange
    let store = MemoryStore::default();
    let migrator = Migrator::with_migrations(&store, steps()).unwrap();
    migrator.apply().await.unwrap();

    // Act
    let summary = migrator.apply().await.unwrap();

    // Assert
    assert!(summary.applied.is_empty());
    assert_eq!(summary.already_applied, 3);
    assert_eq!(store.record_ids().len(), 3);
}

#[tokio::test]
async fn test_failing_step_stops_and_is_not_recorded() {
    // Arrange
    let store = MemoryStore::failing_on("0002");
    let migrator = Migrator::with_migrations(&store, steps()).unwrap();

    // Act
    let result = migrator.apply().await;

    // Assert
    match result {
        Err(Error::Schema { id, reason }) => {
            assert_eq!(id, "0002");
            assert!(reason.contains("syntax error"));
        }
        other => panic!("expected schema error, got {other:?}"),
    }
    assert_eq!(store.record_ids(), vec!["0001"]);
}

#[tokio::test]
async fn test_rollback_undoes_only_most_recent() {
    // Arrange
    let store = MemoryStore::default();
    let migrator = Migrator::with_migrations(&store, steps()).unwrap();
    migrator.apply().await.unwrap();

    // Act
    let rolled_back = migrator.rollback().await.unwrap();

    // Assert
    assert_eq!(rolled_back.as_deref(), Some("0003"));
    assert_eq!(store.record_ids(), vec!["0001", "0002"]);
    assert_eq!(store.objects(), vec!["create a", "create b"]);
}

#[tokio::test]
async fn test_rollback_after_apply_restores_pre_migration_state() {
    // Arrange
    let store = MemoryStore::default();
    let migrator = Migrator::new(&store);
    let before = store.objects();

    // Act
    migrator.apply().await.unwrap();
    let rolled_back = migrator.rollback().await.unwrap();

    // Assert
    assert_eq!(rolled_back.as_deref(), Some("initial"));
    assert_eq!(store.objects(), before);
    assert!(store.record_ids().is_empty());
}

#[tokio::test]
async fn test_rollback_with_nothing_applied_is_noop() {
    let store = MemoryStore::default();
    let migrator = Migrator::with_migrations(&store, steps()).unwrap();

    assert_eq!(migrator.rollback().await.unwrap(), None);
}

#[tokio::test]
async fn test_rollback_all_unwinds_stack() {
    // Arrange
    let store = MemoryStore::default();
    let migrator = Migrator::with_migrations(&store, steps()).unwrap();
    migrator.apply().await.unwrap();

    // Act
    let rolled_back = migrator.rollback_all().await.unwrap();

    // Assert
    assert_eq!(rolled_back, vec!["0003", "0002", "0001"]);
    assert!(store.objects().is_empty());
}

#[tokio::test]
async fn test_out_of_order_history_rejected() {
    // Arrange
    let store = MemoryStore::default();
    store.records.lock().unwrap().push(MigrationRecord {
        id: "0002".to_string(),
        applied_at: Utc::now(),
    });
    let migrator = Migrator::with_migrations(&store, steps()).unwrap();

    // Act
    let result = migrator.apply().await;

    // Assert
    assert!(matches!(result, Err(Error::Schema { id, .. }) if id == "0001"));
}

#[tokio::test]
async fn test_unknown_recorded_id_rejected() {
    let store = MemoryStore::default();
    store.records.lock().unwrap().push(MigrationRecord {
        id: "legacy".to_string(),
        applied_at: Utc::now(),
    });
    let migrator = Migrator::with_migrations(&store, steps()).unwrap();

    assert!(matches!(migrator.rollback().await, Err(Error::Schema { .. })));
}

#[tokio::test]
async fn test_status_reports_applied_steps() {
    // Arrange
    let store = MemoryStore::failing_on("0003");
    let migrator = Migrator::with_migrations(&store, steps()).unwrap();
    let _ = migrator.apply().await;

    // Act
    let status = migrator.status().await.unwrap();

    // Assert
    let applied: Vec<bool> = status.iter().map(|s| s.applied_at.is_some()).collect();
    assert_eq!(applied, vec![true, true, false]);
}

#[test]
fn test_duplicate_ids_rejected() {
    let store = MemoryStore::default();
    let mut list = steps();
    list.push(list[0]);

    assert!(matches!(
        Migrator::with_migrations(&store, list),
        Err(Error::Config(_))
    ));
}

#[test]
fn test_initial_migration_covers_all_tables() {
    for table in crate::relational::Table::ALL {
        assert!(INITIAL.up.contains(&format!("CREATE TABLE IF NOT EXISTS {}", table.name())));
        assert!(INITIAL.down.contains(table.name()));
    }
}
