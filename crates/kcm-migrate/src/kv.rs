//! Embedded key-value source store.
//!
//! Partitions are `redb` tables keyed and valued by raw bytes. A
//! [`RedbReadView`] holds one read transaction for its whole lifetime, so
//! every enumeration made through it observes the same point-in-time image.

use redb::{
    Database, ReadOnlyTable, ReadTransaction, ReadableDatabase, ReadableTable,
    ReadableTableMetadata, TableDefinition, TableHandle,
};
use std::ops::Bound;
use std::path::Path;

use crate::error::{Error, Result};

/// A `(key, value)` pair read from a partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRecord {
    /// Raw key bytes.
    pub key: Vec<u8>,
    /// Raw value bytes.
    pub value: Vec<u8>,
}

impl SourceRecord {
    /// Key rendered for logs.
    #[must_use]
    pub fn display_key(&self) -> String {
        String::from_utf8_lossy(&self.key).into_owned()
    }
}

/// Read-only, point-in-time view of a partitioned key-value store.
pub trait ReadView {
    /// Names of every partition in the view, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the partition catalog cannot be read.
    fn partitions(&self) -> Result<Vec<String>>;

    /// Number of entries in `partition`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PartitionUnavailable`] if the partition is missing or
    /// unreadable.
    fn entry_count(&self, partition: &str) -> Result<u64>;

    /// Up to `limit` records whose key sorts strictly after `after`.
    ///
    /// Records come back in native key order. Feeding the last key of one
    /// batch into the next call walks the partition without gaps or
    /// duplicates.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PartitionUnavailable`] if the partition is missing or
    /// unreadable.
    fn read_batch(
        &self,
        partition: &str,
        after: Option<&[u8]>,
        limit: usize,
    ) -> Result<Vec<SourceRecord>>;
}

/// File-backed `redb` store.
pub struct RedbSource {
    db: Database,
}

impl RedbSource {
    /// Opens an existing store file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if the file cannot be opened.
    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::Connection(format!(
                "store file {} does not exist",
                path.display()
            )));
        }
        let db = Database::open(path).map_err(|e| {
            Error::Connection(format!("cannot open store {}: {}", path.display(), e))
        })?;
        Ok(Self { db })
    }

    /// Wraps an already open database.
    #[must_use]
    pub fn from_database(db: Database) -> Self {
        Self { db }
    }

    /// Starts a snapshot read.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if the read transaction cannot start.
    pub fn read_view(&self) -> Result<RedbReadView> {
        let txn = self
            .db
            .begin_read()
            .map_err(|e| Error::Connection(format!("cannot begin read transaction: {}", e)))?;
        Ok(RedbReadView { txn })
    }
}

/// Snapshot view; the read transaction ends when this is dropped.
pub struct RedbReadView {
    txn: ReadTransaction,
}

impl RedbReadView {
    fn open(&self, partition: &str) -> Result<ReadOnlyTable<&'static [u8], &'static [u8]>> {
        let table_def: TableDefinition<'_, &[u8], &[u8]> = TableDefinition::new(partition);
        self.txn
            .open_table(table_def)
            .map_err(|e| unavailable(partition, e))
    }
}

impl ReadView for RedbReadView {
    fn partitions(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self
            .txn
            .list_tables()
            .map_err(|e| Error::Connection(format!("cannot list partitions: {}", e)))?
            .map(|handle| handle.name().to_string())
            .collect();
        names.sort();
        Ok(names)
    }

    fn entry_count(&self, partition: &str) -> Result<u64> {
        self.open(partition)?
            .len()
            .map_err(|e| unavailable(partition, e))
    }

    fn read_batch(
        &self,
        partition: &str,
        after: Option<&[u8]>,
        limit: usize,
    ) -> Result<Vec<SourceRecord>> {
        let table = self.open(partition)?;
        let lower = after.map_or(Bound::Unbounded, Bound::Excluded);
        let range = table
            .range::<&[u8]>((lower, Bound::Unbounded))
            .map_err(|e| unavailable(partition, e))?;

        let mut records = Vec::with_capacity(limit.min(1024));
        for entry in range.take(limit) {
            let (key, value) = entry.map_err(|e| unavailable(partition, e))?;
            records.push(SourceRecord {
                key: key.value().to_vec(),
                value: value.value().to_vec(),
            });
        }
        Ok(records)
    }
}

fn unavailable(partition: &str, e: impl std::fmt::Display) -> Error {
    Error::PartitionUnavailable {
        partition: partition.to_string(),
        reason: e.to_string(),
    }
}
