//! Key-value to relational ETL pipeline.
//!
//! Walks the three fixed source partitions of a snapshot view and upserts
//! each entry into its table. An unreadable partition only fails that
//! partition; per-record failures are collected rather than aborting.

use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::MigrationOptions;
use crate::error::{Error, Result};
use crate::kv::{ReadView, SourceRecord};
use crate::relational::{RelationalRow, RowSink, Table, UpsertOutcome};
use crate::stats::TransferStats;

/// Fixed source partitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PartitionKind {
    /// `cert-details` → `cert_details`.
    CertDetails,
    /// `domain-altnames` → `domain_altnames`.
    DomainAltnames,
    /// `user-info` → `user_infos`.
    UserInfo,
}

impl PartitionKind {
    /// Every partition, in migration order.
    pub const ALL: [PartitionKind; 3] = [
        PartitionKind::CertDetails,
        PartitionKind::DomainAltnames,
        PartitionKind::UserInfo,
    ];

    /// Partition name in the source store.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::CertDetails => "cert-details",
            Self::DomainAltnames => "domain-altnames",
            Self::UserInfo => "user-info",
        }
    }

    /// Destination table.
    #[must_use]
    pub const fn table(self) -> Table {
        match self {
            Self::CertDetails => Table::CertDetails,
            Self::DomainAltnames => Table::DomainAltnames,
            Self::UserInfo => Table::UserInfos,
        }
    }

    /// Looks up a partition by source name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }
}

/// Maps a source record to its destination row.
///
/// Keys become `domain` (or `email` for `user-info`) and values are copied
/// verbatim.
///
/// # Errors
///
/// Returns [`Error::Transform`] if the key is empty, or if the key or value
/// is not UTF-8 or contains NUL bytes (not storable in `TEXT`).
pub fn transform(record: &SourceRecord, kind: PartitionKind) -> Result<RelationalRow> {
    if record.key.is_empty() {
        return Err(Error::Transform(format!("empty key in {}", kind.name())));
    }
    let key = text_column(&record.key, "key")?;
    let value = text_column(&record.value, "value")?;

    Ok(match kind {
        PartitionKind::CertDetails => RelationalRow::CertDetail { domain: key, value },
        PartitionKind::DomainAltnames => RelationalRow::DomainAltname { domain: key, value },
        PartitionKind::UserInfo => RelationalRow::UserInfo { email: key, value },
    })
}

fn text_column(bytes: &[u8], what: &str) -> Result<String> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| Error::Transform(format!("{} is not UTF-8: {}", what, e)))?;
    if text.contains('\0') {
        return Err(Error::Transform(format!("{} contains NUL bytes", what)));
    }
    Ok(text.to_string())
}

/// ETL options.
#[derive(Debug, Clone)]
pub struct EtlOptions {
    /// Records read per batch.
    pub batch_size: usize,
    /// Count records without writing them.
    pub dry_run: bool,
    /// Draw a progress bar.
    pub show_progress: bool,
}

impl Default for EtlOptions {
    fn default() -> Self {
        Self::from(&MigrationOptions::default())
    }
}

impl From<&MigrationOptions> for EtlOptions {
    fn from(options: &MigrationOptions) -> Self {
        Self {
            batch_size: options.batch_size.max(1),
            dry_run: options.dry_run,
            show_progress: options.show_progress,
        }
    }
}

/// Result for one partition.
#[derive(Debug, Clone)]
pub struct PartitionReport {
    /// Partition migrated.
    pub kind: PartitionKind,
    /// Record counters.
    pub stats: TransferStats,
    /// Set when the partition could not be read (fully or partway).
    pub error: Option<String>,
}

/// Result of a full ETL run.
#[derive(Debug, Clone, Default)]
pub struct EtlReport {
    /// One report per fixed partition, in order.
    pub partitions: Vec<PartitionReport>,
    /// Duration in seconds.
    pub duration_secs: f64,
}

impl EtlReport {
    /// Counters summed over every partition.
    #[must_use]
    pub fn totals(&self) -> TransferStats {
        let mut totals = TransferStats::default();
        for partition in &self.partitions {
            totals.merge(partition.stats.clone());
        }
        totals.duration_secs = self.duration_secs;
        totals
    }

    /// True if every partition was readable and every record transferred.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.partitions
            .iter()
            .all(|p| p.error.is_none() && p.stats.is_clean())
    }

    /// Report for one partition.
    #[must_use]
    pub fn partition(&self, kind: PartitionKind) -> Option<&PartitionReport> {
        self.partitions.iter().find(|p| p.kind == kind)
    }
}

/// ETL pipeline over a snapshot view and a row sink.
pub struct Pipeline<'a, V: ReadView + ?Sized, S: RowSink + ?Sized> {
    view: &'a V,
    sink: &'a S,
    options: EtlOptions,
}

impl<'a, V: ReadView + ?Sized, S: RowSink + ?Sized> Pipeline<'a, V, S> {
    /// Create a new ETL pipeline.
    #[must_use]
    pub fn new(view: &'a V, sink: &'a S, options: EtlOptions) -> Self {
        Self {
            view,
            sink,
            options,
        }
    }

    /// Partition names present in the snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the partition catalog cannot be read.
    pub fn enumerate_partitions(&self) -> Result<Vec<String>> {
        self.view.partitions()
    }

    /// Run the ETL pipeline over the three fixed partitions.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] if `cancel` fires between records, or a
    /// fatal error reported by the sink. Partition and record failures are
    /// reported in the [`EtlReport`] instead.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<EtlReport> {
        let start = std::time::Instant::now();
        let mut report = EtlReport::default();

        info!("Starting KV to relational migration");
        if self.options.dry_run {
            info!("Dry run mode - not writing to destination");
        }

        match self.enumerate_partitions() {
            Ok(names) => {
                for name in names
                    .iter()
                    .filter(|n| PartitionKind::from_name(n).is_none())
                {
                    warn!("Ignoring unknown partition '{}'", name);
                }
            }
            Err(e) => warn!("Cannot enumerate partitions: {}", e),
        }

        let total: u64 = PartitionKind::ALL
            .iter()
            .filter_map(|kind| self.view.entry_count(kind.name()).ok())
            .sum();
        let progress = create_progress_bar(total, self.options.show_progress);

        for kind in PartitionKind::ALL {
            let partition = self.migrate_partition(kind, cancel, &progress).await?;
            report.partitions.push(partition);
        }

        progress.finish_with_message("Migration complete");
        report.duration_secs = start.elapsed().as_secs_f64();

        let totals = report.totals();
        info!(
            "Migration complete: {} in {:.2}s ({:.0} records/sec)",
            totals,
            totals.duration_secs,
            totals.throughput()
        );

        Ok(report)
    }

    /// Migrates one partition.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] or a fatal sink error; read failures are
    /// recorded in the returned report.
    pub async fn migrate_partition(
        &self,
        kind: PartitionKind,
        cancel: &CancellationToken,
        progress: &ProgressBar,
    ) -> Result<PartitionReport> {
        let start = std::time::Instant::now();
        let mut report = PartitionReport {
            kind,
            stats: TransferStats::default(),
            error: None,
        };

        info!("Migrating {} into {}", kind.name(), kind.table().name());

        let mut after: Option<Vec<u8>> = None;
        loop {
            let batch = match self.view.read_batch(
                kind.name(),
                after.as_deref(),
                self.options.batch_size,
            ) {
                Ok(batch) => batch,
                Err(e) => {
                    warn!("Skipping partition {}: {}", kind.name(), e);
                    report.error = Some(e.to_string());
                    break;
                }
            };
            let Some(last) = batch.last() else {
                break;
            };
            after = Some(last.key.clone());
            let exhausted = batch.len() < self.options.batch_size;

            for record in &batch {
                if cancel.is_cancelled() {
                    return Err(Error::Cancelled(format!("migration of {}", kind.name())));
                }
                self.migrate_record(record, kind, &mut report.stats).await?;
                progress.inc(1);
            }

            if exhausted {
                break;
            }
        }

        report.stats.duration_secs = start.elapsed().as_secs_f64();
        info!("{}: {}", kind.name(), report.stats);
        Ok(report)
    }

    async fn migrate_record(
        &self,
        record: &SourceRecord,
        kind: PartitionKind,
        stats: &mut TransferStats,
    ) -> Result<()> {
        let row = match transform(record, kind) {
            Ok(row) => row,
            Err(e) => {
                warn!("{}: cannot transform '{}': {}", kind.name(), record.display_key(), e);
                stats.record_failure(record.display_key(), e);
                return Ok(());
            }
        };

        if self.options.dry_run {
            stats.record_transferred();
            return Ok(());
        }

        match self.sink.upsert(&row).await {
            Ok(UpsertOutcome::Inserted | UpsertOutcome::Updated) => {
                info!("Migrated {} '{}'", kind.table().key_column(), row.natural_key());
                stats.record_transferred();
            }
            Ok(UpsertOutcome::Unchanged) | Err(Error::Conflict(_)) => stats.record_skipped(),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!("{}: failed to write '{}': {}", kind.name(), row.natural_key(), e);
                stats.record_failure(row.natural_key(), e);
            }
        }
        Ok(())
    }
}

fn create_progress_bar(total: u64, visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }

    let pb = if total > 0 {
        ProgressBar::new(total)
    } else {
        ProgressBar::new_spinner()
    };

    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );

    pb
}
