// Migration tool - pedantic lints relaxed for CLI ergonomics
#![allow(clippy::pedantic)]

//! # kube-cert-manager Migration Tool
//!
//! `kcm-migrate` moves the state of the legacy certificate manager to its new
//! home: the embedded `redb` store is copied into `PostgreSQL` tables, and the
//! TLS secrets and `Certificate` resources it created are copied from one
//! Kubernetes cluster/namespace to another.
//!
//! ## Pipelines
//!
//! | Pipeline | Source | Destination |
//! |----------|--------|-------------|
//! | Schema ([`schema::Migrator`]) | declared migrations | `PostgreSQL` |
//! | ETL ([`pipeline::Pipeline`]) | `cert-details`, `domain-altnames`, `user-info` | `cert_details`, `domain_altnames`, `user_infos` |
//! | Replication ([`replicator::Replicator`]) | source cluster | destination cluster |
//!
//! Every write is idempotent, so any pipeline can be re-run after a partial
//! failure.
//!
//! ## Quick Start
//!
//! ```bash
//! kcm-migrate init --output conf.yaml
//! kcm-migrate --config conf.yaml migrate --dry-run
//! kcm-migrate --config conf.yaml migrate
//! kcm-migrate --config conf.yaml kube-migrate
//! ```
//!
//! ## Configuration Example
//!
//! ```yaml
//! kv:
//!   data_dir: /var/lib/kube-cert-manager
//!
//! postgres:
//!   host: localhost
//!   db_name: kube_cert_manager
//!   user: kcm
//!
//! kube:
//!   src_config_file: /etc/kubernetes/source.conf
//!   src_namespace: prod
//!   dest_namespace: prod2
//! ```

#![warn(missing_docs)]

pub mod cluster;
pub mod commands;
pub mod config;
pub mod error;
pub mod kv;
pub mod pipeline;
pub mod postgres;
pub mod relational;
pub mod replicator;
pub mod retry;
pub mod schema;
pub mod stats;

pub use cluster::{ClusterClient, CreateOutcome, KubeCluster, Page, PageRequest};
pub use config::{MigrationConfig, MigrationOptions};
pub use error::{Error, Result};
pub use kv::{ReadView, RedbSource, SourceRecord};
pub use pipeline::{EtlOptions, EtlReport, PartitionKind, Pipeline};
pub use postgres::PgStore;
pub use relational::{RelationalRow, RowSink, Table, UpsertOutcome};
pub use replicator::{ReplicationOptions, ReplicationReport, Replicator};
pub use retry::{retry_forever, TokenBucket};
pub use schema::{Migration, MigrationStore, Migrator};
pub use stats::TransferStats;
