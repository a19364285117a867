//! Cluster resource replicator.
//!
//! Copies labeled secrets and `Certificate` custom resources from a source
//! cluster namespace into a destination namespace. Every list request goes
//! through [`retry_forever`] with one shared [`TokenBucket`]; creates that hit
//! an existing object are counted as skipped, so a re-run after a partial
//! failure converges instead of failing again.

use k8s_openapi::api::core::v1::Secret;
use std::collections::HashSet;
use std::fmt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cluster::{prepare_for_destination, ClusterClient, CreateOutcome, Page, PageRequest};
use crate::config::{
    KubeConfig, MigrationOptions, NamespaceMapping, RateLimitConfig, DEFAULT_LABEL_SELECTOR,
};
use crate::error::{Error, Result};
use crate::retry::{retry_forever, TokenBucket};
use crate::stats::TransferStats;

/// Replication options.
#[derive(Debug, Clone)]
pub struct ReplicationOptions {
    /// Selector identifying the secrets to copy.
    pub label_selector: String,
    /// Secrets requested per page.
    pub page_size: u32,
    /// Limiter for list requests.
    pub rate_limit: RateLimitConfig,
    /// List and prepare objects without creating them.
    pub dry_run: bool,
}

impl Default for ReplicationOptions {
    fn default() -> Self {
        Self {
            label_selector: DEFAULT_LABEL_SELECTOR.to_string(),
            page_size: 100,
            rate_limit: RateLimitConfig::default(),
            dry_run: false,
        }
    }
}

impl ReplicationOptions {
    /// Builds options from the `kube` section and the global options.
    #[must_use]
    pub fn from_config(kube: &KubeConfig, options: &MigrationOptions) -> Self {
        Self {
            label_selector: kube.label_selector.clone(),
            page_size: kube.page_size.max(1),
            rate_limit: options.rate_limit,
            dry_run: options.dry_run,
        }
    }
}

/// Counters for one replication run.
#[derive(Debug, Clone, Default)]
pub struct ReplicationReport {
    /// Secret counters.
    pub secrets: TransferStats,
    /// Certificate counters.
    pub certificates: TransferStats,
}

impl ReplicationReport {
    /// Adds another report into this one.
    pub fn merge(&mut self, other: ReplicationReport) {
        self.secrets.merge(other.secrets);
        self.certificates.merge(other.certificates);
    }

    /// True if no object failed.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.secrets.is_clean() && self.certificates.is_clean()
    }
}

impl fmt::Display for ReplicationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "secrets: {}; certificates: {}",
            self.secrets, self.certificates
        )
    }
}

/// Copies objects from `source` to `destination`.
pub struct Replicator<'a> {
    source: &'a dyn ClusterClient,
    destination: &'a dyn ClusterClient,
    options: ReplicationOptions,
    limiter: TokenBucket,
}

impl<'a> Replicator<'a> {
    /// Creates a replicator with a full token bucket.
    #[must_use]
    pub fn new(
        source: &'a dyn ClusterClient,
        destination: &'a dyn ClusterClient,
        options: ReplicationOptions,
    ) -> Self {
        let limiter = TokenBucket::from_config(&options.rate_limit);
        Self {
            source,
            destination,
            options,
            limiter,
        }
    }

    /// Replicates every namespace pair in order.
    ///
    /// # Errors
    ///
    /// Only [`Error::Cancelled`]; per-object failures are in the report.
    pub async fn run(
        &mut self,
        mappings: &[NamespaceMapping],
        cancel: &CancellationToken,
    ) -> Result<ReplicationReport> {
        let mut report = ReplicationReport::default();
        for mapping in mappings {
            report.merge(self.replicate(mapping, cancel).await?);
        }
        info!("Replication complete: {}", report);
        Ok(report)
    }

    /// Replicates secrets, then certificates, for one namespace pair.
    ///
    /// # Errors
    ///
    /// Only [`Error::Cancelled`].
    pub async fn replicate(
        &mut self,
        mapping: &NamespaceMapping,
        cancel: &CancellationToken,
    ) -> Result<ReplicationReport> {
        info!(
            "Replicating {}/{} -> {}/{}",
            self.source.name(),
            mapping.source,
            self.destination.name(),
            mapping.destination()
        );
        if self.options.dry_run {
            info!("Dry run mode - not creating objects");
        }

        let secrets = self
            .replicate_secrets(&mapping.source, mapping.destination(), cancel)
            .await?;
        let certificates = self
            .replicate_certificates(&mapping.source, mapping.destination(), cancel)
            .await?;

        Ok(ReplicationReport {
            secrets,
            certificates,
        })
    }

    /// Copies every secret matching the label selector, page by page.
    ///
    /// If the server expires the continue token mid-listing, the listing
    /// starts again from the first page; secrets already handled in this run
    /// are not submitted twice.
    ///
    /// # Errors
    ///
    /// Only [`Error::Cancelled`].
    pub async fn replicate_secrets(
        &mut self,
        source_namespace: &str,
        destination_namespace: &str,
        cancel: &CancellationToken,
    ) -> Result<TransferStats> {
        let start = std::time::Instant::now();
        let mut stats = TransferStats::default();
        let source = self.source;
        let label_selector = self.options.label_selector.clone();
        let selector = label_selector.as_str();
        let operation = format!("list secrets in {}", source_namespace);
        let mut continue_token: Option<String> = None;
        let mut handled: HashSet<String> = HashSet::new();
        let mut pages = 0u32;

        loop {
            let request = PageRequest {
                limit: Some(self.options.page_size),
                continue_token: continue_token.take(),
            };
            let listing = retry_forever(&mut self.limiter, cancel, &operation, || {
                let request = request.clone();
                async move {
                    match source.list_secrets(source_namespace, selector, request).await {
                        Ok(page) => Ok(Listing::Page(page)),
                        Err(Error::ListExpired(reason)) => Ok(Listing::Expired(reason)),
                        Err(e) => Err(e),
                    }
                }
            })
            .await?;
            let page = match listing {
                Listing::Page(page) => page,
                Listing::Expired(reason) => {
                    warn!(
                        "Secret listing in {} expired ({}), restarting from the first page",
                        source_namespace, reason
                    );
                    continue;
                }
            };
            pages += 1;

            for mut secret in page.items {
                if cancel.is_cancelled() {
                    return Err(Error::Cancelled(operation));
                }
                let item = object_ref(destination_namespace, secret.metadata.name.as_deref());
                if !handled.insert(item.clone()) {
                    continue;
                }
                prepare_for_destination(&mut secret, destination_namespace);

                if self.options.dry_run {
                    info!("Would create secret {}", item);
                    stats.record_transferred();
                    continue;
                }
                let outcome = self
                    .destination
                    .create_secret(destination_namespace, &secret)
                    .await;
                record_outcome("secret", &item, outcome, &mut stats);
            }

            match page.continue_token {
                Some(token) => continue_token = Some(token),
                None => break,
            }
        }

        stats.duration_secs = start.elapsed().as_secs_f64();
        info!(
            "Secrets {} -> {} ({} pages): {}",
            source_namespace, destination_namespace, pages, stats
        );
        Ok(stats)
    }

    /// Copies every certificate in the namespace.
    ///
    /// # Errors
    ///
    /// Only [`Error::Cancelled`].
    pub async fn replicate_certificates(
        &mut self,
        source_namespace: &str,
        destination_namespace: &str,
        cancel: &CancellationToken,
    ) -> Result<TransferStats> {
        let start = std::time::Instant::now();
        let mut stats = TransferStats::default();
        let source = self.source;
        let operation = format!("list certificates in {}", source_namespace);

        let certificates = retry_forever(&mut self.limiter, cancel, &operation, || {
            source.list_certificates(source_namespace)
        })
        .await?;

        for mut certificate in certificates {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled(operation));
            }
            let item = object_ref(
                destination_namespace,
                certificate.metadata.name.as_deref(),
            );
            prepare_for_destination(&mut certificate, destination_namespace);

            if self.options.dry_run {
                info!("Would create certificate {} ({})", item, certificate.spec.domain);
                stats.record_transferred();
                continue;
            }
            let outcome = self
                .destination
                .create_certificate(destination_namespace, &certificate)
                .await;
            record_outcome("certificate", &item, outcome, &mut stats);
        }

        stats.duration_secs = start.elapsed().as_secs_f64();
        info!(
            "Certificates {} -> {}: {}",
            source_namespace, destination_namespace, stats
        );
        Ok(stats)
    }
}

/// Outcome of one secret page request.
enum Listing {
    Page(Page<Secret>),
    Expired(String),
}

fn object_ref(namespace: &str, name: Option<&str>) -> String {
    format!("{}/{}", namespace, name.unwrap_or("<unnamed>"))
}

fn record_outcome(
    kind: &str,
    item: &str,
    outcome: Result<CreateOutcome>,
    stats: &mut TransferStats,
) {
    match outcome {
        Ok(CreateOutcome::Created { resource_version }) => {
            info!(
                "Created {} {} (resourceVersion {})",
                kind,
                item,
                resource_version.as_deref().unwrap_or("?")
            );
            stats.record_transferred();
        }
        Ok(CreateOutcome::AlreadyExists) | Err(Error::Conflict(_)) => {
            info!("{} {} already exists, skipping", kind, item);
            stats.record_skipped();
        }
        Err(e) => {
            warn!("Failed to create {} {}: {}", kind, item, e);
            stats.record_failure(item, e);
        }
    }
}
