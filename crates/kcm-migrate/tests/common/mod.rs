//! In-memory fakes shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::Resource;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use kcm_migrate::cluster::{Certificate, CertificateSpec};
use kcm_migrate::{
    ClusterClient, CreateOutcome, Error, Page, PageRequest, RelationalRow, Result, RowSink,
    Table, UpsertOutcome,
};

/// Cluster keeping objects in memory, keyed by `(namespace, name)`.
///
/// Assigns its own resource versions (`<cluster>-<n>`), records the version
/// carried by every create request, and can fail the next N list calls.
pub struct FakeCluster {
    name: String,
    secrets: Mutex<BTreeMap<(String, String), Secret>>,
    certificates: Mutex<BTreeMap<(String, String), Certificate>>,
    next_version: AtomicU64,
    pending_list_failures: AtomicU32,
    pending_expirations: AtomicU32,
    list_calls: AtomicU32,
    submitted_versions: Mutex<Vec<Option<String>>>,
    rejected: Mutex<HashSet<String>>,
}

impl FakeCluster {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            secrets: Mutex::new(BTreeMap::new()),
            certificates: Mutex::new(BTreeMap::new()),
            next_version: AtomicU64::new(1),
            pending_list_failures: AtomicU32::new(0),
            pending_expirations: AtomicU32::new(0),
            list_calls: AtomicU32::new(0),
            submitted_versions: Mutex::new(Vec::new()),
            rejected: Mutex::new(HashSet::new()),
        }
    }

    fn assign_version(&self) -> String {
        let n = self.next_version.fetch_add(1, Ordering::SeqCst);
        format!("{}-{}", self.name, n)
    }

    /// Seeds a secret, assigning a resource version.
    pub fn insert_secret(&self, namespace: &str, mut secret: Secret) {
        secret.metadata.namespace = Some(namespace.to_string());
        secret.metadata.resource_version = Some(self.assign_version());
        let name = secret.metadata.name.clone().unwrap_or_default();
        self.secrets
            .lock()
            .unwrap()
            .insert((namespace.to_string(), name), secret);
    }

    /// Seeds a certificate, assigning a resource version.
    pub fn insert_certificate(&self, namespace: &str, mut certificate: Certificate) {
        certificate.metadata.namespace = Some(namespace.to_string());
        certificate.metadata.resource_version = Some(self.assign_version());
        let name = certificate.metadata.name.clone().unwrap_or_default();
        self.certificates
            .lock()
            .unwrap()
            .insert((namespace.to_string(), name), certificate);
    }

    pub fn secret(&self, namespace: &str, name: &str) -> Option<Secret> {
        self.secrets
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn certificate(&self, namespace: &str, name: &str) -> Option<Certificate> {
        self.certificates
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn secret_count(&self, namespace: &str) -> usize {
        self.secrets
            .lock()
            .unwrap()
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .count()
    }

    /// Makes the next `n` list calls fail with a transient error.
    pub fn fail_next_lists(&self, n: u32) {
        self.pending_list_failures.store(n, Ordering::SeqCst);
    }

    /// Makes the next `n` secret lists that carry a continue token fail
    /// with an expired-token error.
    pub fn expire_next_continuations(&self, n: u32) {
        self.pending_expirations.store(n, Ordering::SeqCst);
    }

    /// Makes creates of `name` fail with a non-conflict error.
    pub fn reject(&self, name: &str) {
        self.rejected.lock().unwrap().insert(name.to_string());
    }

    pub fn list_calls(&self) -> u32 {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Resource version carried by every create request received.
    pub fn submitted_versions(&self) -> Vec<Option<String>> {
        self.submitted_versions.lock().unwrap().clone()
    }

    fn begin_list(&self) -> Result<()> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.pending_list_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.pending_list_failures
                .store(remaining - 1, Ordering::SeqCst);
            return Err(Error::TransientFetch("HTTP 503 Service Unavailable".to_string()));
        }
        Ok(())
    }

    fn create<K: Resource + Clone>(
        &self,
        store: &Mutex<BTreeMap<(String, String), K>>,
        namespace: &str,
        object: &K,
    ) -> Result<CreateOutcome> {
        let meta = object.meta();
        self.submitted_versions
            .lock()
            .unwrap()
            .push(meta.resource_version.clone());

        let name = meta.name.clone().unwrap_or_default();
        if self.rejected.lock().unwrap().contains(&name) {
            return Err(Error::Write(format!("{} is forbidden", name)));
        }

        let mut store = store.lock().unwrap();
        let key = (namespace.to_string(), name);
        if store.contains_key(&key) {
            return Ok(CreateOutcome::AlreadyExists);
        }

        let version = self.assign_version();
        let mut stored = object.clone();
        stored.meta_mut().namespace = Some(namespace.to_string());
        stored.meta_mut().resource_version = Some(version.clone());
        store.insert(key, stored);
        Ok(CreateOutcome::Created {
            resource_version: Some(version),
        })
    }
}

fn matches_selector(secret: &Secret, selector: &str) -> bool {
    let Some((key, value)) = selector.split_once('=') else {
        return true;
    };
    secret
        .metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(key))
        .is_some_and(|v| v == value)
}

#[async_trait]
impl ClusterClient for FakeCluster {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_secrets(
        &self,
        namespace: &str,
        label_selector: &str,
        page: PageRequest,
    ) -> Result<Page<Secret>> {
        self.begin_list()?;
        if page.continue_token.is_some() {
            let remaining = self.pending_expirations.load(Ordering::SeqCst);
            if remaining > 0 {
                self.pending_expirations
                    .store(remaining - 1, Ordering::SeqCst);
                return Err(Error::ListExpired(
                    "HTTP 410 Gone: continue token too old".to_string(),
                ));
            }
        }

        let matching: Vec<Secret> = self
            .secrets
            .lock()
            .unwrap()
            .iter()
            .filter(|((ns, _), s)| ns == namespace && matches_selector(s, label_selector))
            .map(|(_, s)| s.clone())
            .collect();

        let offset: usize = page
            .continue_token
            .as_deref()
            .map_or(0, |t| t.parse().unwrap());
        let limit = page.limit.map_or(matching.len(), |l| l as usize);
        let end = (offset + limit).min(matching.len());
        let continue_token = (end < matching.len()).then(|| end.to_string());

        Ok(Page {
            items: matching[offset..end].to_vec(),
            continue_token,
        })
    }

    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<CreateOutcome> {
        self.create(&self.secrets, namespace, secret)
    }

    async fn list_certificates(&self, namespace: &str) -> Result<Vec<Certificate>> {
        self.begin_list()?;
        Ok(self
            .certificates
            .lock()
            .unwrap()
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, c)| c.clone())
            .collect())
    }

    async fn create_certificate(
        &self,
        namespace: &str,
        certificate: &Certificate,
    ) -> Result<CreateOutcome> {
        self.create(&self.certificates, namespace, certificate)
    }
}

/// A `kubernetes.io/tls` secret labeled `creator=<creator>`.
pub fn tls_secret(name: &str, creator: &str) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(BTreeMap::from([(
                "creator".to_string(),
                creator.to_string(),
            )])),
            ..Default::default()
        },
        type_: Some("kubernetes.io/tls".to_string()),
        data: Some(BTreeMap::from([
            ("tls.crt".to_string(), ByteString(format!("{name}-crt").into_bytes())),
            ("tls.key".to_string(), ByteString(format!("{name}-key").into_bytes())),
        ])),
        ..Default::default()
    }
}

pub fn certificate(name: &str, domain: &str) -> Certificate {
    Certificate::new(
        name,
        CertificateSpec {
            domain: domain.to_string(),
            provider: "route53".to_string(),
            email: "ops@example.com".to_string(),
            secret_name: format!("{name}-tls"),
            alt_names: vec![format!("www.{domain}")],
        },
    )
}

/// Row sink keeping rows in memory with upsert semantics.
#[derive(Default)]
pub struct MemorySink {
    rows: Mutex<HashMap<(Table, String), String>>,
    failing_keys: Mutex<HashSet<String>>,
    disconnected: AtomicBool,
    attempts: AtomicUsize,
}

impl MemorySink {
    /// Every later upsert fails as if the server went away.
    pub fn disconnect(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn fail_on(&self, key: &str) {
        self.failing_keys.lock().unwrap().insert(key.to_string());
    }

    pub fn row_count(&self, table: Table) -> usize {
        self.rows
            .lock()
            .unwrap()
            .keys()
            .filter(|(t, _)| *t == table)
            .count()
    }

    pub fn value(&self, table: Table, key: &str) -> Option<String> {
        self.rows
            .lock()
            .unwrap()
            .get(&(table, key.to_string()))
            .cloned()
    }
}

#[async_trait]
impl RowSink for MemorySink {
    async fn upsert(&self, row: &RelationalRow) -> Result<UpsertOutcome> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.disconnected.load(Ordering::SeqCst) {
            return Err(Error::Connection(
                "pool timed out while waiting for an open connection".to_string(),
            ));
        }
        if self.failing_keys.lock().unwrap().contains(row.natural_key()) {
            return Err(Error::Write(format!(
                "value too long for {}",
                row.natural_key()
            )));
        }
        let key = (row.table(), row.natural_key().to_string());
        let mut rows = self.rows.lock().unwrap();
        Ok(match rows.insert(key, row.value().to_string()) {
            None => UpsertOutcome::Inserted,
            Some(previous) if previous == row.value() => UpsertOutcome::Unchanged,
            Some(_) => UpsertOutcome::Updated,
        })
    }
}
