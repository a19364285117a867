//! Kubernetes cluster access.
//!
//! The replicator talks to clusters only through [`ClusterClient`], so the
//! same code copies objects between real clusters ([`KubeCluster`]) or
//! in-memory fakes in tests.

pub mod certificate;
pub mod kubernetes;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::Resource;

use crate::error::Result;

pub use certificate::{Certificate, CertificateSpec, CertificateStatus};
pub use kubernetes::KubeCluster;

/// Pagination request for list calls.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageRequest {
    /// Maximum items per page (`None` = server default).
    pub limit: Option<u32>,
    /// Continuation token returned by the previous page.
    pub continue_token: Option<String>,
}

/// One page of a list call.
#[derive(Debug, Clone)]
pub struct Page<T> {
    /// Items in this page.
    pub items: Vec<T>,
    /// Token for the next page; `None` when exhausted.
    pub continue_token: Option<String>,
}

/// Result of a create call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    /// Object created; carries the destination-assigned resource version.
    Created {
        /// Resource version assigned by the destination.
        resource_version: Option<String>,
    },
    /// An object with the same name already exists in the destination.
    AlreadyExists,
}

/// Narrow interface over one cluster.
///
/// List methods fail with [`crate::Error::TransientFetch`]; create methods
/// report a name conflict as [`CreateOutcome::AlreadyExists`] (or
/// [`crate::Error::Conflict`], treated the same) and any other failure as
/// [`crate::Error::Write`].
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Label used in logs.
    fn name(&self) -> &str;

    /// Lists one page of secrets matching `label_selector`.
    ///
    /// A continue token the server no longer honours fails with
    /// [`crate::Error::ListExpired`].
    async fn list_secrets(
        &self,
        namespace: &str,
        label_selector: &str,
        page: PageRequest,
    ) -> Result<Page<Secret>>;

    /// Creates a secret in `namespace`.
    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<CreateOutcome>;

    /// Lists all certificates in `namespace`.
    async fn list_certificates(&self, namespace: &str) -> Result<Vec<Certificate>>;

    /// Creates a certificate in `namespace`.
    async fn create_certificate(
        &self,
        namespace: &str,
        certificate: &Certificate,
    ) -> Result<CreateOutcome>;
}

/// Clears the fields the source cluster assigned and rebinds the namespace.
///
/// The destination assigns its own resource version, uid and timestamps;
/// submitting the source's values would be rejected or, worse, accepted as
/// a precondition.
///
/// Owner references are dropped too. They name owners by source uid, and an
/// owner must live in the object's own namespace, so in the destination they
/// point at nothing and the garbage collector would delete the copy.
pub fn prepare_for_destination<K: Resource>(object: &mut K, namespace: &str) {
    let meta = object.meta_mut();
    meta.namespace = Some(namespace.to_string());
    meta.resource_version = None;
    meta.uid = None;
    meta.generation = None;
    meta.creation_timestamp = None;
    meta.deletion_timestamp = None;
    meta.deletion_grace_period_seconds = None;
    meta.owner_references = None;
    meta.self_link = None;
    meta.managed_fields = None;
}
