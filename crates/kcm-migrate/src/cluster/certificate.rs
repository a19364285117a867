//! `Certificate` custom resource published by kube-cert-manager.

use kube::CustomResource;
use serde::{Deserialize, Serialize};

/// API group of the certificate resource.
pub const CERTIFICATE_GROUP: &str = "stable.liquidweb.com";

/// Desired state of a certificate.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, PartialEq)]
#[kube(
    group = "stable.liquidweb.com",
    version = "v1",
    kind = "Certificate",
    plural = "certificates",
    namespaced,
    status = "CertificateStatus",
    schema = "disabled",
    doc = "A certificate managed by kube-cert-manager."
)]
#[serde(rename_all = "camelCase")]
pub struct CertificateSpec {
    /// Primary domain.
    pub domain: String,
    /// ACME DNS provider.
    #[serde(default)]
    pub provider: String,
    /// Account email.
    #[serde(default)]
    pub email: String,
    /// Secret holding the issued key pair.
    #[serde(default)]
    pub secret_name: String,
    /// Subject alternative names.
    #[serde(default)]
    pub alt_names: Vec<String>,
}

/// Observed state of a certificate; every field is optional on the wire.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct CertificateStatus {
    /// "true" once issued.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provisioned: Option<String>,
    /// Issue time.
    #[serde(default, rename = "created", skip_serializing_if = "Option::is_none")]
    pub created_date: Option<String>,
    /// Expiry time.
    #[serde(default, rename = "expires", skip_serializing_if = "Option::is_none")]
    pub expires_date: Option<String>,
    /// Last issuance error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_msg: Option<String>,
    /// Time of the last issuance error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_date: Option<String>,
}
