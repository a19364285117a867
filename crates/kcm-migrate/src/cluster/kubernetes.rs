//! [`ClusterClient`] backed by a live Kubernetes API server.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{ListParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client, Config, Resource};
use std::path::Path;
use tracing::debug;

use super::{Certificate, ClusterClient, CreateOutcome, Page, PageRequest};
use crate::error::{Error, Result};

/// HTTP status the API server uses for name conflicts.
const CONFLICT: u16 = 409;

/// HTTP status for an expired list continue token.
const GONE: u16 = 410;

/// Client bound to one cluster.
#[derive(Clone)]
pub struct KubeCluster {
    name: String,
    client: Client,
}

impl KubeCluster {
    /// Builds a client from an explicit kubeconfig file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if the file cannot be read or does not
    /// describe a usable cluster.
    pub async fn from_kubeconfig(name: &str, path: &Path) -> Result<Self> {
        let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
            Error::Connection(format!("cannot read kubeconfig {}: {}", path.display(), e))
        })?;
        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| {
                Error::Connection(format!("invalid kubeconfig {}: {}", path.display(), e))
            })?;
        Self::from_config(name, config)
    }

    /// Builds a client from an already loaded configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if the client cannot be created.
    pub fn from_config(name: &str, config: Config) -> Result<Self> {
        let client = Client::try_from(config).map_err(|e| {
            Error::Connection(format!("failed to create client for {}: {}", name, e))
        })?;
        Ok(Self {
            name: name.to_string(),
            client,
        })
    }

    fn secrets(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn certificates(&self, namespace: &str) -> Api<Certificate> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn create_outcome<K: Resource>(
        &self,
        kind: &str,
        name: &str,
        result: std::result::Result<K, kube::Error>,
    ) -> Result<CreateOutcome> {
        match result {
            Ok(created) => Ok(CreateOutcome::Created {
                resource_version: created.meta().resource_version.clone(),
            }),
            Err(kube::Error::Api(response)) if response.code == CONFLICT => {
                debug!("{}: {} {} already exists", self.name, kind, name);
                Ok(CreateOutcome::AlreadyExists)
            }
            Err(e) => Err(Error::Write(format!(
                "{}: failed to create {} {}: {}",
                self.name, kind, name, e
            ))),
        }
    }
}

#[async_trait]
impl ClusterClient for KubeCluster {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_secrets(
        &self,
        namespace: &str,
        label_selector: &str,
        page: PageRequest,
    ) -> Result<Page<Secret>> {
        let mut params = ListParams::default().labels(label_selector);
        if let Some(limit) = page.limit {
            params = params.limit(limit);
        }
        if let Some(token) = &page.continue_token {
            params = params.continue_token(token);
        }

        let list = self
            .secrets(namespace)
            .list(&params)
            .await
            .map_err(|e| match e {
                kube::Error::Api(response)
                    if response.code == GONE && page.continue_token.is_some() =>
                {
                    Error::ListExpired(format!(
                        "{}: secrets in {}: {}",
                        self.name, namespace, response.message
                    ))
                }
                e => Error::TransientFetch(format!(
                    "{}: failed to list secrets in {}: {}",
                    self.name, namespace, e
                )),
            })?;

        Ok(Page {
            items: list.items,
            continue_token: list.metadata.continue_.filter(|t| !t.is_empty()),
        })
    }

    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<CreateOutcome> {
        let name = secret.metadata.name.clone().unwrap_or_default();
        let result = self
            .secrets(namespace)
            .create(&PostParams::default(), secret)
            .await;
        self.create_outcome("secret", &name, result)
    }

    async fn list_certificates(&self, namespace: &str) -> Result<Vec<Certificate>> {
        let list = self
            .certificates(namespace)
            .list(&ListParams::default())
            .await
            .map_err(|e| {
                Error::TransientFetch(format!(
                    "{}: failed to list certificates in {}: {}",
                    self.name, namespace, e
                ))
            })?;
        Ok(list.items)
    }

    async fn create_certificate(
        &self,
        namespace: &str,
        certificate: &Certificate,
    ) -> Result<CreateOutcome> {
        let name = certificate.metadata.name.clone().unwrap_or_default();
        let result = self
            .certificates(namespace)
            .create(&PostParams::default(), certificate)
            .await;
        self.create_outcome("certificate", &name, result)
    }
}

#[cfg(test)]
#[path = "kubernetes_tests.rs"]
mod tests;
