//! Configuration types for kcm-migrate.

use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgConnectOptions, PgSslMode};
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Label carried by every secret the legacy certificate manager created.
pub const DEFAULT_LABEL_SELECTOR: &str = "creator=kube-cert-manager";

/// Main migration configuration.
///
/// Sections are optional because each command only needs some of them;
/// use the `require_*` accessors to fetch a section a command depends on.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Optional log file (stderr when unset).
    #[serde(default)]
    pub log_file: Option<PathBuf>,
    /// Embedded source store.
    #[serde(default)]
    pub kv: Option<KvConfig>,
    /// Relational destination.
    #[serde(default, alias = "psql")]
    pub postgres: Option<PostgresConfig>,
    /// Kubernetes source and destination clusters.
    #[serde(default)]
    pub kube: Option<KubeConfig>,
    /// Migration options.
    #[serde(default)]
    pub options: MigrationOptions,
}

/// Embedded key-value store location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KvConfig {
    /// Directory holding the store file.
    pub data_dir: PathBuf,
    /// Store file name.
    #[serde(default = "default_data_file")]
    pub data_file: String,
}

impl KvConfig {
    /// Full path of the store file.
    #[must_use]
    pub fn path(&self) -> PathBuf {
        self.data_dir.join(&self.data_file)
    }
}

/// `PostgreSQL` connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    /// Full connection URL; takes precedence over the discrete fields.
    #[serde(default)]
    pub url: Option<String>,
    /// Server host.
    #[serde(default = "default_host")]
    pub host: String,
    /// Server port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Database name.
    #[serde(default, alias = "dbname")]
    pub db_name: String,
    /// User name.
    #[serde(default)]
    pub user: String,
    /// Password.
    #[serde(default)]
    pub password: Option<String>,
    /// `sslmode` value (disable, prefer, require, ...).
    #[serde(default = "default_ssl_mode")]
    pub ssl_mode: String,
    /// Pool size.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl PostgresConfig {
    /// Builds the driver connect options.
    ///
    /// The discrete fields are passed to the driver as-is, so user names and
    /// passwords never need URL escaping.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `url` or `ssl_mode` cannot be parsed.
    pub fn connect_options(&self) -> Result<PgConnectOptions> {
        if let Some(url) = &self.url {
            return PgConnectOptions::from_str(url)
                .map_err(|e| Error::Config(format!("invalid postgres url: {}", e)));
        }
        let ssl_mode = PgSslMode::from_str(&self.ssl_mode)
            .map_err(|e| Error::Config(format!("invalid ssl_mode '{}': {}", self.ssl_mode, e)))?;
        let mut options = PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .database(&self.db_name)
            .ssl_mode(ssl_mode);
        if let Some(password) = &self.password {
            options = options.password(password);
        }
        Ok(options)
    }
}

/// Kubernetes replication settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KubeConfig {
    /// Kubeconfig of the source cluster.
    pub src_config_file: PathBuf,
    /// Kubeconfig of the destination cluster (defaults to the source).
    #[serde(default)]
    pub dest_config_file: Option<PathBuf>,
    /// Source namespace.
    #[serde(default)]
    pub src_namespace: Option<String>,
    /// Destination namespace (defaults to the source namespace).
    #[serde(default)]
    pub dest_namespace: Option<String>,
    /// Additional namespace pairs.
    #[serde(default)]
    pub namespaces: Vec<NamespaceMapping>,
    /// Label selector used to discover secrets.
    #[serde(default = "default_label_selector")]
    pub label_selector: String,
    /// Page size for secret listing.
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

impl KubeConfig {
    /// All namespace pairs to replicate, `src_namespace` first.
    #[must_use]
    pub fn namespace_mappings(&self) -> Vec<NamespaceMapping> {
        let mut mappings = Vec::with_capacity(self.namespaces.len() + 1);
        if let Some(source) = &self.src_namespace {
            mappings.push(NamespaceMapping {
                source: source.clone(),
                destination: self.dest_namespace.clone(),
            });
        }
        mappings.extend(self.namespaces.iter().cloned());
        mappings
    }
}

/// A source namespace and where its objects land.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceMapping {
    /// Namespace in the source cluster.
    pub source: String,
    /// Namespace in the destination cluster; `None` keeps the source name.
    #[serde(default)]
    pub destination: Option<String>,
}

impl NamespaceMapping {
    /// Destination namespace after applying the default.
    #[must_use]
    pub fn destination(&self) -> &str {
        self.destination.as_deref().unwrap_or(&self.source)
    }
}

/// Token-bucket settings for cluster list requests.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Sustained requests per second.
    #[serde(default = "default_rate")]
    pub rate: f64,
    /// Burst capacity.
    #[serde(default = "default_burst")]
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            rate: default_rate(),
            burst: default_burst(),
        }
    }
}

/// Migration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationOptions {
    /// Records read from the embedded store per batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Dry run mode (don't write to destination).
    #[serde(default)]
    pub dry_run: bool,
    /// Draw a progress bar during the ETL run.
    #[serde(default = "default_true")]
    pub show_progress: bool,
    /// Rate limit for cluster list retries.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            dry_run: false,
            show_progress: true,
            rate_limit: RateLimitConfig::default(),
        }
    }
}

fn default_data_file() -> String {
    "data.db".to_string()
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    5432
}

fn default_ssl_mode() -> String {
    "disable".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_label_selector() -> String {
    DEFAULT_LABEL_SELECTOR.to_string()
}

fn default_page_size() -> u32 {
    100
}

fn default_rate() -> f64 {
    0.2
}

fn default_burst() -> u32 {
    3
}

fn default_batch_size() -> usize {
    500
}

fn default_true() -> bool {
    true
}

impl MigrationConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.options.batch_size == 0 {
            return Err(Error::Config(
                "batch_size must be greater than 0".to_string(),
            ));
        }
        let rate_limit = &self.options.rate_limit;
        if !(rate_limit.rate.is_finite() && rate_limit.rate > 0.0) {
            return Err(Error::Config(
                "rate_limit.rate must be a positive number".to_string(),
            ));
        }
        if rate_limit.burst == 0 {
            return Err(Error::Config(
                "rate_limit.burst must be greater than 0".to_string(),
            ));
        }
        if let Some(kube) = &self.kube {
            if kube.page_size == 0 {
                return Err(Error::Config(
                    "kube.page_size must be greater than 0".to_string(),
                ));
            }
            let mappings = kube.namespace_mappings();
            if mappings.is_empty() {
                return Err(Error::Config(
                    "kube section needs src_namespace or namespaces".to_string(),
                ));
            }
            if mappings
                .iter()
                .any(|m| m.source.is_empty() || m.destination().is_empty())
            {
                return Err(Error::Config("namespace names cannot be empty".to_string()));
            }
        }
        Ok(())
    }

    /// Embedded store section.
    ///
    /// # Errors
    ///
    /// Returns an error if the section is missing.
    pub fn require_kv(&self) -> Result<&KvConfig> {
        self.kv
            .as_ref()
            .ok_or_else(|| Error::Config("missing 'kv' section".to_string()))
    }

    /// `PostgreSQL` section.
    ///
    /// # Errors
    ///
    /// Returns an error if the section is missing.
    pub fn require_postgres(&self) -> Result<&PostgresConfig> {
        self.postgres
            .as_ref()
            .ok_or_else(|| Error::Config("missing 'postgres' section".to_string()))
    }

    /// Kubernetes section.
    ///
    /// # Errors
    ///
    /// Returns an error if the section is missing.
    pub fn require_kube(&self) -> Result<&KubeConfig> {
        self.kube
            .as_ref()
            .ok_or_else(|| Error::Config("missing 'kube' section".to_string()))
    }
}
