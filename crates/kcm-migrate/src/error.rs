//! Error types for kcm-migrate.
//!
//! Errors are split into fatal ones, which stop a run because there is no
//! safe way to continue, and per-item ones, which the pipelines collect into
//! their reports so an operator can re-run after fixing the cause.

use thiserror::Error;

/// Result type alias for kcm-migrate operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while migrating.
///
/// Error codes follow the pattern `KCM-XXX`.
#[derive(Error, Debug)]
pub enum Error {
    /// A source or destination handle could not be opened (KCM-001).
    #[error("[KCM-001] Connection error: {0}")]
    Connection(String),

    /// A schema migration step failed (KCM-002).
    #[error("[KCM-002] Schema migration '{id}' failed: {reason}")]
    Schema {
        /// Migration id.
        id: String,
        /// Underlying cause.
        reason: String,
    },

    /// Listing objects from a cluster failed (KCM-003).
    ///
    /// Retried under the rate limiter, never surfaced as a final failure.
    #[error("[KCM-003] Transient fetch error: {0}")]
    TransientFetch(String),

    /// Destination object or row already exists (KCM-004).
    #[error("[KCM-004] Already exists: {0}")]
    Conflict(String),

    /// A source record cannot be mapped to a row (KCM-005).
    #[error("[KCM-005] Cannot transform record: {0}")]
    Transform(String),

    /// A source partition is missing or unreadable (KCM-006).
    #[error("[KCM-006] Partition '{partition}' unavailable: {reason}")]
    PartitionUnavailable {
        /// Partition name.
        partition: String,
        /// Underlying cause.
        reason: String,
    },

    /// Writing a row or object to the destination failed (KCM-007).
    #[error("[KCM-007] Write failed: {0}")]
    Write(String),

    /// Configuration error (KCM-008).
    #[error("[KCM-008] Configuration error: {0}")]
    Config(String),

    /// The run was cancelled by the operator (KCM-009).
    #[error("[KCM-009] Cancelled: {0}")]
    Cancelled(String),

    /// IO error (KCM-010).
    #[error("[KCM-010] IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error (KCM-011).
    #[error("[KCM-011] YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A list continue token is no longer valid (KCM-012).
    ///
    /// The listing has to start again from the first page.
    #[error("[KCM-012] List continuation expired: {0}")]
    ListExpired(String),
}

impl Error {
    /// Returns the error code (e.g., "KCM-001").
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Connection(_) => "KCM-001",
            Self::Schema { .. } => "KCM-002",
            Self::TransientFetch(_) => "KCM-003",
            Self::Conflict(_) => "KCM-004",
            Self::Transform(_) => "KCM-005",
            Self::PartitionUnavailable { .. } => "KCM-006",
            Self::Write(_) => "KCM-007",
            Self::Config(_) => "KCM-008",
            Self::Cancelled(_) => "KCM-009",
            Self::Io(_) => "KCM-010",
            Self::Yaml(_) => "KCM-011",
            Self::ListExpired(_) => "KCM-012",
        }
    }

    /// Returns true if this error must stop the whole run.
    ///
    /// Per-record and per-object errors are not fatal; they end up in the
    /// run report instead.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Connection(_)
                | Self::Schema { .. }
                | Self::Config(_)
                | Self::Cancelled(_)
                | Self::Io(_)
                | Self::Yaml(_)
        )
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
