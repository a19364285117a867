//! Relational destination rows and the write seam.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Destination tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    /// `cert_details(domain UNIQUE, value)`.
    CertDetails,
    /// `domain_altnames(domain UNIQUE, value)`.
    DomainAltnames,
    /// `user_infos(email UNIQUE, value)`.
    UserInfos,
}

impl Table {
    /// Every destination table, in creation order.
    pub const ALL: [Table; 3] = [Table::CertDetails, Table::DomainAltnames, Table::UserInfos];

    /// SQL table name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::CertDetails => "cert_details",
            Self::DomainAltnames => "domain_altnames",
            Self::UserInfos => "user_infos",
        }
    }

    /// Column holding the natural unique key.
    #[must_use]
    pub const fn key_column(self) -> &'static str {
        match self {
            Self::CertDetails | Self::DomainAltnames => "domain",
            Self::UserInfos => "email",
        }
    }
}

/// A row to write. Identity and soft-delete columns are managed by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationalRow {
    /// Certificate details keyed by domain.
    CertDetail {
        /// Domain name.
        domain: String,
        /// Stored blob.
        value: String,
    },
    /// Alternative names keyed by domain.
    DomainAltname {
        /// Domain name.
        domain: String,
        /// Stored blob.
        value: String,
    },
    /// ACME account keyed by email.
    UserInfo {
        /// Account email.
        email: String,
        /// Stored blob.
        value: String,
    },
}

impl RelationalRow {
    /// Table the row belongs to.
    #[must_use]
    pub const fn table(&self) -> Table {
        match self {
            Self::CertDetail { .. } => Table::CertDetails,
            Self::DomainAltname { .. } => Table::DomainAltnames,
            Self::UserInfo { .. } => Table::UserInfos,
        }
    }

    /// Natural unique key (`domain` or `email`).
    #[must_use]
    pub fn natural_key(&self) -> &str {
        match self {
            Self::CertDetail { domain, .. } | Self::DomainAltname { domain, .. } => domain,
            Self::UserInfo { email, .. } => email,
        }
    }

    /// Value column.
    #[must_use]
    pub fn value(&self) -> &str {
        match self {
            Self::CertDetail { value, .. }
            | Self::DomainAltname { value, .. }
            | Self::UserInfo { value, .. } => value,
        }
    }
}

/// What an upsert did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// No row had the key; one was inserted.
    Inserted,
    /// A row had the key with a different value (or was soft-deleted) and was updated.
    Updated,
    /// An identical live row already existed; nothing was written.
    Unchanged,
}

/// Destination that accepts rows keyed by their natural key.
///
/// Implementations must never fail because the key already exists; a sink
/// that cannot upsert reports [`crate::Error::Conflict`], counted as skipped.
#[async_trait]
pub trait RowSink: Send + Sync {
    /// Inserts the row, or updates/skips the existing row with the same key.
    async fn upsert(&self, row: &RelationalRow) -> Result<UpsertOutcome>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_accessors() {
        let row = RelationalRow::UserInfo {
            email: "ops@example.com".to_string(),
            value: "{\"key\":\"...\"}".to_string(),
        };

        assert_eq!(row.table(), Table::UserInfos);
        assert_eq!(row.table().key_column(), "email");
        assert_eq!(row.natural_key(), "ops@example.com");
        assert_eq!(row.value(), "{\"key\":\"...\"}");
    }

    #[test]
    fn test_table_names() {
        let names: Vec<&str> = Table::ALL.iter().map(|t| t.name()).collect();
        assert_eq!(names, vec!["cert_details", "domain_altnames", "user_infos"]);
        assert_eq!(Table::DomainAltnames.key_column(), "domain");
    }
}
