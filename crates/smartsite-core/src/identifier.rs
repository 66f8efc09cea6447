//! Aggregate identifiers and message keys.
//!
//! Every record on the log is keyed by a [`MessageKey`]: the identifier of the
//! aggregate the record belongs to plus the root context identifier that
//! decides the partition. All records of one aggregate share one root context
//! and therefore one partition, which is what gives per-aggregate ordering.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// Version carried by a snapshot that has not been persisted yet. The first
/// event of an aggregate therefore carries version `0`.
pub const NEW_AGGREGATE_VERSION: i64 = -1;

/// The closed set of aggregate types known to the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AggregateType {
    /// A company.
    Company,
    /// An employee of a company.
    Employee,
    /// A user account.
    User,
    /// Start/finish markers of a business transaction.
    BusinessTransaction,
}

impl AggregateType {
    /// Wire name of the aggregate type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Company => "COMPANY",
            Self::Employee => "EMPLOYEE",
            Self::User => "USER",
            Self::BusinessTransaction => "BUSINESS_TRANSACTION",
        }
    }
}

impl fmt::Display for AggregateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AggregateType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "COMPANY" => Ok(Self::Company),
            "EMPLOYEE" => Ok(Self::Employee),
            "USER" => Ok(Self::User),
            "BUSINESS_TRANSACTION" => Ok(Self::BusinessTransaction),
            other => Err(DomainError::Infrastructure(format!(
                "unknown aggregate type: {other}"
            ))),
        }
    }
}

/// Identifies one version of one aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AggregateIdentifier {
    /// Type of the aggregate.
    pub aggregate_type: AggregateType,
    /// Aggregate identifier.
    pub identifier: Uuid,
    /// Version of the aggregate this identifier refers to.
    pub version: i64,
}

impl AggregateIdentifier {
    /// Creates an identifier.
    #[must_use]
    pub const fn new(aggregate_type: AggregateType, identifier: Uuid, version: i64) -> Self {
        Self {
            aggregate_type,
            identifier,
            version,
        }
    }

    /// Identifier of an aggregate that has not been persisted yet.
    #[must_use]
    pub const fn unsaved(aggregate_type: AggregateType, identifier: Uuid) -> Self {
        Self::new(aggregate_type, identifier, NEW_AGGREGATE_VERSION)
    }

    /// Returns the same identifier at the given version.
    #[must_use]
    pub const fn with_version(self, version: i64) -> Self {
        Self { version, ..self }
    }

    /// Returns the same identifier at the next version.
    #[must_use]
    pub const fn next_version(self) -> Self {
        self.with_version(self.version + 1)
    }
}

impl fmt::Display for AggregateIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.aggregate_type, self.identifier, self.version)
    }
}

/// Key of a record on the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageKey {
    /// Root context the aggregate belongs to; decides the partition.
    pub root_context_identifier: Uuid,
    /// The aggregate the record belongs to.
    pub aggregate_identifier: AggregateIdentifier,
}

impl MessageKey {
    /// Creates a key.
    #[must_use]
    pub const fn new(root_context_identifier: Uuid, aggregate_identifier: AggregateIdentifier) -> Self {
        Self {
            root_context_identifier,
            aggregate_identifier,
        }
    }

    /// Partition of this key for a log with `partitions` partitions.
    #[must_use]
    pub fn partition(&self, partitions: u32) -> u32 {
        Self::partition_of(self.root_context_identifier, partitions)
    }

    /// Partition of a root context for a log with `partitions` partitions.
    #[must_use]
    pub fn partition_of(root_context_identifier: Uuid, partitions: u32) -> u32 {
        let partitions = u128::from(partitions.max(1));
        // The remainder is always smaller than `partitions`, which fits in u32.
        u32::try_from(root_context_identifier.as_u128() % partitions).unwrap_or(0)
    }
}
