//! Persistence ports.
//!
//! Projection rows, tombstone markers and the event log are written through a
//! [`PersistenceTransaction`]; everything written inside one transaction
//! becomes visible atomically on commit or not at all.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;
use crate::event::{ConsumerRecord, EventRecord};
use crate::identifier::MessageKey;

/// The durable, query-optimized document of one aggregate or projection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionRow {
    /// Identifier of the row.
    pub identifier: Uuid,
    /// Root context of the aggregate the row belongs to.
    pub root_context_identifier: Uuid,
    /// Version of the row; guards optimistic updates.
    pub version: i64,
    /// When the row content was last changed.
    pub last_modified: DateTime<Utc>,
    /// The row content.
    pub body: serde_json::Value,
}

/// Marker left behind after an aggregate was deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tombstone {
    /// Identifier of the deleted aggregate.
    pub identifier: Uuid,
    /// Version carried by the deleting event.
    pub version: i64,
    /// When the aggregate was deleted.
    pub deleted_at: DateTime<Utc>,
}

/// A record appended to the event log, not yet assigned an offset.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingRecord {
    /// Business transaction the record belongs to, if any.
    pub transaction_identifier: Option<Uuid>,
    /// Root context deciding the partition instead of the record's own.
    ///
    /// Set to the business transaction's root, so a whole batch lands on one
    /// partition together with its markers.
    pub partition_key: Option<Uuid>,
    /// The record.
    pub record: EventRecord,
}

impl PendingRecord {
    /// Partition of this record for a log with `partitions` partitions.
    #[must_use]
    pub fn partition(&self, partitions: u32) -> u32 {
        match self.partition_key {
            Some(root) => MessageKey::partition_of(root, partitions),
            None => self.record.key.partition(partitions),
        }
    }
}

/// Opens persistence transactions.
#[async_trait]
pub trait PersistenceBackend: Send + Sync {
    /// Begins a new transaction.
    async fn begin(&self) -> Result<Box<dyn PersistenceTransaction>, DomainError>;
}

/// One open persistence transaction.
///
/// Dropping a transaction without committing it discards every write.
#[async_trait]
pub trait PersistenceTransaction: Send {
    /// Loads a row by identifier.
    async fn find(&mut self, table: &str, identifier: Uuid)
    -> Result<Option<ProjectionRow>, DomainError>;

    /// Loads all rows whose body has `field` set to the string `value`.
    async fn find_by_field(
        &mut self,
        table: &str,
        field: &str,
        value: &str,
    ) -> Result<Vec<ProjectionRow>, DomainError>;

    /// Inserts a new row.
    ///
    /// Fails with [`DomainError::ConcurrencyConflict`] if the row exists or
    /// the identifier carries a tombstone in `table`. A tombstone committed by
    /// another transaction before this one commits also makes it fail.
    async fn insert(&mut self, table: &str, row: &ProjectionRow) -> Result<(), DomainError>;

    /// Replaces a row that is currently at `expected_version`.
    ///
    /// Fails with [`DomainError::ConcurrencyConflict`] if the stored version
    /// differs, the row is missing, or the identifier carries a tombstone in
    /// `table`.
    async fn update(
        &mut self,
        table: &str,
        row: &ProjectionRow,
        expected_version: i64,
    ) -> Result<(), DomainError>;

    /// Deletes a row. Returns `false` if there was nothing to delete.
    async fn delete(&mut self, table: &str, identifier: Uuid) -> Result<bool, DomainError>;

    /// Stores or replaces the tombstone marker of an aggregate.
    async fn insert_tombstone(
        &mut self,
        table: &str,
        tombstone: &Tombstone,
    ) -> Result<(), DomainError>;

    /// Loads the tombstone marker of an aggregate.
    async fn find_tombstone(
        &mut self,
        table: &str,
        identifier: Uuid,
    ) -> Result<Option<Tombstone>, DomainError>;

    /// Appends a record to the event log.
    async fn append(&mut self, entry: &PendingRecord) -> Result<(), DomainError>;

    /// Makes every write of this transaction durable.
    async fn commit(self: Box<Self>) -> Result<(), DomainError>;

    /// Discards every write of this transaction.
    async fn rollback(self: Box<Self>) -> Result<(), DomainError>;
}

/// Read access to the durable event log.
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Reads up to `limit` records starting at `from_offset`, in offset order.
    async fn read(&self, from_offset: i64, limit: usize) -> Result<Vec<ConsumerRecord>, DomainError>;

    /// Offset of the newest record, or `None` if the log is empty.
    async fn latest_offset(&self) -> Result<Option<i64>, DomainError>;
}

/// Checks that `name` is usable as a table or field identifier.
///
/// # Errors
///
/// Returns [`DomainError::Infrastructure`] for anything but lowercase ASCII
/// letters, digits and underscores starting with a letter.
pub fn validate_identifier(name: &str) -> Result<&str, DomainError> {
    let mut chars = name.chars();
    let valid = chars.next().is_some_and(|c| c.is_ascii_lowercase())
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        && name.len() <= 63;
    if valid {
        Ok(name)
    } else {
        Err(DomainError::Infrastructure(format!(
            "invalid identifier: {name:?}"
        )))
    }
}
