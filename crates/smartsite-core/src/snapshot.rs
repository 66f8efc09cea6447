//! Versioned snapshots of aggregate state and the projectors that derive them
//! from event records.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;
use crate::event::{EventKind, EventName, EventRecord};
use crate::identifier::{AggregateIdentifier, AggregateType};
use crate::persistence::ProjectionRow;

/// Auditing information carried by every snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditInfo {
    /// User that created the aggregate.
    pub created_by: Uuid,
    /// When the aggregate was created.
    pub created_date: DateTime<Utc>,
    /// User that last changed the aggregate.
    pub last_modified_by: Uuid,
    /// When the aggregate was last changed.
    pub last_modified_date: DateTime<Utc>,
}

impl AuditInfo {
    /// Auditing information of a freshly created aggregate.
    #[must_use]
    pub fn created(by: Uuid, at: DateTime<Utc>) -> Self {
        Self {
            created_by: by,
            created_date: at,
            last_modified_by: by,
            last_modified_date: at,
        }
    }

    /// Returns a copy marked as modified by `by` at `at`.
    #[must_use]
    pub fn touched(&self, by: Uuid, at: DateTime<Utc>) -> Self {
        Self {
            last_modified_by: by,
            last_modified_date: at,
            ..self.clone()
        }
    }
}

/// Immutable, versioned state of one aggregate.
///
/// A snapshot is never mutated in place; every change produces a new value
/// through [`CommandHandler::update`](crate::command::CommandHandler::update).
pub trait VersionedSnapshot:
    Clone + PartialEq + Send + Sync + Serialize + DeserializeOwned + 'static
{
    /// Identifier of the aggregate, including the version of this snapshot.
    fn identifier(&self) -> AggregateIdentifier;

    /// Root context the aggregate belongs to.
    fn root_context_identifier(&self) -> Uuid;

    /// When the aggregate was last changed.
    fn last_modified_date(&self) -> DateTime<Utc>;

    /// Returns the same snapshot at the given version.
    #[must_use]
    fn with_version(self, version: i64) -> Self;

    /// Converts the snapshot into its durable projection row.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be serialized.
    fn to_row(&self) -> Result<ProjectionRow, DomainError> {
        Ok(ProjectionRow {
            identifier: self.identifier().identifier,
            root_context_identifier: self.root_context_identifier(),
            version: self.identifier().version,
            last_modified: self.last_modified_date(),
            body: serde_json::to_value(self)?,
        })
    }

    /// Restores a snapshot from its durable projection row.
    ///
    /// # Errors
    ///
    /// Returns an error if the row body does not describe this snapshot type.
    fn from_row(row: &ProjectionRow) -> Result<Self, DomainError> {
        let snapshot: Self = serde_json::from_value(row.body.clone())?;
        Ok(snapshot.with_version(row.version))
    }
}

/// Derives the snapshot of one aggregate type from its event records.
pub trait SnapshotProjector: Send + Sync + 'static {
    /// The snapshot type this projector produces.
    type Snapshot: VersionedSnapshot;

    /// The aggregate type this projector is responsible for.
    fn aggregate_type(&self) -> AggregateType;

    /// Table the snapshots are stored in.
    fn table(&self) -> &'static str;

    /// Returns `true` if the projector applies events of this kind.
    fn handles(&self, kind: EventKind) -> bool;

    /// Returns `true` if the record deletes the aggregate.
    fn is_deleted_event(&self, record: &EventRecord) -> bool {
        record.is_tombstone() || record.name == EventName::Deleted
    }

    /// Builds the next snapshot from the record and the current snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be decoded or is invalid for the
    /// current state.
    fn project(
        &self,
        record: &EventRecord,
        current: Option<&Self::Snapshot>,
    ) -> Result<Self::Snapshot, DomainError>;
}
