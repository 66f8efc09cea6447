//! Snapshot store of the user aggregate.

use smartsite_core::error::DomainError;
use smartsite_core::event::{Event, EventKind, EventRecord};
use smartsite_core::identifier::AggregateType;
use smartsite_core::snapshot::{SnapshotProjector, VersionedSnapshot};
use smartsite_core::store::SnapshotStore;

use crate::domain::aggregates::{USER_TABLE, UserSnapshot};
use crate::domain::events::USER_EVENTS;

/// Snapshot store of users.
pub type UserSnapshotStore = SnapshotStore<UserProjector>;

/// Projects `USER` records into [`UserSnapshot`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct UserProjector;

impl SnapshotProjector for UserProjector {
    type Snapshot = UserSnapshot;

    fn aggregate_type(&self) -> AggregateType {
        AggregateType::User
    }

    fn table(&self) -> &'static str {
        USER_TABLE
    }

    fn handles(&self, kind: EventKind) -> bool {
        kind.aggregate_type == AggregateType::User && USER_EVENTS.contains(&kind.name)
    }

    fn project(
        &self,
        record: &EventRecord,
        current: Option<&UserSnapshot>,
    ) -> Result<UserSnapshot, DomainError> {
        let snapshot = Event::<UserSnapshot>::decode(record)?
            .payload
            .ok_or_else(|| {
                DomainError::Validation(format!("{} record without payload", record.kind()))
            })?
            .with_version(record.version());
        if let Some(current) = current
            && current.registered
            && !snapshot.registered
        {
            return Err(DomainError::Validation(format!(
                "user {} cannot become unregistered",
                snapshot.identifier.identifier
            )));
        }
        Ok(snapshot)
    }
}
