//! Event mapper of the user context.
//!
//! User events carry the full snapshot. Deleting a user publishes a
//! tombstone.

use chrono::{DateTime, Utc};
use smartsite_core::error::DomainError;
use smartsite_core::event::{EventKind, EventName};
use smartsite_core::identifier::{AggregateType, MessageKey};
use smartsite_core::mapper::{EventMapper, MapperRegistryBuilder};
use smartsite_core::snapshot::VersionedSnapshot;

use crate::domain::aggregates::UserSnapshot;

/// Event names published for users.
pub const USER_EVENTS: [EventName; 4] = [
    EventName::Created,
    EventName::Updated,
    EventName::Registered,
    EventName::Deleted,
];

/// Maps [`UserSnapshot`]s to `USER` records keyed by the user.
#[derive(Debug, Clone, Copy, Default)]
pub struct UserEventMapper;

impl EventMapper for UserEventMapper {
    type Message = UserSnapshot;

    fn can_map(&self, kind: EventKind) -> bool {
        kind.aggregate_type == AggregateType::User && USER_EVENTS.contains(&kind.name)
    }

    fn map_to_key(&self, _kind: EventKind, message: &UserSnapshot) -> MessageKey {
        MessageKey::new(message.root_context_identifier(), message.identifier)
    }

    fn map_to_value(
        &self,
        kind: EventKind,
        message: &UserSnapshot,
    ) -> Result<Option<serde_json::Value>, DomainError> {
        if kind.name == EventName::Deleted {
            return Ok(None);
        }
        Ok(Some(serde_json::to_value(message)?))
    }

    fn occurred_at(&self, message: &UserSnapshot) -> DateTime<Utc> {
        message.audit.last_modified_date
    }
}

/// Registers the mapper of the user context.
#[must_use]
pub fn register_mappers(builder: MapperRegistryBuilder) -> MapperRegistryBuilder {
    builder.register(UserEventMapper)
}
