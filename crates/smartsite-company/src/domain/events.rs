//! Event mappers of the company context.
//!
//! Company and employee events carry the full snapshot as payload. Deletions
//! are published as tombstones.

use chrono::{DateTime, Utc};
use smartsite_core::error::DomainError;
use smartsite_core::event::{EventKind, EventName};
use smartsite_core::identifier::{AggregateType, MessageKey};
use smartsite_core::mapper::{EventMapper, MapperRegistryBuilder};
use smartsite_core::snapshot::VersionedSnapshot;

use crate::domain::aggregates::{CompanySnapshot, EmployeeSnapshot};

/// Event names published for companies and employees.
pub const LIFECYCLE_EVENTS: [EventName; 3] =
    [EventName::Created, EventName::Updated, EventName::Deleted];

fn is_lifecycle_event(kind: EventKind, aggregate_type: AggregateType) -> bool {
    kind.aggregate_type == aggregate_type && LIFECYCLE_EVENTS.contains(&kind.name)
}

fn snapshot_value<S: VersionedSnapshot>(
    kind: EventKind,
    snapshot: &S,
) -> Result<Option<serde_json::Value>, DomainError> {
    if kind.name == EventName::Deleted {
        return Ok(None);
    }
    Ok(Some(serde_json::to_value(snapshot)?))
}

/// Maps [`CompanySnapshot`]s to `COMPANY` records.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompanyEventMapper;

impl EventMapper for CompanyEventMapper {
    type Message = CompanySnapshot;

    fn can_map(&self, kind: EventKind) -> bool {
        is_lifecycle_event(kind, AggregateType::Company)
    }

    fn map_to_key(&self, _kind: EventKind, message: &CompanySnapshot) -> MessageKey {
        MessageKey::new(message.root_context_identifier(), message.identifier)
    }

    fn map_to_value(
        &self,
        kind: EventKind,
        message: &CompanySnapshot,
    ) -> Result<Option<serde_json::Value>, DomainError> {
        snapshot_value(kind, message)
    }

    fn occurred_at(&self, message: &CompanySnapshot) -> DateTime<Utc> {
        message.audit.last_modified_date
    }
}

/// Maps [`EmployeeSnapshot`]s to `EMPLOYEE` records keyed by their company.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmployeeEventMapper;

impl EventMapper for EmployeeEventMapper {
    type Message = EmployeeSnapshot;

    fn can_map(&self, kind: EventKind) -> bool {
        is_lifecycle_event(kind, AggregateType::Employee)
    }

    fn map_to_key(&self, _kind: EventKind, message: &EmployeeSnapshot) -> MessageKey {
        MessageKey::new(message.root_context_identifier(), message.identifier)
    }

    fn map_to_value(
        &self,
        kind: EventKind,
        message: &EmployeeSnapshot,
    ) -> Result<Option<serde_json::Value>, DomainError> {
        snapshot_value(kind, message)
    }

    fn occurred_at(&self, message: &EmployeeSnapshot) -> DateTime<Utc> {
        message.audit.last_modified_date
    }
}

/// Registers the mappers of the company context.
#[must_use]
pub fn register_mappers(builder: MapperRegistryBuilder) -> MapperRegistryBuilder {
    builder
        .register(CompanyEventMapper)
        .register(EmployeeEventMapper)
}
