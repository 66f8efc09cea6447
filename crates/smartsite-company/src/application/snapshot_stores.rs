//! Snapshot stores of the company and employee aggregates.

use smartsite_core::error::DomainError;
use smartsite_core::event::{Event, EventKind, EventRecord};
use smartsite_core::identifier::AggregateType;
use smartsite_core::snapshot::{SnapshotProjector, VersionedSnapshot};
use smartsite_core::store::SnapshotStore;

use crate::domain::aggregates::{
    COMPANY_TABLE, CompanySnapshot, EMPLOYEE_TABLE, EmployeeSnapshot,
};
use crate::domain::events::LIFECYCLE_EVENTS;

/// Snapshot store of companies.
pub type CompanySnapshotStore = SnapshotStore<CompanyProjector>;

/// Snapshot store of employees.
pub type EmployeeSnapshotStore = SnapshotStore<EmployeeProjector>;

fn decode_snapshot<S: VersionedSnapshot>(record: &EventRecord) -> Result<S, DomainError> {
    let event = Event::<S>::decode(record)?;
    let snapshot = event.payload.ok_or_else(|| {
        DomainError::Validation(format!("{} record without payload", record.kind()))
    })?;
    Ok(snapshot.with_version(record.version()))
}

/// Projects `COMPANY` records into [`CompanySnapshot`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompanyProjector;

impl SnapshotProjector for CompanyProjector {
    type Snapshot = CompanySnapshot;

    fn aggregate_type(&self) -> AggregateType {
        AggregateType::Company
    }

    fn table(&self) -> &'static str {
        COMPANY_TABLE
    }

    fn handles(&self, kind: EventKind) -> bool {
        kind.aggregate_type == AggregateType::Company && LIFECYCLE_EVENTS.contains(&kind.name)
    }

    fn project(
        &self,
        record: &EventRecord,
        _current: Option<&CompanySnapshot>,
    ) -> Result<CompanySnapshot, DomainError> {
        decode_snapshot(record)
    }
}

/// Projects `EMPLOYEE` records into [`EmployeeSnapshot`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmployeeProjector;

impl SnapshotProjector for EmployeeProjector {
    type Snapshot = EmployeeSnapshot;

    fn aggregate_type(&self) -> AggregateType {
        AggregateType::Employee
    }

    fn table(&self) -> &'static str {
        EMPLOYEE_TABLE
    }

    fn handles(&self, kind: EventKind) -> bool {
        kind.aggregate_type == AggregateType::Employee && LIFECYCLE_EVENTS.contains(&kind.name)
    }

    fn project(
        &self,
        record: &EventRecord,
        current: Option<&EmployeeSnapshot>,
    ) -> Result<EmployeeSnapshot, DomainError> {
        let snapshot: EmployeeSnapshot = decode_snapshot(record)?;
        if let Some(current) = current
            && (current.company_identifier != snapshot.company_identifier
                || current.user_identifier != snapshot.user_identifier)
        {
            return Err(DomainError::Validation(format!(
                "employee {} cannot change its company or user",
                snapshot.identifier.identifier
            )));
        }
        Ok(snapshot)
    }
}
