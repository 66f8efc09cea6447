//! The employable user projection.
//!
//! One row per user, combining the user's data with the company and employee
//! the user currently works for. Company names are kept in a side table so
//! that they can be filled in for employments whose company event arrives
//! later, and pushed to every affected row when a company is renamed.
//!
//! Company, employee and user events live on different partitions, so the
//! projection sees them in no particular order across aggregates. Each rule
//! below is written so that any delivery order that keeps the order of one
//! aggregate converges to the same rows:
//!
//! - events of one employee apply by version, events of different employees
//!   by timestamp;
//! - an employee deletion only clears a row that still references that
//!   employee, and a row without user data is removed with its employment;
//! - deletions leave a marker, so late events of a deleted user or employee
//!   are discarded.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use smartsite_core::error::DomainError;
use smartsite_core::event::{Event, EventName, EventRecord};
use smartsite_core::identifier::{AggregateType, MessageKey};
use smartsite_core::persistence::{ProjectionRow, Tombstone};
use smartsite_core::snapshot::AuditInfo;
use smartsite_core::store::{ApplyOutcome, DiscardReason, EventHandler, EventSource};
use smartsite_core::uow::UnitOfWork;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::domain::aggregates::{CompanySnapshot, EmployeeSnapshot};
use crate::domain::events::LIFECYCLE_EVENTS;

/// Table of the employable user rows.
pub const EMPLOYABLE_USER_TABLE: &str = "employable_user";

/// Side table of company names.
pub const COMPANY_NAME_TABLE: &str = "employable_user_company_name";

/// Deletion markers of employees, as seen by this projection.
const EMPLOYMENT_TOMBSTONES: &str = "employable_user_employment";

/// User data of an employable user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserData {
    /// Version of the user aggregate the data was taken from.
    pub version: i64,
    /// E-mail address.
    pub email: String,
    /// First name.
    pub first_name: String,
    /// Last name.
    pub last_name: String,
    /// First and last name.
    pub user_name: String,
    /// Whether the user finished registration.
    pub registered: bool,
    /// Whether the user is locked.
    pub locked: bool,
    /// When the user was created.
    pub created_date: DateTime<Utc>,
}

/// A user together with the user's current employment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmployableUser {
    /// The user.
    pub user_identifier: Uuid,
    /// User data; absent until the first user event arrived.
    pub user: Option<UserData>,
    /// Company of the current employment.
    pub company_identifier: Option<Uuid>,
    /// Name of that company, once known.
    pub company_name: Option<String>,
    /// Employee of the current employment.
    pub employee_identifier: Option<Uuid>,
    /// Version of the employee event the employment was taken from.
    pub employee_version: Option<i64>,
    /// Timestamp of the employee event the employment was taken from.
    pub employed_since: Option<DateTime<Utc>>,
}

impl EmployableUser {
    fn empty(user_identifier: Uuid) -> Self {
        Self {
            user_identifier,
            user: None,
            company_identifier: None,
            company_name: None,
            employee_identifier: None,
            employee_version: None,
            employed_since: None,
        }
    }

    fn clear_employment(&mut self) {
        self.company_identifier = None;
        self.company_name = None;
        self.employee_identifier = None;
        self.employee_version = None;
        self.employed_since = None;
    }
}

/// The subset of a user record this projection reads.
#[derive(Debug, Serialize, Deserialize)]
struct UserPayload {
    email: String,
    first_name: String,
    last_name: String,
    #[serde(default)]
    registered: bool,
    #[serde(default)]
    locked: bool,
    audit: AuditInfo,
}

#[derive(Debug, Serialize, Deserialize)]
struct CompanyName {
    company_identifier: Uuid,
    name: String,
}

fn decode_payload<P: Serialize + DeserializeOwned>(record: &EventRecord) -> Result<P, DomainError> {
    Event::<P>::decode(record)?.payload.ok_or_else(|| {
        DomainError::Validation(format!("{} record without payload", record.kind()))
    })
}

fn is_deletion(record: &EventRecord) -> bool {
    record.is_tombstone() || record.name == EventName::Deleted
}

/// Maintains the employable user rows.
#[derive(Debug, Default)]
pub struct EmployableUserProjection {
    discarded: AtomicU64,
}

impl EmployableUserProjection {
    /// Creates the projection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records this projection has discarded since it was created.
    #[must_use]
    pub fn discarded_events(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }

    /// Loads the row of a user.
    ///
    /// # Errors
    ///
    /// Propagates persistence and decoding errors.
    pub async fn find(
        &self,
        uow: &mut UnitOfWork,
        user_identifier: Uuid,
    ) -> Result<Option<EmployableUser>, DomainError> {
        Ok(load(uow, user_identifier).await?.map(|(user, _)| user))
    }

    /// Loads the rows of all users employed by a company.
    ///
    /// # Errors
    ///
    /// Propagates persistence and decoding errors.
    pub async fn find_by_company(
        &self,
        uow: &mut UnitOfWork,
        company_identifier: Uuid,
    ) -> Result<Vec<EmployableUser>, DomainError> {
        uow.transaction()
            .find_by_field(
                EMPLOYABLE_USER_TABLE,
                "company_identifier",
                &company_identifier.to_string(),
            )
            .await?
            .into_iter()
            .map(|row| Ok(serde_json::from_value(row.body)?))
            .collect()
    }

    async fn apply_user(
        &self,
        record: &EventRecord,
        uow: &mut UnitOfWork,
    ) -> Result<ApplyOutcome, DomainError> {
        let user_identifier = record.key.aggregate_identifier.identifier;
        if is_deletion(record) {
            let removed = uow
                .transaction()
                .delete(EMPLOYABLE_USER_TABLE, user_identifier)
                .await?;
            uow.evict(EMPLOYABLE_USER_TABLE, user_identifier);
            remember_deletion(uow, EMPLOYABLE_USER_TABLE, record).await?;
            return Ok(if removed {
                ApplyOutcome::Deleted
            } else {
                self.discard(record, DiscardReason::AlreadyAbsent)
            });
        }
        if was_deleted(uow, EMPLOYABLE_USER_TABLE, user_identifier).await? {
            return Ok(self.discard(record, DiscardReason::AggregateDeleted));
        }

        let payload: UserPayload = decode_payload(record)?;
        let (mut user, revision) = load_or_empty(uow, user_identifier).await?;
        if user
            .user
            .as_ref()
            .is_some_and(|data| data.version >= record.version())
        {
            return Ok(self.discard(record, DiscardReason::Stale));
        }
        user.user = Some(UserData {
            version: record.version(),
            user_name: format!("{} {}", payload.first_name, payload.last_name),
            email: payload.email,
            first_name: payload.first_name,
            last_name: payload.last_name,
            registered: payload.registered,
            locked: payload.locked,
            created_date: payload.audit.created_date,
        });
        save(uow, &user, revision, record.timestamp).await
    }

    async fn apply_company(
        &self,
        record: &EventRecord,
        uow: &mut UnitOfWork,
    ) -> Result<ApplyOutcome, DomainError> {
        let company_identifier = record.key.aggregate_identifier.identifier;
        if is_deletion(record) {
            let removed = uow
                .transaction()
                .delete(COMPANY_NAME_TABLE, company_identifier)
                .await?;
            uow.evict(COMPANY_NAME_TABLE, company_identifier);
            remember_deletion(uow, COMPANY_NAME_TABLE, record).await?;
            return Ok(if removed {
                ApplyOutcome::Deleted
            } else {
                self.discard(record, DiscardReason::AlreadyAbsent)
            });
        }
        if was_deleted(uow, COMPANY_NAME_TABLE, company_identifier).await? {
            return Ok(self.discard(record, DiscardReason::AggregateDeleted));
        }

        let company: CompanySnapshot = decode_payload(record)?;
        let current = uow
            .find_cached(COMPANY_NAME_TABLE, company_identifier)
            .await?;
        if current
            .as_ref()
            .is_some_and(|row| row.version >= record.version())
        {
            return Ok(self.discard(record, DiscardReason::Stale));
        }
        let row = ProjectionRow {
            identifier: company_identifier,
            root_context_identifier: record.key.root_context_identifier,
            version: record.version(),
            last_modified: record.timestamp,
            body: serde_json::to_value(CompanyName {
                company_identifier,
                name: company.name.clone(),
            })?,
        };
        let outcome = match &current {
            Some(current) => {
                uow.transaction()
                    .update(COMPANY_NAME_TABLE, &row, current.version)
                    .await?;
                ApplyOutcome::Updated
            }
            None => {
                uow.transaction().insert(COMPANY_NAME_TABLE, &row).await?;
                ApplyOutcome::Created
            }
        };
        uow.evict(COMPANY_NAME_TABLE, company_identifier);

        let affected = uow
            .transaction()
            .find_by_field(
                EMPLOYABLE_USER_TABLE,
                "company_identifier",
                &company_identifier.to_string(),
            )
            .await?;
        let mut renamed = 0_usize;
        for row in affected {
            let mut user: EmployableUser = serde_json::from_value(row.body)?;
            if user.company_name.as_deref() == Some(company.name.as_str()) {
                continue;
            }
            user.company_name = Some(company.name.clone());
            save(
                uow,
                &user,
                Some(row.version),
                row.last_modified.max(record.timestamp),
            )
            .await?;
            renamed += 1;
        }
        if renamed > 0 {
            info!(%company_identifier, renamed, "Company name propagated to employable users");
        }
        Ok(outcome)
    }

    async fn apply_employee(
        &self,
        record: &EventRecord,
        uow: &mut UnitOfWork,
    ) -> Result<ApplyOutcome, DomainError> {
        let employee_identifier = record.key.aggregate_identifier.identifier;
        if is_deletion(record) {
            return self.remove_employment(record, uow).await;
        }
        if was_deleted(uow, EMPLOYMENT_TOMBSTONES, employee_identifier).await? {
            return Ok(self.discard(record, DiscardReason::AggregateDeleted));
        }

        let employee: EmployeeSnapshot = decode_payload(record)?;
        if was_deleted(uow, EMPLOYABLE_USER_TABLE, employee.user_identifier).await? {
            return Ok(self.discard(record, DiscardReason::AggregateDeleted));
        }
        let (mut user, revision) = load_or_empty(uow, employee.user_identifier).await?;
        let stale = match user.employee_identifier {
            Some(current) if current == employee_identifier => user
                .employee_version
                .is_some_and(|version| version >= record.version()),
            Some(_) => user
                .employed_since
                .is_some_and(|since| record.timestamp <= since),
            None => false,
        };
        if stale {
            return Ok(self.discard(record, DiscardReason::Stale));
        }

        user.company_name = company_name(uow, employee.company_identifier).await?;
        user.company_identifier = Some(employee.company_identifier);
        user.employee_identifier = Some(employee_identifier);
        user.employee_version = Some(record.version());
        user.employed_since = Some(record.timestamp);
        save(uow, &user, revision, record.timestamp).await
    }

    async fn remove_employment(
        &self,
        record: &EventRecord,
        uow: &mut UnitOfWork,
    ) -> Result<ApplyOutcome, DomainError> {
        let employee_identifier = record.key.aggregate_identifier.identifier;
        remember_deletion(uow, EMPLOYMENT_TOMBSTONES, record).await?;
        let rows = uow
            .transaction()
            .find_by_field(
                EMPLOYABLE_USER_TABLE,
                "employee_identifier",
                &employee_identifier.to_string(),
            )
            .await?;
        if rows.is_empty() {
            return Ok(self.discard(record, DiscardReason::AlreadyAbsent));
        }
        for row in rows {
            let mut user: EmployableUser = serde_json::from_value(row.body)?;
            user.clear_employment();
            if user.user.is_none() {
                uow.transaction()
                    .delete(EMPLOYABLE_USER_TABLE, user.user_identifier)
                    .await?;
                uow.evict(EMPLOYABLE_USER_TABLE, user.user_identifier);
                debug!(user = %user.user_identifier, "Employable user without user data removed");
            } else {
                save(
                    uow,
                    &user,
                    Some(row.version),
                    row.last_modified.max(record.timestamp),
                )
                .await?;
            }
        }
        Ok(ApplyOutcome::Deleted)
    }

    fn discard(&self, record: &EventRecord, reason: DiscardReason) -> ApplyOutcome {
        self.discarded.fetch_add(1, Ordering::Relaxed);
        debug!(
            aggregate = %record.key.aggregate_identifier,
            event = %record.name,
            reason = reason.as_str(),
            "Skipping update of employable user projection for event"
        );
        ApplyOutcome::Discarded(reason)
    }
}

async fn load(
    uow: &mut UnitOfWork,
    user_identifier: Uuid,
) -> Result<Option<(EmployableUser, i64)>, DomainError> {
    uow.find_cached(EMPLOYABLE_USER_TABLE, user_identifier)
        .await?
        .map(|row| Ok((serde_json::from_value(row.body)?, row.version)))
        .transpose()
}

async fn load_or_empty(
    uow: &mut UnitOfWork,
    user_identifier: Uuid,
) -> Result<(EmployableUser, Option<i64>), DomainError> {
    Ok(match load(uow, user_identifier).await? {
        Some((user, revision)) => (user, Some(revision)),
        None => (EmployableUser::empty(user_identifier), None),
    })
}

/// Writes a row; `revision` is the stored revision, `None` for a new row.
async fn save(
    uow: &mut UnitOfWork,
    user: &EmployableUser,
    revision: Option<i64>,
    at: DateTime<Utc>,
) -> Result<ApplyOutcome, DomainError> {
    let row = ProjectionRow {
        identifier: user.user_identifier,
        root_context_identifier: user.user_identifier,
        version: revision.map_or(0, |revision| revision + 1),
        last_modified: at,
        body: serde_json::to_value(user)?,
    };
    let outcome = match revision {
        Some(revision) => {
            uow.transaction()
                .update(EMPLOYABLE_USER_TABLE, &row, revision)
                .await?;
            ApplyOutcome::Updated
        }
        None => {
            uow.transaction().insert(EMPLOYABLE_USER_TABLE, &row).await?;
            ApplyOutcome::Created
        }
    };
    uow.evict(EMPLOYABLE_USER_TABLE, user.user_identifier);
    Ok(outcome)
}

async fn company_name(
    uow: &mut UnitOfWork,
    company_identifier: Uuid,
) -> Result<Option<String>, DomainError> {
    uow.find_cached(COMPANY_NAME_TABLE, company_identifier)
        .await?
        .map(|row| Ok(serde_json::from_value::<CompanyName>(row.body)?.name))
        .transpose()
}

async fn was_deleted(
    uow: &mut UnitOfWork,
    table: &str,
    identifier: Uuid,
) -> Result<bool, DomainError> {
    Ok(uow
        .transaction()
        .find_tombstone(table, identifier)
        .await?
        .is_some())
}

async fn remember_deletion(
    uow: &mut UnitOfWork,
    table: &str,
    record: &EventRecord,
) -> Result<(), DomainError> {
    let identifier = record.key.aggregate_identifier.identifier;
    let known = uow.transaction().find_tombstone(table, identifier).await?;
    if known.is_some_and(|tombstone| tombstone.version >= record.version()) {
        return Ok(());
    }
    uow.transaction()
        .insert_tombstone(
            table,
            &Tombstone {
                identifier,
                version: record.version(),
                deleted_at: record.timestamp,
            },
        )
        .await
}

#[async_trait]
impl EventHandler for EmployableUserProjection {
    fn name(&self) -> &'static str {
        EMPLOYABLE_USER_TABLE
    }

    fn handles_message(&self, key: &MessageKey, record: &EventRecord) -> bool {
        match key.aggregate_identifier.aggregate_type {
            AggregateType::Company | AggregateType::Employee => {
                LIFECYCLE_EVENTS.contains(&record.name)
            }
            AggregateType::User => matches!(
                record.name,
                EventName::Created | EventName::Updated | EventName::Registered | EventName::Deleted
            ),
            AggregateType::BusinessTransaction => false,
        }
    }

    #[instrument(
        skip(self, record, uow),
        fields(aggregate = %record.key.aggregate_identifier, event = %record.name)
    )]
    async fn handle_message(
        &self,
        record: &EventRecord,
        source: EventSource,
        uow: &mut UnitOfWork,
    ) -> Result<ApplyOutcome, DomainError> {
        match record.key.aggregate_identifier.aggregate_type {
            AggregateType::User => self.apply_user(record, uow).await,
            AggregateType::Company => self.apply_company(record, uow).await,
            AggregateType::Employee => self.apply_employee(record, uow).await,
            AggregateType::BusinessTransaction => {
                Ok(self.discard(record, DiscardReason::AlreadyAbsent))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use smartsite_core::identifier::AggregateIdentifier;
    use smartsite_core::memory::InMemoryBackend;
    use smartsite_core::snapshot::VersionedSnapshot;
    use smartsite_test_support::{fixed_time, record_for};

    use super::*;
    use crate::domain::aggregates::EmployeeRole;

    fn company(name: &str, minute: u32) -> CompanySnapshot {
        CompanySnapshot::new(
            Uuid::new_v4(),
            name.to_string(),
            "Main Street 1".to_string(),
            "Stuttgart".to_string(),
            "70173".to_string(),
            AuditInfo::created(Uuid::new_v4(), fixed_time(minute)),
        )
        .with_version(0)
    }

    fn employee(company: &CompanySnapshot, user: Uuid, minute: u32) -> EmployeeSnapshot {
        EmployeeSnapshot::new(
            Uuid::new_v4(),
            company.identifier.identifier,
            user,
            &[EmployeeRole::Foreman],
            AuditInfo::created(Uuid::new_v4(), fixed_time(minute)),
        )
        .with_version(0)
    }

    fn company_record(company: &CompanySnapshot, name: EventName, minute: u32) -> EventRecord {
        record_for(
            company.root_context_identifier(),
            company.identifier,
            name,
            minute,
            Some(serde_json::to_value(company).unwrap()),
        )
    }

    fn employee_record(employee: &EmployeeSnapshot, minute: u32) -> EventRecord {
        record_for(
            employee.root_context_identifier(),
            employee.identifier,
            EventName::Created,
            minute,
            Some(serde_json::to_value(employee).unwrap()),
        )
    }

    fn employee_deleted(employee: &EmployeeSnapshot, minute: u32) -> EventRecord {
        record_for(
            employee.root_context_identifier(),
            employee.identifier.next_version(),
            EventName::Deleted,
            minute,
            None,
        )
    }

    fn user_record(user: Uuid, version: i64, first_name: &str, minute: u32) -> EventRecord {
        record_for(
            user,
            AggregateIdentifier::new(AggregateType::User, user, version),
            if version == 0 {
                EventName::Created
            } else {
                EventName::Updated
            },
            minute,
            Some(json!({
                "identifier": AggregateIdentifier::new(AggregateType::User, user, version),
                "email": "max@example.com",
                "first_name": first_name,
                "last_name": "Mustermann",
                "registered": true,
                "locked": false,
                "audit": AuditInfo::created(user, fixed_time(0)),
            })),
        )
    }

    async fn apply_all(
        backend: &InMemoryBackend,
        projection: &EmployableUserProjection,
        records: &[EventRecord],
    ) {
        for record in records {
            let mut uow = UnitOfWork::begin(backend).await.unwrap();
            projection
                .handle_message(record, EventSource::Restore, &mut uow)
                .await
                .unwrap();
            uow.commit().await.unwrap();
        }
    }

    async fn row_of(backend: &InMemoryBackend, user: Uuid) -> Option<EmployableUser> {
        backend
            .row(EMPLOYABLE_USER_TABLE, user)
            .await
            .map(|row| serde_json::from_value(row.body).unwrap())
    }

    fn permutations(items: &[usize]) -> Vec<Vec<usize>> {
        if items.len() <= 1 {
            return vec![items.to_vec()];
        }
        let mut result = Vec::new();
        for (i, first) in items.iter().enumerate() {
            let mut rest = items.to_vec();
            rest.remove(i);
            for mut tail in permutations(&rest) {
                tail.insert(0, *first);
                result.push(tail);
            }
        }
        result
    }

    #[tokio::test]
    async fn test_user_event_creates_row_with_user_data_only() {
        // Arrange
        let backend = InMemoryBackend::new();
        let projection = EmployableUserProjection::new();
        let user = Uuid::new_v4();

        // Act
        apply_all(&backend, &projection, &[user_record(user, 0, "Max", 0)]).await;

        // Assert
        let row = row_of(&backend, user).await.unwrap();
        assert_eq!(row.user.unwrap().user_name, "Max Mustermann");
        assert_eq!(row.company_identifier, None);
        assert_eq!(row.employee_identifier, None);
    }

    #[tokio::test]
    async fn test_user_event_after_employee_event_keeps_employment() {
        // Arrange
        let backend = InMemoryBackend::new();
        let projection = EmployableUserProjection::new();
        let user = Uuid::new_v4();
        let acme = company("Acme", 0);
        let hired = employee(&acme, user, 1);

        // Act
        apply_all(
            &backend,
            &projection,
            &[
                company_record(&acme, EventName::Created, 0),
                employee_record(&hired, 1),
                user_record(user, 0, "Max", 2),
            ],
        )
        .await;

        // Assert
        let row = row_of(&backend, user).await.unwrap();
        assert!(row.user.is_some());
        assert_eq!(row.company_name.as_deref(), Some("Acme"));
        assert_eq!(row.employee_identifier, Some(hired.identifier.identifier));
    }

    #[tokio::test]
    async fn test_stale_user_event_is_discarded() {
        // Arrange
        let backend = InMemoryBackend::new();
        let projection = EmployableUserProjection::new();
        let user = Uuid::new_v4();

        // Act
        apply_all(
            &backend,
            &projection,
            &[
                user_record(user, 0, "Max", 0),
                user_record(user, 1, "Maja", 1),
                user_record(user, 0, "Max", 0),
            ],
        )
        .await;

        // Assert
        let row = row_of(&backend, user).await.unwrap();
        assert_eq!(row.user.unwrap().first_name, "Maja");
        assert_eq!(projection.discarded_events(), 1);
    }

    #[tokio::test]
    async fn test_user_tombstone_removes_row_for_good() {
        // Arrange
        let backend = InMemoryBackend::new();
        let projection = EmployableUserProjection::new();
        let user = Uuid::new_v4();
        let tombstone = record_for(
            user,
            AggregateIdentifier::new(AggregateType::User, user, 1),
            EventName::Deleted,
            1,
            None,
        );

        // Act
        apply_all(
            &backend,
            &projection,
            &[user_record(user, 0, "Max", 0), tombstone, user_record(user, 0, "Max", 0)],
        )
        .await;

        // Assert
        assert!(row_of(&backend, user).await.is_none());
    }

    #[tokio::test]
    async fn test_employment_racing_user_deletion_does_not_resurrect_row() {
        // Arrange
        let backend = InMemoryBackend::new();
        let projection = EmployableUserProjection::new();
        let user = Uuid::new_v4();
        let acme = company("Acme", 0);
        let hired = employee(&acme, user, 1);
        let user_deleted = record_for(
            user,
            AggregateIdentifier::new(AggregateType::User, user, 1),
            EventName::Deleted,
            3,
            None,
        );
        let mut racing = UnitOfWork::begin(&backend).await.unwrap();
        projection
            .handle_message(&employee_record(&hired, 1), EventSource::Restore, &mut racing)
            .await
            .unwrap();
        apply_all(
            &backend,
            &projection,
            &[user_record(user, 0, "Max", 2), user_deleted],
        )
        .await;

        // Act
        let result = racing.commit().await;
        apply_all(&backend, &projection, &[employee_record(&hired, 1)]).await;

        // Assert
        assert!(matches!(
            result,
            Err(DomainError::ConcurrencyConflict { actual: 1, .. })
        ));
        assert!(row_of(&backend, user).await.is_none());
    }

    #[tokio::test]
    async fn test_employee_deletion_removes_row_without_user_data() {
        // Arrange
        let backend = InMemoryBackend::new();
        let projection = EmployableUserProjection::new();
        let user = Uuid::new_v4();
        let acme = company("Acme", 0);
        let hired = employee(&acme, user, 1);
        let records = [
            company_record(&acme, EventName::Created, 0),
            employee_record(&hired, 1),
            employee_deleted(&hired, 2),
        ];

        // Act
        apply_all(&backend, &projection, &records).await;
        apply_all(&backend, &projection, &records).await;

        // Assert
        assert!(row_of(&backend, user).await.is_none());
    }

    #[tokio::test]
    async fn test_employee_deletion_keeps_user_data() {
        // Arrange
        let backend = InMemoryBackend::new();
        let projection = EmployableUserProjection::new();
        let user = Uuid::new_v4();
        let acme = company("Acme", 0);
        let hired = employee(&acme, user, 1);

        // Act
        apply_all(
            &backend,
            &projection,
            &[
                user_record(user, 0, "Max", 0),
                company_record(&acme, EventName::Created, 0),
                employee_record(&hired, 1),
                employee_deleted(&hired, 2),
            ],
        )
        .await;

        // Assert
        let row = row_of(&backend, user).await.unwrap();
        assert!(row.user.is_some());
        assert_eq!(row.company_identifier, None);
        assert_eq!(row.company_name, None);
        assert_eq!(row.employee_identifier, None);
    }

    #[tokio::test]
    async fn test_older_employment_does_not_replace_newer_one() {
        // Arrange
        let backend = InMemoryBackend::new();
        let projection = EmployableUserProjection::new();
        let user = Uuid::new_v4();
        let newer_company = company("Newer", 5);
        let newer = employee(&newer_company, user, 6);
        let older_company = company("Older", 0);
        let older = employee(&older_company, user, 1);

        // Act
        apply_all(
            &backend,
            &projection,
            &[
                user_record(user, 0, "Max", 0),
                company_record(&newer_company, EventName::Created, 5),
                employee_record(&newer, 6),
                company_record(&older_company, EventName::Created, 0),
                employee_record(&older, 1),
                employee_deleted(&older, 2),
            ],
        )
        .await;

        // Assert
        let row = row_of(&backend, user).await.unwrap();
        assert_eq!(row.employee_identifier, Some(newer.identifier.identifier));
        assert_eq!(row.company_name.as_deref(), Some("Newer"));
    }

    #[tokio::test]
    async fn test_company_rename_updates_every_affected_row() {
        // Arrange
        let backend = InMemoryBackend::new();
        let projection = EmployableUserProjection::new();
        let acme = company("Acme", 0);
        let other = company("Other", 0);
        let (first, second, third) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let renamed = CompanySnapshot {
            name: "Acme AG".to_string(),
            ..acme.clone()
        }
        .with_version(1);

        // Act
        apply_all(
            &backend,
            &projection,
            &[
                company_record(&acme, EventName::Created, 0),
                company_record(&other, EventName::Created, 0),
                employee_record(&employee(&acme, first, 1), 1),
                employee_record(&employee(&acme, second, 2), 2),
                employee_record(&employee(&other, third, 3), 3),
                company_record(&renamed, EventName::Updated, 4),
            ],
        )
        .await;

        // Assert
        for user in [first, second] {
            let row = row_of(&backend, user).await.unwrap();
            assert_eq!(row.company_name.as_deref(), Some("Acme AG"));
        }
        let untouched = row_of(&backend, third).await.unwrap();
        assert_eq!(untouched.company_name.as_deref(), Some("Other"));
    }

    #[tokio::test]
    async fn test_company_name_filled_in_when_company_arrives_late() {
        // Arrange
        let backend = InMemoryBackend::new();
        let projection = EmployableUserProjection::new();
        let user = Uuid::new_v4();
        let acme = company("Acme", 0);

        // Act
        apply_all(
            &backend,
            &projection,
            &[
                employee_record(&employee(&acme, user, 1), 1),
                company_record(&acme, EventName::Created, 0),
            ],
        )
        .await;

        // Assert
        let row = row_of(&backend, user).await.unwrap();
        assert_eq!(row.company_name.as_deref(), Some("Acme"));
    }

    #[tokio::test]
    async fn test_company_deletion_removes_company_name() {
        // Arrange
        let backend = InMemoryBackend::new();
        let projection = EmployableUserProjection::new();
        let acme = company("Acme", 0);
        let id = acme.identifier.identifier;
        let tombstone = record_for(id, acme.identifier.next_version(), EventName::Deleted, 1, None);

        // Act
        apply_all(
            &backend,
            &projection,
            &[company_record(&acme, EventName::Created, 0)],
        )
        .await;
        assert!(backend.row(COMPANY_NAME_TABLE, id).await.is_some());
        apply_all(&backend, &projection, &[tombstone]).await;

        // Assert
        assert!(backend.row(COMPANY_NAME_TABLE, id).await.is_none());
    }

    #[tokio::test]
    async fn test_employment_change_converges_for_every_delivery_order() {
        // Arrange
        let user = Uuid::new_v4();
        let c1 = company("Company One", 0);
        let e1 = employee(&c1, user, 1);
        let c2 = company("Company Two", 2);
        let e2 = employee(&c2, user, 3);
        let records = [
            user_record(user, 0, "Max", 0),
            company_record(&c1, EventName::Created, 0),
            employee_record(&e1, 1),
            company_record(&c2, EventName::Created, 2),
            employee_record(&e2, 3),
            employee_deleted(&e1, 4),
        ];
        let (e1_created, e1_deleted) = (2, 5);
        let orders: Vec<Vec<usize>> = permutations(&[0, 1, 2, 3, 4, 5])
            .into_iter()
            .filter(|order| {
                let position = |i| order.iter().position(|&x| x == i).unwrap();
                position(e1_created) < position(e1_deleted)
            })
            .collect();
        assert_eq!(orders.len(), 360);

        for order in orders {
            let backend = InMemoryBackend::new();
            let projection = EmployableUserProjection::new();
            let delivered: Vec<EventRecord> = order.iter().map(|&i| records[i].clone()).collect();

            // Act
            apply_all(&backend, &projection, &delivered).await;
            apply_all(&backend, &projection, &delivered).await;

            // Assert
            let row = row_of(&backend, user).await.unwrap();
            assert_eq!(
                row.company_identifier,
                Some(c2.identifier.identifier),
                "order {order:?}"
            );
            assert_eq!(row.company_name.as_deref(), Some("Company Two"), "order {order:?}");
            assert_eq!(
                row.employee_identifier,
                Some(e2.identifier.identifier),
                "order {order:?}"
            );
            assert!(row.user.is_some(), "order {order:?}");
        }
    }
}
