//! Query handlers for the company context.
//!
//! Queries read snapshots and projection rows in a unit of work that is
//! rolled back afterwards, and return read-only views.

use chrono::{DateTime, Utc};
use serde::Serialize;
use smartsite_core::error::DomainError;
use smartsite_core::persistence::PersistenceBackend;
use smartsite_core::snapshot::VersionedSnapshot;
use smartsite_core::uow::UnitOfWork;
use tracing::warn;
use uuid::Uuid;

use crate::application::CompanyStores;
use crate::application::employable_user::EmployableUser;
use crate::domain::aggregates::{CompanySnapshot, EMPLOYEE_TABLE, EmployeeRole, EmployeeSnapshot};

/// Read-only view of a company.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompanyView {
    /// The company identifier.
    pub identifier: Uuid,
    /// Current version, used as `ETag`.
    pub version: i64,
    /// Display name.
    pub name: String,
    /// Street and house number.
    pub street: String,
    /// City.
    pub city: String,
    /// Postal code.
    pub postal_code: String,
    /// When the company was created.
    pub created_date: DateTime<Utc>,
    /// When the company was last changed.
    pub last_modified_date: DateTime<Utc>,
}

impl From<CompanySnapshot> for CompanyView {
    fn from(company: CompanySnapshot) -> Self {
        Self {
            identifier: company.identifier.identifier,
            version: company.identifier.version,
            name: company.name,
            street: company.street,
            city: company.city,
            postal_code: company.postal_code,
            created_date: company.audit.created_date,
            last_modified_date: company.audit.last_modified_date,
        }
    }
}

/// Read-only view of an employee.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmployeeView {
    /// The employee identifier.
    pub identifier: Uuid,
    /// Current version, used as `ETag`.
    pub version: i64,
    /// The employing company.
    pub company_identifier: Uuid,
    /// The employed user.
    pub user_identifier: Uuid,
    /// Roles within the company.
    pub roles: Vec<EmployeeRole>,
}

impl From<EmployeeSnapshot> for EmployeeView {
    fn from(employee: EmployeeSnapshot) -> Self {
        Self {
            identifier: employee.identifier.identifier,
            version: employee.identifier.version,
            company_identifier: employee.company_identifier,
            user_identifier: employee.user_identifier,
            roles: employee.roles,
        }
    }
}

/// Read-only view of an employable user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmployableUserView {
    /// The user.
    pub user_identifier: Uuid,
    /// Full name, once the user is known.
    pub user_name: Option<String>,
    /// E-mail address, once the user is known.
    pub email: Option<String>,
    /// Company of the current employment.
    pub company_identifier: Option<Uuid>,
    /// Name of that company.
    pub company_name: Option<String>,
    /// Employee of the current employment.
    pub employee_identifier: Option<Uuid>,
}

impl From<EmployableUser> for EmployableUserView {
    fn from(user: EmployableUser) -> Self {
        Self {
            user_identifier: user.user_identifier,
            user_name: user.user.as_ref().map(|data| data.user_name.clone()),
            email: user.user.map(|data| data.email),
            company_identifier: user.company_identifier,
            company_name: user.company_name,
            employee_identifier: user.employee_identifier,
        }
    }
}

async fn finish_read(uow: UnitOfWork) {
    if let Err(error) = uow.rollback().await {
        warn!(%error, "Rollback of read-only unit of work failed");
    }
}

/// Retrieves a company by its identifier.
///
/// # Errors
///
/// Returns `DomainError::AggregateNotFound` if there is no such company.
pub async fn get_company_by_id(
    company_id: Uuid,
    backend: &dyn PersistenceBackend,
    stores: &CompanyStores,
) -> Result<CompanyView, DomainError> {
    let mut uow = UnitOfWork::begin(backend).await?;
    let result = stores.companies.find_or_fail(&mut uow, company_id).await;
    finish_read(uow).await;
    result.map(CompanyView::from)
}

/// Retrieves an employee by its identifier.
///
/// # Errors
///
/// Returns `DomainError::AggregateNotFound` if there is no such employee.
pub async fn get_employee_by_id(
    employee_id: Uuid,
    backend: &dyn PersistenceBackend,
    stores: &CompanyStores,
) -> Result<EmployeeView, DomainError> {
    let mut uow = UnitOfWork::begin(backend).await?;
    let result = stores.employees.find_or_fail(&mut uow, employee_id).await;
    finish_read(uow).await;
    result.map(EmployeeView::from)
}

/// Lists the employees of a company, ordered by identifier.
///
/// # Errors
///
/// Returns `DomainError::AggregateNotFound` if there is no such company.
pub async fn list_employees_of_company(
    company_id: Uuid,
    backend: &dyn PersistenceBackend,
    stores: &CompanyStores,
) -> Result<Vec<EmployeeView>, DomainError> {
    let mut uow = UnitOfWork::begin(backend).await?;
    let result = async {
        stores.companies.find_or_fail(&mut uow, company_id).await?;
        uow.transaction()
            .find_by_field(EMPLOYEE_TABLE, "company_identifier", &company_id.to_string())
            .await?
            .iter()
            .map(|row| EmployeeSnapshot::from_row(row).map(EmployeeView::from))
            .collect::<Result<Vec<_>, DomainError>>()
    }
    .await;
    finish_read(uow).await;
    let mut employees = result?;
    employees.sort_by_key(|employee| employee.identifier);
    Ok(employees)
}

/// Retrieves the employable user row of a user.
///
/// # Errors
///
/// Returns `DomainError::AggregateNotFound` if the projection has no row for
/// the user.
pub async fn get_employable_user(
    user_id: Uuid,
    backend: &dyn PersistenceBackend,
    stores: &CompanyStores,
) -> Result<EmployableUserView, DomainError> {
    let mut uow = UnitOfWork::begin(backend).await?;
    let result = stores.employable_users.find(&mut uow, user_id).await;
    finish_read(uow).await;
    result?
        .map(EmployableUserView::from)
        .ok_or(DomainError::AggregateNotFound(user_id))
}

/// Lists the employable users currently employed by a company.
///
/// # Errors
///
/// Propagates persistence and decoding errors.
pub async fn list_employable_users_of_company(
    company_id: Uuid,
    backend: &dyn PersistenceBackend,
    stores: &CompanyStores,
) -> Result<Vec<EmployableUserView>, DomainError> {
    let mut uow = UnitOfWork::begin(backend).await?;
    let result = stores
        .employable_users
        .find_by_company(&mut uow, company_id)
        .await;
    finish_read(uow).await;
    let mut users: Vec<EmployableUserView> =
        result?.into_iter().map(EmployableUserView::from).collect();
    users.sort_by_key(|user| user.user_identifier);
    Ok(users)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use smartsite_core::bus::LocalEventBus;
    use smartsite_core::mapper::MapperRegistry;
    use smartsite_core::memory::InMemoryBackend;
    use smartsite_test_support::{FixedClock, fixed_time};

    use super::*;
    use crate::application::command_handlers::{handle_create_company, handle_create_employee};
    use crate::domain::commands::{CreateCompany, CreateEmployee};
    use crate::domain::events::register_mappers;

    fn setup() -> (InMemoryBackend, LocalEventBus, CompanyStores) {
        let backend = InMemoryBackend::new();
        let stores = CompanyStores::new();
        let bus = stores.attach(LocalEventBus::new(
            Arc::new(register_mappers(MapperRegistry::builder()).build()),
            Arc::new(backend.clone()),
            Arc::new(FixedClock(fixed_time(0))),
        ));
        (backend, bus, stores)
    }

    async fn create_company(bus: &LocalEventBus, stores: &CompanyStores, name: &str) -> Uuid {
        handle_create_company(
            &CreateCompany {
                identifier: None,
                name: name.to_string(),
                street: "Main Street 1".to_string(),
                city: "Stuttgart".to_string(),
                postal_code: "70173".to_string(),
                performed_by: Uuid::new_v4(),
            },
            bus,
            &stores.companies,
        )
        .await
        .unwrap()
        .snapshot
        .identifier
        .identifier
    }

    async fn employ(bus: &LocalEventBus, stores: &CompanyStores, company: Uuid, user: Uuid) -> Uuid {
        handle_create_employee(
            &CreateEmployee {
                identifier: None,
                company_identifier: company,
                user_identifier: user,
                roles: vec![EmployeeRole::ConstructionSiteManager],
                performed_by: Uuid::new_v4(),
            },
            bus,
            &stores.companies,
            &stores.employees,
        )
        .await
        .unwrap()
        .snapshot
        .identifier
        .identifier
    }

    #[tokio::test]
    async fn test_get_company_by_id_returns_view_with_version() {
        // Arrange
        let (backend, bus, stores) = setup();
        let company = create_company(&bus, &stores, "Acme").await;

        // Act
        let view = get_company_by_id(company, &backend, &stores).await.unwrap();

        // Assert
        assert_eq!(view.identifier, company);
        assert_eq!(view.name, "Acme");
        assert_eq!(view.version, 0);
        assert_eq!(view.created_date, fixed_time(0));
    }

    #[tokio::test]
    async fn test_get_company_by_id_returns_not_found_for_unknown_id() {
        // Arrange
        let (backend, _bus, stores) = setup();
        let unknown = Uuid::new_v4();

        // Act
        let result = get_company_by_id(unknown, &backend, &stores).await;

        // Assert
        assert!(matches!(result, Err(DomainError::AggregateNotFound(id)) if id == unknown));
    }

    #[tokio::test]
    async fn test_list_employees_of_company_returns_only_its_employees() {
        // Arrange
        let (backend, bus, stores) = setup();
        let acme = create_company(&bus, &stores, "Acme").await;
        let other = create_company(&bus, &stores, "Other").await;
        let first = employ(&bus, &stores, acme, Uuid::new_v4()).await;
        let second = employ(&bus, &stores, acme, Uuid::new_v4()).await;
        employ(&bus, &stores, other, Uuid::new_v4()).await;

        // Act
        let employees = list_employees_of_company(acme, &backend, &stores).await.unwrap();

        // Assert
        let mut expected = vec![first, second];
        expected.sort();
        assert_eq!(
            employees.iter().map(|e| e.identifier).collect::<Vec<_>>(),
            expected
        );
        assert!(employees.iter().all(|e| e.company_identifier == acme));
    }

    #[tokio::test]
    async fn test_employable_user_is_maintained_by_employee_commands() {
        // Arrange
        let (backend, bus, stores) = setup();
        let acme = create_company(&bus, &stores, "Acme").await;
        let user = Uuid::new_v4();

        // Act
        let employee = employ(&bus, &stores, acme, user).await;

        // Assert
        let view = get_employable_user(user, &backend, &stores).await.unwrap();
        assert_eq!(view.company_identifier, Some(acme));
        assert_eq!(view.company_name.as_deref(), Some("Acme"));
        assert_eq!(view.employee_identifier, Some(employee));
        assert_eq!(view.user_name, None);
        let listed = list_employable_users_of_company(acme, &backend, &stores)
            .await
            .unwrap();
        assert_eq!(listed, vec![view]);
    }

    #[tokio::test]
    async fn test_get_employable_user_returns_not_found_for_unknown_user() {
        // Arrange
        let (backend, _bus, stores) = setup();

        // Act
        let result = get_employable_user(Uuid::new_v4(), &backend, &stores).await;

        // Assert
        assert!(matches!(result, Err(DomainError::AggregateNotFound(_))));
    }
}
