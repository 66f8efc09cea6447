//! Command handlers for the company context.
//!
//! Every handler runs in its own unit of work: load the current snapshot,
//! apply the command through a [`CommandHandler`], emit the resulting event
//! on the bus and commit. Any failure rolls the whole unit of work back.

use smartsite_core::bus::LocalEventBus;
use smartsite_core::command::{CommandHandler, CommandOutcome};
use smartsite_core::error::DomainError;
use smartsite_core::event::EventName;
use smartsite_core::snapshot::AuditInfo;
use smartsite_core::uow::UnitOfWork;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::application::snapshot_stores::{CompanySnapshotStore, EmployeeSnapshotStore};
use crate::domain::aggregates::{
    COMPANY_TABLE, CompanySnapshot, EMPLOYEE_TABLE, EmployeeSnapshot,
};
use crate::domain::commands::{
    CreateCompany, CreateEmployee, DeleteCompany, DeleteEmployee, UpdateCompany, UpdateEmployee,
};

fn validate_company_name(name: &str) -> Result<(), DomainError> {
    if name.trim().is_empty() {
        return Err(DomainError::Validation(
            "company name must not be empty".into(),
        ));
    }
    Ok(())
}

async fn ensure_not_deleted(
    uow: &mut UnitOfWork,
    table: &str,
    identifier: Uuid,
) -> Result<(), DomainError> {
    if uow
        .transaction()
        .find_tombstone(table, identifier)
        .await?
        .is_some()
    {
        return Err(DomainError::PreconditionViolation(format!(
            "{identifier} was deleted and cannot be created again"
        )));
    }
    Ok(())
}

/// Handles the `CreateCompany` command.
///
/// # Errors
///
/// Returns `DomainError::Validation` for an empty name,
/// `DomainError::PreconditionViolation` if the identifier is taken, and
/// propagates persistence errors.
#[instrument(skip_all, fields(company = ?command.identifier))]
pub async fn handle_create_company(
    command: &CreateCompany,
    bus: &LocalEventBus,
    companies: &CompanySnapshotStore,
) -> Result<CommandOutcome<CompanySnapshot>, DomainError> {
    validate_company_name(&command.name)?;
    let identifier = command.identifier.unwrap_or_else(Uuid::now_v7);
    let mut uow = bus.begin().await?;
    let result = async {
        if companies.find(&mut uow, identifier).await?.is_some() {
            return Err(DomainError::PreconditionViolation(format!(
                "company {identifier} already exists"
            )));
        }
        ensure_not_deleted(&mut uow, COMPANY_TABLE, identifier).await?;
        let company = CompanySnapshot::new(
            identifier,
            command.name.clone(),
            command.street.clone(),
            command.city.clone(),
            command.postal_code.clone(),
            AuditInfo::created(command.performed_by, bus.clock().now()),
        );
        CommandHandler::of(company)
            .emit_event(EventName::Created)
            .to(bus, &mut uow)
            .await
    }
    .await;
    let outcome = bus.complete(uow, result).await?;
    info!(version = outcome.version(), "Company created");
    Ok(outcome)
}

/// Handles the `UpdateCompany` command. Publishes nothing if no detail
/// changes.
///
/// # Errors
///
/// Returns `DomainError::AggregateNotFound` for an unknown company and
/// `DomainError::ConcurrencyConflict` if `expected_version` is stale.
#[instrument(skip_all, fields(company = %command.identifier, expected_version = command.expected_version))]
pub async fn handle_update_company(
    command: &UpdateCompany,
    bus: &LocalEventBus,
    companies: &CompanySnapshotStore,
) -> Result<CommandOutcome<CompanySnapshot>, DomainError> {
    validate_company_name(&command.name)?;
    let mut uow = bus.begin().await?;
    let result = async {
        let current = companies.find_or_fail(&mut uow, command.identifier).await?;
        let now = bus.clock().now();
        CommandHandler::of(current)
            .assert_version_matches(command.expected_version)
            .update(|company| company.apply_update(command, now))
            .emit_event(EventName::Updated)
            .if_snapshot_was_changed()
            .to(bus, &mut uow)
            .await
    }
    .await;
    bus.complete(uow, result).await
}

/// Handles the `DeleteCompany` command.
///
/// # Errors
///
/// Returns `DomainError::PreconditionViolation` while the company still has
/// employees, plus the errors of [`handle_update_company`].
#[instrument(skip_all, fields(company = %command.identifier, expected_version = command.expected_version))]
pub async fn handle_delete_company(
    command: &DeleteCompany,
    bus: &LocalEventBus,
    companies: &CompanySnapshotStore,
) -> Result<CommandOutcome<CompanySnapshot>, DomainError> {
    let mut uow = bus.begin().await?;
    let result = async {
        let current = companies.find_or_fail(&mut uow, command.identifier).await?;
        let employees = uow
            .transaction()
            .find_by_field(
                EMPLOYEE_TABLE,
                "company_identifier",
                &command.identifier.to_string(),
            )
            .await?;
        CommandHandler::of(current)
            .assert_version_matches(command.expected_version)
            .check_precondition(
                |_| employees.is_empty(),
                "company with employees cannot be deleted",
            )
            .emit_tombstone()
            .to(bus, &mut uow)
            .await
    }
    .await;
    let outcome = bus.complete(uow, result).await?;
    info!("Company deleted");
    Ok(outcome)
}

/// Handles the `CreateEmployee` command.
///
/// # Errors
///
/// Returns `DomainError::Validation` for an empty role list,
/// `DomainError::AggregateNotFound` for an unknown company and
/// `DomainError::PreconditionViolation` if the user is already employed.
#[instrument(skip_all, fields(company = %command.company_identifier, user = %command.user_identifier))]
pub async fn handle_create_employee(
    command: &CreateEmployee,
    bus: &LocalEventBus,
    companies: &CompanySnapshotStore,
    employees: &EmployeeSnapshotStore,
) -> Result<CommandOutcome<EmployeeSnapshot>, DomainError> {
    if command.roles.is_empty() {
        return Err(DomainError::Validation(
            "employee needs at least one role".into(),
        ));
    }
    let identifier = command.identifier.unwrap_or_else(Uuid::now_v7);
    let mut uow = bus.begin().await?;
    let result = async {
        companies
            .find_or_fail(&mut uow, command.company_identifier)
            .await?;
        if employees.find(&mut uow, identifier).await?.is_some() {
            return Err(DomainError::PreconditionViolation(format!(
                "employee {identifier} already exists"
            )));
        }
        ensure_not_deleted(&mut uow, EMPLOYEE_TABLE, identifier).await?;
        let employments = uow
            .transaction()
            .find_by_field(
                EMPLOYEE_TABLE,
                "user_identifier",
                &command.user_identifier.to_string(),
            )
            .await?;
        let employee = EmployeeSnapshot::new(
            identifier,
            command.company_identifier,
            command.user_identifier,
            &command.roles,
            AuditInfo::created(command.performed_by, bus.clock().now()),
        );
        CommandHandler::of(employee)
            .check_precondition(
                |_| employments.is_empty(),
                "user is already employed by a company",
            )
            .emit_event(EventName::Created)
            .to(bus, &mut uow)
            .await
    }
    .await;
    bus.complete(uow, result).await
}

/// Handles the `UpdateEmployee` command.
///
/// # Errors
///
/// Returns `DomainError::AggregateNotFound` for an unknown employee and
/// `DomainError::ConcurrencyConflict` if `expected_version` is stale.
#[instrument(skip_all, fields(employee = %command.identifier, expected_version = command.expected_version))]
pub async fn handle_update_employee(
    command: &UpdateEmployee,
    bus: &LocalEventBus,
    employees: &EmployeeSnapshotStore,
) -> Result<CommandOutcome<EmployeeSnapshot>, DomainError> {
    let mut uow = bus.begin().await?;
    let result = async {
        let current = employees.find_or_fail(&mut uow, command.identifier).await?;
        let now = bus.clock().now();
        CommandHandler::of(current)
            .assert_version_matches(command.expected_version)
            .check_precondition(
                |_| !command.roles.is_empty(),
                "employee needs at least one role",
            )
            .update(|employee| employee.apply_update(command, now))
            .emit_event(EventName::Updated)
            .if_snapshot_was_changed()
            .to(bus, &mut uow)
            .await
    }
    .await;
    bus.complete(uow, result).await
}

/// Handles the `DeleteEmployee` command.
///
/// # Errors
///
/// Returns `DomainError::AggregateNotFound` for an unknown employee and
/// `DomainError::ConcurrencyConflict` if `expected_version` is stale.
#[instrument(skip_all, fields(employee = %command.identifier, expected_version = command.expected_version))]
pub async fn handle_delete_employee(
    command: &DeleteEmployee,
    bus: &LocalEventBus,
    employees: &EmployeeSnapshotStore,
) -> Result<CommandOutcome<EmployeeSnapshot>, DomainError> {
    let mut uow = bus.begin().await?;
    let result = async {
        let current = employees.find_or_fail(&mut uow, command.identifier).await?;
        CommandHandler::of(current)
            .assert_version_matches(command.expected_version)
            .emit_tombstone()
            .to(bus, &mut uow)
            .await
    }
    .await;
    bus.complete(uow, result).await
}
