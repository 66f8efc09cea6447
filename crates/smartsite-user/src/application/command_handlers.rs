//! Command handlers for the user context.
//!
//! Each handler loads the current snapshot in a fresh unit of work, applies
//! the command through a [`CommandHandler`] and commits. Any failure rolls
//! the unit of work back.

use smartsite_core::bus::LocalEventBus;
use smartsite_core::command::{CommandHandler, CommandOutcome};
use smartsite_core::error::DomainError;
use smartsite_core::event::EventName;
use smartsite_core::snapshot::AuditInfo;
use smartsite_core::uow::UnitOfWork;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::application::snapshot_store::UserSnapshotStore;
use crate::domain::aggregates::{USER_TABLE, UserSnapshot};
use crate::domain::commands::{CreateUser, DeleteUser, RegisterUser, UpdateUser};

fn validate_user(email: &str, first_name: &str, last_name: &str) -> Result<(), DomainError> {
    if !email.contains('@') {
        return Err(DomainError::Validation(format!(
            "invalid e-mail address: {email}"
        )));
    }
    if first_name.trim().is_empty() || last_name.trim().is_empty() {
        return Err(DomainError::Validation(
            "first and last name must not be empty".into(),
        ));
    }
    Ok(())
}

/// Returns `true` if a user other than `identifier` uses `email`.
async fn email_taken(
    uow: &mut UnitOfWork,
    email: &str,
    identifier: Uuid,
) -> Result<bool, DomainError> {
    Ok(uow
        .transaction()
        .find_by_field(USER_TABLE, "email", email)
        .await?
        .iter()
        .any(|row| row.identifier != identifier))
}

/// Handles the `CreateUser` command.
///
/// # Errors
///
/// Returns `DomainError::Validation` for an invalid e-mail address or name,
/// `DomainError::PreconditionViolation` if the identifier or e-mail address
/// is taken or the user was deleted before.
#[instrument(skip_all, fields(user = ?command.identifier))]
pub async fn handle_create_user(
    command: &CreateUser,
    bus: &LocalEventBus,
    users: &UserSnapshotStore,
) -> Result<CommandOutcome<UserSnapshot>, DomainError> {
    validate_user(&command.email, &command.first_name, &command.last_name)?;
    let identifier = command.identifier.unwrap_or_else(Uuid::now_v7);
    let mut uow = bus.begin().await?;
    let result = async {
        if users.find(&mut uow, identifier).await?.is_some() {
            return Err(DomainError::PreconditionViolation(format!(
                "user {identifier} already exists"
            )));
        }
        if uow
            .transaction()
            .find_tombstone(USER_TABLE, identifier)
            .await?
            .is_some()
        {
            return Err(DomainError::PreconditionViolation(format!(
                "{identifier} was deleted and cannot be created again"
            )));
        }
        let taken = email_taken(&mut uow, &command.email, identifier).await?;
        let user = UserSnapshot::new(
            identifier,
            command.email.clone(),
            command.first_name.clone(),
            command.last_name.clone(),
            AuditInfo::created(command.performed_by, bus.clock().now()),
        );
        CommandHandler::of(user)
            .check_precondition(|_| !taken, "e-mail address is already in use")
            .emit_event(EventName::Created)
            .to(bus, &mut uow)
            .await
    }
    .await;
    let outcome = bus.complete(uow, result).await?;
    info!(version = outcome.version(), "User created");
    Ok(outcome)
}

/// Handles the `UpdateUser` command. Publishes nothing if no detail changes.
///
/// # Errors
///
/// Returns `DomainError::AggregateNotFound` for an unknown user,
/// `DomainError::ConcurrencyConflict` if `expected_version` is stale and
/// `DomainError::PreconditionViolation` if the new e-mail address is taken.
#[instrument(skip_all, fields(user = %command.identifier, expected_version = command.expected_version))]
pub async fn handle_update_user(
    command: &UpdateUser,
    bus: &LocalEventBus,
    users: &UserSnapshotStore,
) -> Result<CommandOutcome<UserSnapshot>, DomainError> {
    validate_user(&command.email, &command.first_name, &command.last_name)?;
    let mut uow = bus.begin().await?;
    let result = async {
        let current = users.find_or_fail(&mut uow, command.identifier).await?;
        let taken = current.email != command.email
            && email_taken(&mut uow, &command.email, command.identifier).await?;
        let now = bus.clock().now();
        CommandHandler::of(current)
            .assert_version_matches(command.expected_version)
            .check_precondition(|_| !taken, "e-mail address is already in use")
            .update(|user| user.apply_update(command, now))
            .emit_event(EventName::Updated)
            .if_snapshot_was_changed()
            .to(bus, &mut uow)
            .await
    }
    .await;
    bus.complete(uow, result).await
}

/// Handles the `RegisterUser` command.
///
/// # Errors
///
/// Returns `DomainError::PreconditionViolation` if the user is registered
/// already, plus the errors of [`handle_update_user`].
#[instrument(skip_all, fields(user = %command.identifier, expected_version = command.expected_version))]
pub async fn handle_register_user(
    command: &RegisterUser,
    bus: &LocalEventBus,
    users: &UserSnapshotStore,
) -> Result<CommandOutcome<UserSnapshot>, DomainError> {
    let mut uow = bus.begin().await?;
    let result = async {
        let current = users.find_or_fail(&mut uow, command.identifier).await?;
        let now = bus.clock().now();
        CommandHandler::of(current)
            .assert_version_matches(command.expected_version)
            .check_precondition(|user| !user.registered, "user is already registered")
            .update(|user| user.register(command.performed_by, now))
            .emit_event(EventName::Registered)
            .to(bus, &mut uow)
            .await
    }
    .await;
    let outcome = bus.complete(uow, result).await?;
    info!(version = outcome.version(), "User registered");
    Ok(outcome)
}

/// Handles the `DeleteUser` command by publishing a tombstone.
///
/// # Errors
///
/// Returns `DomainError::AggregateNotFound` for an unknown user and
/// `DomainError::ConcurrencyConflict` if `expected_version` is stale.
#[instrument(skip_all, fields(user = %command.identifier, expected_version = command.expected_version))]
pub async fn handle_delete_user(
    command: &DeleteUser,
    bus: &LocalEventBus,
    users: &UserSnapshotStore,
) -> Result<CommandOutcome<UserSnapshot>, DomainError> {
    let mut uow = bus.begin().await?;
    let result = async {
        let current = users.find_or_fail(&mut uow, command.identifier).await?;
        CommandHandler::of(current)
            .assert_version_matches(command.expected_version)
            .emit_tombstone()
            .to(bus, &mut uow)
            .await
    }
    .await;
    let outcome = bus.complete(uow, result).await?;
    info!("User deleted");
    Ok(outcome)
}
