//! Rebuilding the database from the event log on startup.

use std::sync::Arc;
use std::time::Duration;

use smartsite_core::error::DomainError;
use smartsite_core::persistence::EventLog;
use smartsite_core::restore::{OffsetSynchronizationManager, ReplayReport, ReplayRunner};
use smartsite_core::transaction::BusinessTransactionAwareListener;
use tracing::{info, warn};

use crate::config::ServiceConfig;
use crate::state::AppState;

/// Replays `log` from the first offset into the stores of `state`.
///
/// The online path of this service writes straight to `log`, so the offsets
/// it has reached are read from `log` itself while the replay runs. Records
/// are held until their offset shows up there, and every business
/// transaction is restored as one unit once its finish marker is read.
///
/// # Errors
///
/// Returns an error if the log cannot be read or a worker dies. Records that
/// keep failing are parked and only reported in the returned counts.
pub async fn restore_database(
    log: Arc<dyn EventLog>,
    state: &AppState,
    config: &ServiceConfig,
) -> Result<ReplayReport, DomainError> {
    info!(workers = config.consumer_workers, "Restoring database from the event log");
    state.offsets.follow(log.as_ref()).await?;
    let follower = tokio::spawn(follow_log(
        Arc::clone(&log),
        Arc::clone(&state.offsets),
        config.restore_offset_poll,
    ));
    let dispatcher = state
        .restore_dispatcher()
        .with_offset_poll(config.restore_offset_poll);
    let runner = ReplayRunner::new(log, Arc::new(BusinessTransactionAwareListener::new(dispatcher)))
        .with_pool(config.pool_config())
        .with_retry(config.retry_policy());
    let result = runner.replay_from_beginning().await;
    follower.abort();
    let report = result?;
    if report.parked > 0 {
        for parked in runner.dead_letters().list().await {
            warn!(
                partition = parked.record.partition,
                offset = parked.record.offset,
                error = %parked.error,
                "Record could not be restored"
            );
        }
    }
    Ok(report)
}

async fn follow_log(
    log: Arc<dyn EventLog>,
    offsets: Arc<OffsetSynchronizationManager>,
    poll: Duration,
) {
    loop {
        tokio::time::sleep(poll).await;
        if let Err(error) = offsets.follow(log.as_ref()).await {
            warn!(%error, "Could not read online offsets from the event log");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use smartsite_company::application::command_handlers::{
        handle_create_company, handle_create_employee,
    };
    use smartsite_company::application::employable_user::EMPLOYABLE_USER_TABLE;
    use smartsite_company::domain::aggregates::{COMPANY_TABLE, EMPLOYEE_TABLE, EmployeeRole};
    use smartsite_company::domain::commands::{CreateCompany, CreateEmployee};
    use smartsite_core::memory::InMemoryBackend;
    use smartsite_test_support::{FixedClock, fixed_time};
    use smartsite_user::application::command_handlers::handle_create_user;
    use smartsite_user::domain::aggregates::USER_TABLE;
    use smartsite_user::domain::commands::CreateUser;
    use uuid::Uuid;

    use super::*;

    fn config() -> ServiceConfig {
        ServiceConfig::from_lookup(|key| match key {
            "DATABASE_URL" => Some("postgres://unused".to_string()),
            "CONSUMER_WORKERS" => Some("2".to_string()),
            "RETRY_MAX_ATTEMPTS" => Some("10".to_string()),
            "RETRY_INITIAL_DELAY_MS" => Some("1".to_string()),
            _ => None,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_restore_rebuilds_every_context_from_the_log() {
        // Arrange
        let online = InMemoryBackend::new();
        let state = AppState::new(Arc::new(online.clone()), Arc::new(FixedClock(fixed_time(0))));
        let user = handle_create_user(
            &CreateUser {
                identifier: None,
                email: "ada@example.com".into(),
                first_name: "Ada".into(),
                last_name: "Lovelace".into(),
                performed_by: Uuid::nil(),
            },
            &state.bus,
            &state.users.users,
        )
        .await
        .unwrap();
        let company = handle_create_company(
            &CreateCompany {
                identifier: None,
                name: "Bau AG".into(),
                street: "Hauptstr. 1".into(),
                city: "Berlin".into(),
                postal_code: "10115".into(),
                performed_by: Uuid::nil(),
            },
            &state.bus,
            &state.companies.companies,
        )
        .await
        .unwrap();
        handle_create_employee(
            &CreateEmployee {
                identifier: None,
                company_identifier: company.snapshot.identifier.identifier,
                user_identifier: user.snapshot.identifier.identifier,
                roles: vec![EmployeeRole::Foreman],
                performed_by: Uuid::nil(),
            },
            &state.bus,
            &state.companies.companies,
            &state.companies.employees,
        )
        .await
        .unwrap();

        let restored = InMemoryBackend::new();
        let restored_state =
            AppState::new(Arc::new(restored.clone()), Arc::new(FixedClock(fixed_time(0))));

        // Act
        let report = restore_database(Arc::new(online.clone()), &restored_state, &config())
            .await
            .unwrap();

        // Assert
        assert_eq!(report.dispatched, 3);
        assert_eq!(report.parked, 0);
        for table in [USER_TABLE, COMPANY_TABLE, EMPLOYEE_TABLE, EMPLOYABLE_USER_TABLE] {
            let expected: Vec<_> = online.rows(table).await.into_iter().map(|r| r.body).collect();
            let actual: Vec<_> = restored.rows(table).await.into_iter().map(|r| r.body).collect();
            assert_eq!(actual, expected, "table {table}");
        }
    }

    #[tokio::test]
    async fn test_restore_of_an_empty_log_does_nothing() {
        // Arrange
        let backend = InMemoryBackend::new();
        let state = AppState::new(Arc::new(backend.clone()), Arc::new(FixedClock(fixed_time(0))));

        // Act
        let report = restore_database(Arc::new(backend.clone()), &state, &config())
            .await
            .unwrap();

        // Assert
        assert_eq!(report, ReplayReport::default());
    }

    #[tokio::test]
    async fn test_restore_is_guarded_by_offsets_read_from_the_log() {
        // Arrange
        let online = InMemoryBackend::with_partitions(1);
        let state = AppState::new(Arc::new(online.clone()), Arc::new(FixedClock(fixed_time(0))));
        handle_create_user(
            &CreateUser {
                identifier: None,
                email: "ada@example.com".into(),
                first_name: "Ada".into(),
                last_name: "Lovelace".into(),
                performed_by: Uuid::nil(),
            },
            &state.bus,
            &state.users.users,
        )
        .await
        .unwrap();
        let restored = InMemoryBackend::new();
        let restored_state =
            AppState::new(Arc::new(restored.clone()), Arc::new(FixedClock(fixed_time(0))));

        // Act
        let report = restore_database(Arc::new(online.clone()), &restored_state, &config())
            .await
            .unwrap();

        // Assert
        assert_eq!(report.processed, 1);
        assert_eq!(report.parked, 0);
        assert_eq!(restored_state.offsets.max_offset(0).unwrap(), Some(1));
    }
}
