//! Restore wiring of the company context.

use std::sync::Arc;

use smartsite_core::restore::{RestoreDbStrategyDispatcher, RestoreStrategy, SnapshotRestoreStrategy};

use crate::application::CompanyStores;

/// One restore strategy per handler of the company context, in the order
/// the handlers see records online.
#[must_use]
pub fn restore_strategies(stores: &CompanyStores) -> Vec<Arc<dyn RestoreStrategy>> {
    stores
        .handlers()
        .into_iter()
        .map(|handler| Arc::new(SnapshotRestoreStrategy::new(handler)) as Arc<dyn RestoreStrategy>)
        .collect()
}

/// Adds the company context's strategies to `dispatcher`.
#[must_use]
pub fn register_restore_strategies(
    dispatcher: RestoreDbStrategyDispatcher,
    stores: &CompanyStores,
) -> RestoreDbStrategyDispatcher {
    restore_strategies(stores)
        .into_iter()
        .fold(dispatcher, RestoreDbStrategyDispatcher::with_strategy)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use smartsite_core::bus::LocalEventBus;
    use smartsite_core::consumer::ConsumerPoolConfig;
    use smartsite_core::error::DomainError;
    use smartsite_core::mapper::MapperRegistry;
    use smartsite_core::memory::InMemoryBackend;
    use smartsite_core::restore::ReplayRunner;
    use smartsite_core::retry::RetryPolicy;
    use smartsite_test_support::{SteppingClock, fixed_time};
    use uuid::Uuid;

    use super::*;
    use crate::application::command_handlers::{
        handle_create_company, handle_create_employee, handle_delete_employee,
        handle_update_company,
    };
    use crate::application::employable_user::EMPLOYABLE_USER_TABLE;
    use crate::domain::aggregates::{COMPANY_TABLE, EMPLOYEE_TABLE, EmployeeRole};
    use crate::domain::commands::{CreateCompany, CreateEmployee, DeleteEmployee, UpdateCompany};
    use crate::domain::events::register_mappers;

    async fn populate(backend: &InMemoryBackend) -> Result<(), DomainError> {
        let stores = CompanyStores::new();
        let bus = stores.attach(LocalEventBus::new(
            Arc::new(register_mappers(MapperRegistry::builder()).build()),
            Arc::new(backend.clone()),
            Arc::new(SteppingClock::new(fixed_time(0), chrono::Duration::minutes(1))),
        ));
        let user = Uuid::new_v4();
        let by = Uuid::new_v4();
        let mut companies = Vec::new();
        for name in ["Company One", "Company Two"] {
            let created = handle_create_company(
                &CreateCompany {
                    identifier: None,
                    name: name.to_string(),
                    street: "Main Street 1".to_string(),
                    city: "Stuttgart".to_string(),
                    postal_code: "70173".to_string(),
                    performed_by: by,
                },
                &bus,
                &stores.companies,
            )
            .await?;
            companies.push(created.snapshot);
        }
        let first = handle_create_employee(
            &CreateEmployee {
                identifier: None,
                company_identifier: companies[0].identifier.identifier,
                user_identifier: user,
                roles: vec![EmployeeRole::Foreman],
                performed_by: by,
            },
            &bus,
            &stores.companies,
            &stores.employees,
        )
        .await?;
        handle_delete_employee(
            &DeleteEmployee {
                identifier: first.snapshot.identifier.identifier,
                expected_version: first.version(),
                performed_by: by,
            },
            &bus,
            &stores.employees,
        )
        .await?;
        handle_create_employee(
            &CreateEmployee {
                identifier: None,
                company_identifier: companies[1].identifier.identifier,
                user_identifier: user,
                roles: vec![EmployeeRole::CompanyAdmin],
                performed_by: by,
            },
            &bus,
            &stores.companies,
            &stores.employees,
        )
        .await?;
        let renamed = &companies[1];
        handle_update_company(
            &UpdateCompany {
                identifier: renamed.identifier.identifier,
                expected_version: renamed.identifier.version,
                name: "Company Two AG".to_string(),
                street: renamed.street.clone(),
                city: renamed.city.clone(),
                postal_code: renamed.postal_code.clone(),
                performed_by: by,
            },
            &bus,
            &stores.companies,
        )
        .await?;
        Ok(())
    }

    fn runner(source: &InMemoryBackend, target: &InMemoryBackend) -> ReplayRunner {
        let dispatcher = register_restore_strategies(
            RestoreDbStrategyDispatcher::new(Arc::new(target.clone())),
            &CompanyStores::new(),
        );
        ReplayRunner::new(Arc::new(source.clone()), Arc::new(dispatcher))
            .with_pool(ConsumerPoolConfig {
                workers: 3,
                capacity: 8,
            })
            .with_retry(
                RetryPolicy::builder()
                    .max_retries(10)
                    .initial_delay(Duration::from_millis(1))
                    .build(),
            )
            .with_page_size(2)
    }

    #[test]
    fn test_restore_strategies_cover_every_handler() {
        // Arrange
        let stores = CompanyStores::new();

        // Act
        let strategies = restore_strategies(&stores);

        // Assert
        assert_eq!(strategies.len(), stores.handlers().len());
    }

    #[tokio::test]
    async fn test_replay_rebuilds_online_state() {
        // Arrange
        let source = InMemoryBackend::new();
        populate(&source).await.unwrap();
        let target = InMemoryBackend::new();

        // Act
        let report = runner(&source, &target).replay_from_beginning().await.unwrap();

        // Assert
        assert_eq!(report.dispatched, 6);
        assert_eq!(report.parked, 0);
        for table in [COMPANY_TABLE, EMPLOYEE_TABLE, EMPLOYABLE_USER_TABLE] {
            assert_eq!(
                target.rows(table).await.len(),
                source.rows(table).await.len(),
                "{table}"
            );
        }
        assert_eq!(target.rows(COMPANY_TABLE).await, source.rows(COMPANY_TABLE).await);
        assert_eq!(target.rows(EMPLOYEE_TABLE).await, source.rows(EMPLOYEE_TABLE).await);
        let restored: Vec<_> = target
            .rows(EMPLOYABLE_USER_TABLE)
            .await
            .into_iter()
            .map(|row| row.body)
            .collect();
        let online: Vec<_> = source
            .rows(EMPLOYABLE_USER_TABLE)
            .await
            .into_iter()
            .map(|row| row.body)
            .collect();
        assert_eq!(restored, online);
    }

    #[tokio::test]
    async fn test_replaying_twice_changes_nothing() {
        // Arrange
        let source = InMemoryBackend::new();
        populate(&source).await.unwrap();
        let target = InMemoryBackend::new();
        runner(&source, &target).replay_from_beginning().await.unwrap();
        let companies = target.rows(COMPANY_TABLE).await;
        let employees = target.rows(EMPLOYEE_TABLE).await;
        let employable_users = target.rows(EMPLOYABLE_USER_TABLE).await;

        // Act
        let report = runner(&source, &target).replay_from_beginning().await.unwrap();

        // Assert
        assert_eq!(report.parked, 0);
        assert_eq!(target.rows(COMPANY_TABLE).await, companies);
        assert_eq!(target.rows(EMPLOYEE_TABLE).await, employees);
        assert_eq!(target.rows(EMPLOYABLE_USER_TABLE).await, employable_users);
    }
}
