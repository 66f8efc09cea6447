//! Snapshots of the company and employee aggregates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use smartsite_core::identifier::{AggregateIdentifier, AggregateType};
use smartsite_core::snapshot::{AuditInfo, VersionedSnapshot};

use crate::domain::commands::{UpdateCompany, UpdateEmployee};

/// Table of the company snapshots.
pub const COMPANY_TABLE: &str = "company";

/// Table of the employee snapshots.
pub const EMPLOYEE_TABLE: &str = "employee";

/// State of a company.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanySnapshot {
    /// Aggregate identifier, including the version.
    pub identifier: AggregateIdentifier,
    /// Display name.
    pub name: String,
    /// Street and house number.
    pub street: String,
    /// City.
    pub city: String,
    /// Postal code.
    pub postal_code: String,
    /// Auditing information.
    pub audit: AuditInfo,
}

impl CompanySnapshot {
    /// Creates an unsaved company.
    #[must_use]
    pub fn new(
        identifier: Uuid,
        name: String,
        street: String,
        city: String,
        postal_code: String,
        audit: AuditInfo,
    ) -> Self {
        Self {
            identifier: AggregateIdentifier::unsaved(AggregateType::Company, identifier),
            name,
            street,
            city,
            postal_code,
            audit,
        }
    }

    /// Applies the changes of `command`. Returns `self` unchanged, including
    /// its auditing information, if the command changes nothing.
    #[must_use]
    pub fn apply_update(self, command: &UpdateCompany, at: DateTime<Utc>) -> Self {
        if self.name == command.name
            && self.street == command.street
            && self.city == command.city
            && self.postal_code == command.postal_code
        {
            return self;
        }
        Self {
            name: command.name.clone(),
            street: command.street.clone(),
            city: command.city.clone(),
            postal_code: command.postal_code.clone(),
            audit: self.audit.touched(command.performed_by, at),
            ..self
        }
    }
}

impl VersionedSnapshot for CompanySnapshot {
    fn identifier(&self) -> AggregateIdentifier {
        self.identifier
    }

    fn root_context_identifier(&self) -> Uuid {
        self.identifier.identifier
    }

    fn last_modified_date(&self) -> DateTime<Utc> {
        self.audit.last_modified_date
    }

    fn with_version(self, version: i64) -> Self {
        Self {
            identifier: self.identifier.with_version(version),
            ..self
        }
    }
}

/// Role of an employee within its company.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EmployeeRole {
    /// Administers the company.
    CompanyAdmin,
    /// Represents the company towards projects.
    CompanyRepresentative,
    /// Manages construction sites.
    ConstructionSiteManager,
    /// Works on site.
    Foreman,
}

/// Employment of a user at a company. The company is the root context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmployeeSnapshot {
    /// Aggregate identifier, including the version.
    pub identifier: AggregateIdentifier,
    /// Company the user is employed at.
    pub company_identifier: Uuid,
    /// The employed user.
    pub user_identifier: Uuid,
    /// Roles, sorted and free of duplicates.
    pub roles: Vec<EmployeeRole>,
    /// Auditing information.
    pub audit: AuditInfo,
}

impl EmployeeSnapshot {
    /// Creates an unsaved employee.
    #[must_use]
    pub fn new(
        identifier: Uuid,
        company_identifier: Uuid,
        user_identifier: Uuid,
        roles: &[EmployeeRole],
        audit: AuditInfo,
    ) -> Self {
        Self {
            identifier: AggregateIdentifier::unsaved(AggregateType::Employee, identifier),
            company_identifier,
            user_identifier,
            roles: normalize_roles(roles),
            audit,
        }
    }

    /// Replaces the roles. Returns `self` unchanged if the roles are the same.
    #[must_use]
    pub fn apply_update(self, command: &UpdateEmployee, at: DateTime<Utc>) -> Self {
        let roles = normalize_roles(&command.roles);
        if roles == self.roles {
            return self;
        }
        Self {
            roles,
            audit: self.audit.touched(command.performed_by, at),
            ..self
        }
    }
}

impl VersionedSnapshot for EmployeeSnapshot {
    fn identifier(&self) -> AggregateIdentifier {
        self.identifier
    }

    fn root_context_identifier(&self) -> Uuid {
        self.company_identifier
    }

    fn last_modified_date(&self) -> DateTime<Utc> {
        self.audit.last_modified_date
    }

    fn with_version(self, version: i64) -> Self {
        Self {
            identifier: self.identifier.with_version(version),
            ..self
        }
    }
}

fn normalize_roles(roles: &[EmployeeRole]) -> Vec<EmployeeRole> {
    let mut roles = roles.to_vec();
    roles.sort_unstable();
    roles.dedup();
    roles
}

#[cfg(test)]
mod tests {
    use smartsite_test_support::fixed_time;

    use super::*;

    fn company() -> CompanySnapshot {
        let by = Uuid::new_v4();
        CompanySnapshot::new(
            Uuid::new_v4(),
            "Acme".to_string(),
            "Main Street 1".to_string(),
            "Stuttgart".to_string(),
            "70173".to_string(),
            AuditInfo::created(by, fixed_time(0)),
        )
    }

    #[test]
    fn test_company_update_without_changes_keeps_audit() {
        // Arrange
        let current = company();
        let command = UpdateCompany {
            identifier: current.identifier.identifier,
            expected_version: 0,
            name: current.name.clone(),
            street: current.street.clone(),
            city: current.city.clone(),
            postal_code: current.postal_code.clone(),
            performed_by: Uuid::new_v4(),
        };

        // Act
        let updated = current.clone().apply_update(&command, fixed_time(5));

        // Assert
        assert_eq!(updated, current);
    }

    #[test]
    fn test_company_update_touches_audit() {
        // Arrange
        let current = company();
        let by = Uuid::new_v4();
        let command = UpdateCompany {
            identifier: current.identifier.identifier,
            expected_version: 0,
            name: "Acme AG".to_string(),
            street: current.street.clone(),
            city: current.city.clone(),
            postal_code: current.postal_code.clone(),
            performed_by: by,
        };

        // Act
        let updated = current.apply_update(&command, fixed_time(5));

        // Assert
        assert_eq!(updated.name, "Acme AG");
        assert_eq!(updated.audit.last_modified_by, by);
        assert_eq!(updated.last_modified_date(), fixed_time(5));
    }

    #[test]
    fn test_employee_root_context_is_company() {
        // Arrange
        let company_id = Uuid::new_v4();

        // Act
        let employee = EmployeeSnapshot::new(
            Uuid::new_v4(),
            company_id,
            Uuid::new_v4(),
            &[EmployeeRole::Foreman, EmployeeRole::CompanyAdmin, EmployeeRole::Foreman],
            AuditInfo::created(Uuid::new_v4(), fixed_time(0)),
        );

        // Assert
        assert_eq!(employee.root_context_identifier(), company_id);
        assert_eq!(
            employee.roles,
            vec![EmployeeRole::CompanyAdmin, EmployeeRole::Foreman]
        );
    }
}
