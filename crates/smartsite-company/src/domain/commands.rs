//! Commands of the company context.
//!
//! `expected_version` carries the version the client last saw (the `ETag`
//! of the resource); a mismatch fails the command with a concurrency
//! conflict.

use uuid::Uuid;

use crate::domain::aggregates::EmployeeRole;

/// Command to create a company.
#[derive(Debug, Clone)]
pub struct CreateCompany {
    /// Identifier to use; a new one is generated if absent.
    pub identifier: Option<Uuid>,
    /// Display name.
    pub name: String,
    /// Street and house number.
    pub street: String,
    /// City.
    pub city: String,
    /// Postal code.
    pub postal_code: String,
    /// The acting user.
    pub performed_by: Uuid,
}

/// Command to change the details of a company.
#[derive(Debug, Clone)]
pub struct UpdateCompany {
    /// The company.
    pub identifier: Uuid,
    /// Version the change is based on.
    pub expected_version: i64,
    /// Display name.
    pub name: String,
    /// Street and house number.
    pub street: String,
    /// City.
    pub city: String,
    /// Postal code.
    pub postal_code: String,
    /// The acting user.
    pub performed_by: Uuid,
}

/// Command to delete a company without employees.
#[derive(Debug, Clone, Copy)]
pub struct DeleteCompany {
    /// The company.
    pub identifier: Uuid,
    /// Version the deletion is based on.
    pub expected_version: i64,
    /// The acting user.
    pub performed_by: Uuid,
}

/// Command to employ a user at a company.
#[derive(Debug, Clone)]
pub struct CreateEmployee {
    /// Identifier to use; a new one is generated if absent.
    pub identifier: Option<Uuid>,
    /// The employing company.
    pub company_identifier: Uuid,
    /// The user to employ.
    pub user_identifier: Uuid,
    /// Roles of the employee.
    pub roles: Vec<EmployeeRole>,
    /// The acting user.
    pub performed_by: Uuid,
}

/// Command to replace the roles of an employee.
#[derive(Debug, Clone)]
pub struct UpdateEmployee {
    /// The employee.
    pub identifier: Uuid,
    /// Version the change is based on.
    pub expected_version: i64,
    /// New roles.
    pub roles: Vec<EmployeeRole>,
    /// The acting user.
    pub performed_by: Uuid,
}

/// Command to end an employment.
#[derive(Debug, Clone, Copy)]
pub struct DeleteEmployee {
    /// The employee.
    pub identifier: Uuid,
    /// Version the deletion is based on.
    pub expected_version: i64,
    /// The acting user.
    pub performed_by: Uuid,
}
