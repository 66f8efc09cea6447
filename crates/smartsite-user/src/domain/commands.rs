//! Commands of the user context.

use uuid::Uuid;

/// Command to create a user.
#[derive(Debug, Clone)]
pub struct CreateUser {
    /// Identifier to use; a new one is generated if absent.
    pub identifier: Option<Uuid>,
    /// E-mail address.
    pub email: String,
    /// First name.
    pub first_name: String,
    /// Last name.
    pub last_name: String,
    /// The acting user.
    pub performed_by: Uuid,
}

/// Command to change the details of a user.
#[derive(Debug, Clone)]
pub struct UpdateUser {
    /// The user.
    pub identifier: Uuid,
    /// Version the change is based on.
    pub expected_version: i64,
    /// E-mail address.
    pub email: String,
    /// First name.
    pub first_name: String,
    /// Last name.
    pub last_name: String,
    /// Whether the user is locked.
    pub locked: bool,
    /// The acting user.
    pub performed_by: Uuid,
}

/// Command to complete the registration of a user.
#[derive(Debug, Clone, Copy)]
pub struct RegisterUser {
    /// The user.
    pub identifier: Uuid,
    /// Version the registration is based on.
    pub expected_version: i64,
    /// The acting user.
    pub performed_by: Uuid,
}

/// Command to delete a user.
#[derive(Debug, Clone, Copy)]
pub struct DeleteUser {
    /// The user.
    pub identifier: Uuid,
    /// Version the deletion is based on.
    pub expected_version: i64,
    /// The acting user.
    pub performed_by: Uuid,
}
