//! Snapshot of the user aggregate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use smartsite_core::identifier::{AggregateIdentifier, AggregateType};
use smartsite_core::snapshot::{AuditInfo, VersionedSnapshot};

use crate::domain::commands::UpdateUser;

/// Table of the user snapshots.
pub const USER_TABLE: &str = "app_user";

/// State of a user. A user is its own root context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSnapshot {
    /// Aggregate identifier, including the version.
    pub identifier: AggregateIdentifier,
    /// E-mail address, unique among users.
    pub email: String,
    /// First name.
    pub first_name: String,
    /// Last name.
    pub last_name: String,
    /// Whether the user finished registration.
    pub registered: bool,
    /// Whether the user is locked.
    pub locked: bool,
    /// Auditing information.
    pub audit: AuditInfo,
}

impl UserSnapshot {
    /// Creates an unsaved, unregistered user.
    #[must_use]
    pub fn new(
        identifier: Uuid,
        email: String,
        first_name: String,
        last_name: String,
        audit: AuditInfo,
    ) -> Self {
        Self {
            identifier: AggregateIdentifier::unsaved(AggregateType::User, identifier),
            email,
            first_name,
            last_name,
            registered: false,
            locked: false,
            audit,
        }
    }

    /// Applies the changes of `command`. Returns `self` unchanged if the
    /// command changes nothing.
    #[must_use]
    pub fn apply_update(self, command: &UpdateUser, at: DateTime<Utc>) -> Self {
        if self.email == command.email
            && self.first_name == command.first_name
            && self.last_name == command.last_name
            && self.locked == command.locked
        {
            return self;
        }
        Self {
            email: command.email.clone(),
            first_name: command.first_name.clone(),
            last_name: command.last_name.clone(),
            locked: command.locked,
            audit: self.audit.touched(command.performed_by, at),
            ..self
        }
    }

    /// Marks the user as registered.
    #[must_use]
    pub fn register(self, performed_by: Uuid, at: DateTime<Utc>) -> Self {
        Self {
            registered: true,
            audit: self.audit.touched(performed_by, at),
            ..self
        }
    }
}

impl VersionedSnapshot for UserSnapshot {
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

#[cfg(test)]
mod tests {
    use smartsite_test_support::fixed_time;

    use super::*;

    fn user() -> UserSnapshot {
        UserSnapshot::new(
            Uuid::new_v4(),
            "max@example.com".to_string(),
            "Max".to_string(),
            "Mustermann".to_string(),
            AuditInfo::created(Uuid::new_v4(), fixed_time(0)),
        )
    }

    #[test]
    fn test_new_user_is_unregistered_and_unlocked() {
        // Act
        let user = user();

        // Assert
        assert!(!user.registered);
        assert!(!user.locked);
        assert_eq!(user.root_context_identifier(), user.identifier.identifier);
        assert_eq!(user.identifier.version, -1);
    }

    #[test]
    fn test_update_without_changes_keeps_audit() {
        // Arrange
        let current = user();
        let command = UpdateUser {
            identifier: current.identifier.identifier,
            expected_version: 0,
            email: current.email.clone(),
            first_name: current.first_name.clone(),
            last_name: current.last_name.clone(),
            locked: false,
            performed_by: Uuid::new_v4(),
        };

        // Act
        let updated = current.clone().apply_update(&command, fixed_time(9));

        // Assert
        assert_eq!(updated, current);
    }

    #[test]
    fn test_register_touches_audit() {
        // Arrange
        let by = Uuid::new_v4();

        // Act
        let registered = user().register(by, fixed_time(4));

        // Assert
        assert!(registered.registered);
        assert_eq!(registered.audit.last_modified_by, by);
        assert_eq!(registered.last_modified_date(), fixed_time(4));
    }
}
