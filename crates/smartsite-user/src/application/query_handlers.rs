//! Query handlers for the user context.

use chrono::{DateTime, Utc};
use serde::Serialize;
use smartsite_core::error::DomainError;
use smartsite_core::persistence::PersistenceBackend;
use smartsite_core::uow::UnitOfWork;
use tracing::warn;
use uuid::Uuid;

use crate::application::snapshot_store::UserSnapshotStore;
use crate::domain::aggregates::UserSnapshot;

/// Read-only view of a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserView {
    /// The user identifier.
    pub identifier: Uuid,
    /// Current version, used as `ETag`.
    pub version: i64,
    /// E-mail address.
    pub email: String,
    /// First name.
    pub first_name: String,
    /// Last name.
    pub last_name: String,
    /// Whether the user finished registration.
    pub registered: bool,
    /// Whether the user is locked.
    pub locked: bool,
    /// When the user was created.
    pub created_date: DateTime<Utc>,
}

impl From<UserSnapshot> for UserView {
    fn from(user: UserSnapshot) -> Self {
        Self {
            identifier: user.identifier.identifier,
            version: user.identifier.version,
            email: user.email,
            first_name: user.first_name,
            last_name: user.last_name,
            registered: user.registered,
            locked: user.locked,
            created_date: user.audit.created_date,
        }
    }
}

/// Retrieves a user by its identifier.
///
/// # Errors
///
/// Returns `DomainError::AggregateNotFound` if there is no such user.
pub async fn get_user_by_id(
    user_id: Uuid,
    backend: &dyn PersistenceBackend,
    users: &UserSnapshotStore,
) -> Result<UserView, DomainError> {
    let mut uow = UnitOfWork::begin(backend).await?;
    let result = users.find_or_fail(&mut uow, user_id).await;
    if let Err(error) = uow.rollback().await {
        warn!(%error, "Rollback of read-only unit of work failed");
    }
    result.map(UserView::from)
}
