//! Command handling, snapshot stores, queries and restore wiring.

use std::sync::Arc;

use smartsite_core::bus::LocalEventBus;
use smartsite_core::store::EventHandler;

use crate::application::employable_user::EmployableUserProjection;
use crate::application::snapshot_stores::{
    CompanyProjector, CompanySnapshotStore, EmployeeProjector, EmployeeSnapshotStore,
};

pub mod command_handlers;
pub mod employable_user;
pub mod query_handlers;
pub mod restore;
pub mod snapshot_stores;

/// The event handlers owned by the company context.
#[derive(Clone)]
pub struct CompanyStores {
    /// Company snapshots.
    pub companies: Arc<CompanySnapshotStore>,
    /// Employee snapshots.
    pub employees: Arc<EmployeeSnapshotStore>,
    /// Employable user projection.
    pub employable_users: Arc<EmployableUserProjection>,
}

impl Default for CompanyStores {
    fn default() -> Self {
        Self::new()
    }
}

impl CompanyStores {
    /// Creates the stores.
    #[must_use]
    pub fn new() -> Self {
        Self {
            companies: Arc::new(CompanySnapshotStore::new(CompanyProjector)),
            employees: Arc::new(EmployeeSnapshotStore::new(EmployeeProjector)),
            employable_users: Arc::new(EmployableUserProjection::new()),
        }
    }

    /// All handlers, in the order they see each record.
    #[must_use]
    pub fn handlers(&self) -> Vec<Arc<dyn EventHandler>> {
        vec![
            self.companies.clone() as Arc<dyn EventHandler>,
            self.employees.clone(),
            self.employable_users.clone(),
        ]
    }

    /// Registers every handler on `bus`.
    #[must_use]
    pub fn attach(&self, bus: LocalEventBus) -> LocalEventBus {
        self.handlers()
            .into_iter()
            .fold(bus, LocalEventBus::with_handler)
    }
}
