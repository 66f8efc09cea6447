//! Command handling, snapshot store, queries and restore wiring.

use std::sync::Arc;

use smartsite_core::bus::LocalEventBus;
use smartsite_core::store::EventHandler;

use crate::application::snapshot_store::{UserProjector, UserSnapshotStore};

pub mod command_handlers;
pub mod query_handlers;
pub mod restore;
pub mod snapshot_store;

/// The event handlers owned by the user context.
#[derive(Clone)]
pub struct UserStores {
    /// User snapshots.
    pub users: Arc<UserSnapshotStore>,
}

impl Default for UserStores {
    fn default() -> Self {
        Self::new()
    }
}

impl UserStores {
    /// Creates the stores.
    #[must_use]
    pub fn new() -> Self {
        Self {
            users: Arc::new(UserSnapshotStore::new(UserProjector)),
        }
    }

    /// All handlers, in the order they see each record.
    #[must_use]
    pub fn handlers(&self) -> Vec<Arc<dyn EventHandler>> {
        vec![self.users.clone() as Arc<dyn EventHandler>]
    }

    /// Registers every handler on `bus`.
    #[must_use]
    pub fn attach(&self, bus: LocalEventBus) -> LocalEventBus {
        self.handlers()
            .into_iter()
            .fold(bus, LocalEventBus::with_handler)
    }
}
