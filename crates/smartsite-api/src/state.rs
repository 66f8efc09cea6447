//! Shared application state.

use std::sync::Arc;

use smartsite_company::application::CompanyStores;
use smartsite_core::bus::LocalEventBus;
use smartsite_core::clock::SharedClock;
use smartsite_core::mapper::MapperRegistry;
use smartsite_core::persistence::PersistenceBackend;
use smartsite_core::restore::{OffsetSynchronizationManager, RestoreDbStrategyDispatcher};
use smartsite_user::application::UserStores;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Persistence backend of the service.
    pub backend: Arc<dyn PersistenceBackend>,
    /// Event bus with every store of the service attached.
    pub bus: Arc<LocalEventBus>,
    /// Stores of the company context.
    pub companies: CompanyStores,
    /// Stores of the user context.
    pub users: UserStores,
    /// Offsets the online path has reached, guarding restore.
    pub offsets: Arc<OffsetSynchronizationManager>,
}

impl AppState {
    /// Wires the mappers and stores of all contexts onto one bus.
    #[must_use]
    pub fn new(backend: Arc<dyn PersistenceBackend>, clock: SharedClock) -> Self {
        let registry = smartsite_user::domain::events::register_mappers(
            smartsite_company::domain::events::register_mappers(MapperRegistry::builder()),
        )
        .build();
        let companies = CompanyStores::new();
        let users = UserStores::new();
        let bus = companies.attach(users.attach(LocalEventBus::new(
            Arc::new(registry),
            Arc::clone(&backend),
            clock,
        )));
        Self {
            backend,
            bus: Arc::new(bus),
            companies,
            users,
            offsets: Arc::new(OffsetSynchronizationManager::new()),
        }
    }

    /// A restore dispatcher writing to this state's backend through the
    /// same stores as the online path, held back by [`Self::offsets`].
    #[must_use]
    pub fn restore_dispatcher(&self) -> RestoreDbStrategyDispatcher {
        let dispatcher = RestoreDbStrategyDispatcher::new(Arc::clone(&self.backend))
            .with_offset_guard(Arc::clone(&self.offsets));
        let dispatcher =
            smartsite_user::application::restore::register_restore_strategies(dispatcher, &self.users);
        smartsite_company::application::restore::register_restore_strategies(
            dispatcher,
            &self.companies,
        )
    }
}
