//! Restore wiring of the user context.

use std::sync::Arc;

use smartsite_core::restore::{RestoreDbStrategyDispatcher, RestoreStrategy, SnapshotRestoreStrategy};

use crate::application::UserStores;

/// One restore strategy per handler of the user context.
#[must_use]
pub fn restore_strategies(stores: &UserStores) -> Vec<Arc<dyn RestoreStrategy>> {
    stores
        .handlers()
        .into_iter()
        .map(|handler| Arc::new(SnapshotRestoreStrategy::new(handler)) as Arc<dyn RestoreStrategy>)
        .collect()
}

/// Adds the user context's strategies to `dispatcher`.
#[must_use]
pub fn register_restore_strategies(
    dispatcher: RestoreDbStrategyDispatcher,
    stores: &UserStores,
) -> RestoreDbStrategyDispatcher {
    restore_strategies(stores)
        .into_iter()
        .fold(dispatcher, RestoreDbStrategyDispatcher::with_strategy)
}
