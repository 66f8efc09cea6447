//! Unit-of-work scoped memoization of projection rows.

use std::collections::HashMap;
use std::future::Future;

use uuid::Uuid;

use crate::error::DomainError;
use crate::persistence::ProjectionRow;

/// Caches projection rows for exactly one unit of work.
///
/// A cache is owned by a single [`UnitOfWork`](crate::uow::UnitOfWork) and
/// is dropped with it, so it needs no synchronization and stale rows never
/// leak into unrelated operations. Absent rows are cached as well.
#[derive(Debug, Default)]
pub struct SnapshotEntityCache {
    entries: HashMap<(String, Uuid), Option<ProjectionRow>>,
    loads: usize,
}

impl SnapshotEntityCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached row, loading it with `loader` on the first access.
    ///
    /// # Errors
    ///
    /// Propagates loader errors; failed loads are not cached.
    pub async fn get<F, Fut>(
        &mut self,
        table: &str,
        identifier: Uuid,
        loader: F,
    ) -> Result<Option<ProjectionRow>, DomainError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<ProjectionRow>, DomainError>>,
    {
        let key = (table.to_string(), identifier);
        if let Some(cached) = self.entries.get(&key) {
            return Ok(cached.clone());
        }
        let loaded = loader().await?;
        self.loads += 1;
        self.entries.insert(key, loaded.clone());
        Ok(loaded)
    }

    /// Evicts an entry so that the next access reloads it.
    pub fn remove(&mut self, table: &str, identifier: Uuid) {
        self.entries.remove(&(table.to_string(), identifier));
    }

    /// Seeds an entry without loading it.
    pub fn populate(&mut self, table: &str, identifier: Uuid, row: Option<ProjectionRow>) {
        self.entries.insert((table.to_string(), identifier), row);
    }

    /// Number of cached entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of loads performed through [`SnapshotEntityCache::get`].
    #[must_use]
    pub fn load_count(&self) -> usize {
        self.loads
    }
}
