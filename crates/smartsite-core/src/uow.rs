//! The unit of work threaded through command handling and record processing.

use tracing::debug;
use uuid::Uuid;

use crate::cache::SnapshotEntityCache;
use crate::error::DomainError;
use crate::event::EventRecord;
use crate::persistence::{PendingRecord, PersistenceBackend, PersistenceTransaction, ProjectionRow};

/// The business transaction a unit of work is currently part of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusinessTransactionContext {
    /// Identifier shared by every record of the business transaction.
    pub identifier: Uuid,
    /// Root context the business transaction was started for.
    pub root_context_identifier: Uuid,
    /// Number of nested starts that have not been finished yet.
    pub depth: usize,
}

/// One persistence transaction together with its entity cache.
///
/// Everything a command or an inbound record writes goes through exactly one
/// unit of work and becomes visible atomically on [`UnitOfWork::commit`].
pub struct UnitOfWork {
    id: Uuid,
    tx: Box<dyn PersistenceTransaction>,
    cache: SnapshotEntityCache,
    business_transaction: Option<BusinessTransactionContext>,
    appended: Vec<PendingRecord>,
}

impl std::fmt::Debug for UnitOfWork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("id", &self.id)
            .field("cached", &self.cache.len())
            .field("business_transaction", &self.business_transaction)
            .field("appended", &self.appended.len())
            .finish_non_exhaustive()
    }
}

impl UnitOfWork {
    /// Opens a unit of work on the backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot begin a transaction.
    pub async fn begin(backend: &dyn PersistenceBackend) -> Result<Self, DomainError> {
        let tx = backend.begin().await?;
        let id = Uuid::now_v7();
        debug!(unit_of_work = %id, "Unit of work started");
        Ok(Self {
            id,
            tx,
            cache: SnapshotEntityCache::new(),
            business_transaction: None,
            appended: Vec::new(),
        })
    }

    /// Identifier of this unit of work, used for log correlation.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The underlying persistence transaction.
    pub fn transaction(&mut self) -> &mut dyn PersistenceTransaction {
        &mut *self.tx
    }

    /// The entity cache of this unit of work.
    #[must_use]
    pub fn cache(&self) -> &SnapshotEntityCache {
        &self.cache
    }

    /// Loads a row through the entity cache.
    ///
    /// # Errors
    ///
    /// Propagates persistence errors.
    pub async fn find_cached(
        &mut self,
        table: &str,
        identifier: Uuid,
    ) -> Result<Option<ProjectionRow>, DomainError> {
        let Self { tx, cache, .. } = self;
        let tx: &mut dyn PersistenceTransaction = tx.as_mut();
        cache
            .get(table, identifier, move || {
                let tx = tx;
                tx.find(table, identifier)
            })
            .await
    }

    /// Evicts a cached row after it was written.
    pub fn evict(&mut self, table: &str, identifier: Uuid) {
        self.cache.remove(table, identifier);
    }

    /// The business transaction this unit of work is part of.
    #[must_use]
    pub fn business_transaction(&self) -> Option<BusinessTransactionContext> {
        self.business_transaction
    }

    pub(crate) fn business_transaction_mut(&mut self) -> Option<&mut BusinessTransactionContext> {
        self.business_transaction.as_mut()
    }

    pub(crate) fn set_business_transaction(&mut self, context: Option<BusinessTransactionContext>) {
        self.business_transaction = context;
    }

    /// Appends a record to the event log, stamped with the active business
    /// transaction and partitioned by its root.
    ///
    /// # Errors
    ///
    /// Propagates persistence errors.
    pub async fn append(&mut self, record: &EventRecord) -> Result<(), DomainError> {
        let entry = PendingRecord {
            transaction_identifier: self.business_transaction.map(|bt| bt.identifier),
            partition_key: self
                .business_transaction
                .map(|bt| bt.root_context_identifier),
            record: record.clone(),
        };
        self.tx.append(&entry).await?;
        self.appended.push(entry);
        Ok(())
    }

    /// Records appended so far.
    #[must_use]
    pub fn appended(&self) -> &[PendingRecord] {
        &self.appended
    }

    /// Commits the transaction and returns the records it appended.
    ///
    /// # Errors
    ///
    /// Returns an error if the commit fails; nothing of this unit of work is
    /// then visible.
    pub async fn commit(self) -> Result<Vec<PendingRecord>, DomainError> {
        let Self {
            id, tx, appended, ..
        } = self;
        tx.commit().await?;
        debug!(unit_of_work = %id, records = appended.len(), "Unit of work committed");
        Ok(appended)
    }

    /// Discards every write of this unit of work.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails to roll back.
    pub async fn rollback(self) -> Result<(), DomainError> {
        let id = self.id;
        self.tx.rollback().await?;
        debug!(unit_of_work = %id, "Unit of work rolled back");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    use super::*;
    use crate::event::EventName;
    use crate::identifier::{AggregateIdentifier, AggregateType, MessageKey};
    use crate::memory::InMemoryBackend;

    #[tokio::test]
    async fn test_find_cached_loads_once_per_unit_of_work() {
        // Arrange
        let backend = InMemoryBackend::new();
        let id = Uuid::new_v4();
        let mut uow = UnitOfWork::begin(&backend).await.unwrap();

        // Act
        let first = uow.find_cached("company", id).await.unwrap();
        let second = uow.find_cached("company", id).await.unwrap();

        // Assert
        assert!(first.is_none());
        assert!(second.is_none());
        assert_eq!(uow.cache().load_count(), 1);
    }

    #[tokio::test]
    async fn test_append_stamps_business_transaction() {
        // Arrange
        let backend = InMemoryBackend::new();
        let id = Uuid::new_v4();
        let bt = Uuid::new_v4();
        let key = MessageKey::new(id, AggregateIdentifier::new(AggregateType::Company, id, 0));
        let at = Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap();
        let mut uow = UnitOfWork::begin(&backend).await.unwrap();
        uow.set_business_transaction(Some(BusinessTransactionContext {
            identifier: bt,
            root_context_identifier: id,
            depth: 1,
        }));

        // Act
        uow.append(&EventRecord::new(key, EventName::Created, at, json!({})))
            .await
            .unwrap();
        let committed = uow.commit().await.unwrap();

        // Assert
        assert_eq!(committed.len(), 1);
        assert_eq!(committed[0].transaction_identifier, Some(bt));
        assert_eq!(backend.log().await[0].transaction_identifier, Some(bt));
    }
}
