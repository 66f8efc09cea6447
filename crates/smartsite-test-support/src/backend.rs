//! Persistence backends that fail on purpose.

use async_trait::async_trait;
use smartsite_core::error::DomainError;
use smartsite_core::memory::InMemoryBackend;
use smartsite_core::persistence::{
    PendingRecord, PersistenceBackend, PersistenceTransaction, ProjectionRow, Tombstone,
};
use uuid::Uuid;

/// Where a [`FailingBackend`] fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePoint {
    /// Opening a transaction fails.
    Begin,
    /// Every write succeeds but the commit fails and discards them.
    Commit,
}

/// An in-memory backend that fails at a configured point.
#[derive(Debug, Clone)]
pub struct FailingBackend {
    inner: InMemoryBackend,
    failure: FailurePoint,
}

impl FailingBackend {
    /// Wraps `inner`, failing at `failure`.
    #[must_use]
    pub fn new(inner: InMemoryBackend, failure: FailurePoint) -> Self {
        Self { inner, failure }
    }

    /// The wrapped backend, to inspect what was (not) committed.
    #[must_use]
    pub fn inner(&self) -> &InMemoryBackend {
        &self.inner
    }
}

#[async_trait]
impl PersistenceBackend for FailingBackend {
    async fn begin(&self) -> Result<Box<dyn PersistenceTransaction>, DomainError> {
        match self.failure {
            FailurePoint::Begin => Err(DomainError::Infrastructure(
                "connection refused".to_string(),
            )),
            FailurePoint::Commit => Ok(Box::new(FailingTransaction {
                inner: self.inner.begin().await?,
            })),
        }
    }
}

struct FailingTransaction {
    inner: Box<dyn PersistenceTransaction>,
}

#[async_trait]
impl PersistenceTransaction for FailingTransaction {
    async fn find(
        &mut self,
        table: &str,
        identifier: Uuid,
    ) -> Result<Option<ProjectionRow>, DomainError> {
        self.inner.find(table, identifier).await
    }

    async fn find_by_field(
        &mut self,
        table: &str,
        field: &str,
        value: &str,
    ) -> Result<Vec<ProjectionRow>, DomainError> {
        self.inner.find_by_field(table, field, value).await
    }

    async fn insert(&mut self, table: &str, row: &ProjectionRow) -> Result<(), DomainError> {
        self.inner.insert(table, row).await
    }

    async fn update(
        &mut self,
        table: &str,
        row: &ProjectionRow,
        expected_version: i64,
    ) -> Result<(), DomainError> {
        self.inner.update(table, row, expected_version).await
    }

    async fn delete(&mut self, table: &str, identifier: Uuid) -> Result<bool, DomainError> {
        self.inner.delete(table, identifier).await
    }

    async fn insert_tombstone(
        &mut self,
        table: &str,
        tombstone: &Tombstone,
    ) -> Result<(), DomainError> {
        self.inner.insert_tombstone(table, tombstone).await
    }

    async fn find_tombstone(
        &mut self,
        table: &str,
        identifier: Uuid,
    ) -> Result<Option<Tombstone>, DomainError> {
        self.inner.find_tombstone(table, identifier).await
    }

    async fn append(&mut self, entry: &PendingRecord) -> Result<(), DomainError> {
        self.inner.append(entry).await
    }

    async fn commit(self: Box<Self>) -> Result<(), DomainError> {
        self.inner.rollback().await?;
        Err(DomainError::Infrastructure(
            "commit failed: connection reset".to_string(),
        ))
    }

    async fn rollback(self: Box<Self>) -> Result<(), DomainError> {
        self.inner.rollback().await
    }
}
