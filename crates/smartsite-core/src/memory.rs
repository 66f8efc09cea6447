//! In-memory persistence backend and event log.
//!
//! Writes are staged per transaction and validated against the committed
//! state on commit, so two transactions racing on the same row behave like
//! the version-guarded updates of the PostgreSQL backend: the second commit
//! fails with [`DomainError::ConcurrencyConflict`]. A row whose identifier
//! carries a tombstone in the same table can no longer be written, even when
//! the tombstone was committed after the write was staged.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::error::DomainError;
use crate::event::ConsumerRecord;
use crate::identifier::NEW_AGGREGATE_VERSION;
use crate::persistence::{
    EventLog, PendingRecord, PersistenceBackend, PersistenceTransaction, ProjectionRow, Tombstone,
    validate_identifier,
};

/// Default number of log partitions.
pub const DEFAULT_PARTITIONS: u32 = 4;

#[derive(Debug)]
struct MemoryState {
    tables: HashMap<String, HashMap<Uuid, ProjectionRow>>,
    tombstones: HashMap<String, HashMap<Uuid, Tombstone>>,
    log: Vec<ConsumerRecord>,
    next_offset: i64,
}

impl Default for MemoryState {
    fn default() -> Self {
        Self {
            tables: HashMap::new(),
            tombstones: HashMap::new(),
            log: Vec::new(),
            next_offset: 1,
        }
    }
}

impl MemoryState {
    fn row(&self, table: &str, identifier: Uuid) -> Option<&ProjectionRow> {
        self.tables.get(table).and_then(|rows| rows.get(&identifier))
    }
}

/// Persistence backend and event log kept in process memory.
#[derive(Debug, Clone)]
pub struct InMemoryBackend {
    state: Arc<Mutex<MemoryState>>,
    partitions: u32,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBackend {
    /// Creates an empty backend with [`DEFAULT_PARTITIONS`] partitions.
    #[must_use]
    pub fn new() -> Self {
        Self::with_partitions(DEFAULT_PARTITIONS)
    }

    /// Creates an empty backend whose log has `partitions` partitions.
    #[must_use]
    pub fn with_partitions(partitions: u32) -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState::default())),
            partitions: partitions.max(1),
        }
    }

    /// Number of log partitions.
    #[must_use]
    pub fn partitions(&self) -> u32 {
        self.partitions
    }

    /// Committed row of a table.
    pub async fn row(&self, table: &str, identifier: Uuid) -> Option<ProjectionRow> {
        self.state.lock().await.row(table, identifier).cloned()
    }

    /// All committed rows of a table, ordered by identifier.
    pub async fn rows(&self, table: &str) -> Vec<ProjectionRow> {
        let state = self.state.lock().await;
        let mut rows: Vec<_> = state
            .tables
            .get(table)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default();
        rows.sort_by_key(|row| row.identifier);
        rows
    }

    /// Committed tombstone marker of an aggregate.
    pub async fn tombstone(&self, table: &str, identifier: Uuid) -> Option<Tombstone> {
        self.state
            .lock()
            .await
            .tombstones
            .get(table)
            .and_then(|markers| markers.get(&identifier))
            .copied()
    }

    /// The complete committed event log.
    pub async fn log(&self) -> Vec<ConsumerRecord> {
        self.state.lock().await.log.clone()
    }

    /// Appends committed records to the log directly, as an upstream
    /// producer would.
    pub async fn publish(&self, entries: &[PendingRecord]) {
        let mut state = self.state.lock().await;
        for entry in entries {
            let offset = state.next_offset;
            state.next_offset += 1;
            state.log.push(ConsumerRecord {
                partition: entry.partition(self.partitions),
                offset,
                transaction_identifier: entry.transaction_identifier,
                record: entry.record.clone(),
            });
        }
    }
}

#[async_trait]
impl PersistenceBackend for InMemoryBackend {
    async fn begin(&self) -> Result<Box<dyn PersistenceTransaction>, DomainError> {
        Ok(Box::new(InMemoryTransaction {
            backend: self.clone(),
            rows: HashMap::new(),
            tombstones: HashMap::new(),
            log: Vec::new(),
        }))
    }
}

#[async_trait]
impl EventLog for InMemoryBackend {
    async fn read(&self, from_offset: i64, limit: usize) -> Result<Vec<ConsumerRecord>, DomainError> {
        let state = self.state.lock().await;
        Ok(state
            .log
            .iter()
            .filter(|record| record.offset >= from_offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn latest_offset(&self) -> Result<Option<i64>, DomainError> {
        Ok(self.state.lock().await.log.last().map(|record| record.offset))
    }
}

#[derive(Debug)]
struct StagedRow {
    /// Committed version when the row was first touched by the transaction.
    base: Option<i64>,
    value: Option<ProjectionRow>,
}

/// Transaction of an [`InMemoryBackend`].
#[derive(Debug)]
pub struct InMemoryTransaction {
    backend: InMemoryBackend,
    rows: HashMap<(String, Uuid), StagedRow>,
    tombstones: HashMap<(String, Uuid), Tombstone>,
    log: Vec<PendingRecord>,
}

impl InMemoryTransaction {
    async fn visible(&self, table: &str, identifier: Uuid) -> Option<ProjectionRow> {
        if let Some(staged) = self.rows.get(&(table.to_string(), identifier)) {
            return staged.value.clone();
        }
        self.backend.row(table, identifier).await
    }

    async fn stage(&mut self, table: &str, identifier: Uuid, value: Option<ProjectionRow>) {
        let key = (table.to_string(), identifier);
        if let Some(staged) = self.rows.get_mut(&key) {
            staged.value = value;
            return;
        }
        let base = self.backend.row(table, identifier).await.map(|row| row.version);
        self.rows.insert(key, StagedRow { base, value });
    }

    /// Fails when `identifier` already carries a tombstone in `table`.
    async fn reject_buried(
        &mut self,
        table: &str,
        identifier: Uuid,
        expected: i64,
    ) -> Result<(), DomainError> {
        match self.find_tombstone(table, identifier).await? {
            Some(tombstone) => Err(DomainError::ConcurrencyConflict {
                aggregate_id: identifier,
                expected,
                actual: tombstone.version,
            }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl PersistenceTransaction for InMemoryTransaction {
    async fn find(
        &mut self,
        table: &str,
        identifier: Uuid,
    ) -> Result<Option<ProjectionRow>, DomainError> {
        validate_identifier(table)?;
        Ok(self.visible(table, identifier).await)
    }

    async fn find_by_field(
        &mut self,
        table: &str,
        field: &str,
        value: &str,
    ) -> Result<Vec<ProjectionRow>, DomainError> {
        validate_identifier(table)?;
        validate_identifier(field)?;
        let committed = self.backend.rows(table).await;
        let mut rows: Vec<ProjectionRow> = committed
            .into_iter()
            .filter(|row| !self.rows.contains_key(&(table.to_string(), row.identifier)))
            .chain(
                self.rows
                    .iter()
                    .filter(|((t, _), _)| t == table)
                    .filter_map(|(_, staged)| staged.value.clone()),
            )
            .filter(|row| row.body.get(field).and_then(serde_json::Value::as_str) == Some(value))
            .collect();
        rows.sort_by_key(|row| row.identifier);
        Ok(rows)
    }

    async fn insert(&mut self, table: &str, row: &ProjectionRow) -> Result<(), DomainError> {
        validate_identifier(table)?;
        self.reject_buried(table, row.identifier, NEW_AGGREGATE_VERSION)
            .await?;
        if let Some(existing) = self.visible(table, row.identifier).await {
            return Err(DomainError::ConcurrencyConflict {
                aggregate_id: row.identifier,
                expected: NEW_AGGREGATE_VERSION,
                actual: existing.version,
            });
        }
        self.stage(table, row.identifier, Some(row.clone())).await;
        Ok(())
    }

    async fn update(
        &mut self,
        table: &str,
        row: &ProjectionRow,
        expected_version: i64,
    ) -> Result<(), DomainError> {
        validate_identifier(table)?;
        self.reject_buried(table, row.identifier, expected_version)
            .await?;
        let actual = self
            .visible(table, row.identifier)
            .await
            .map_or(NEW_AGGREGATE_VERSION, |existing| existing.version);
        if actual != expected_version {
            return Err(DomainError::ConcurrencyConflict {
                aggregate_id: row.identifier,
                expected: expected_version,
                actual,
            });
        }
        self.stage(table, row.identifier, Some(row.clone())).await;
        Ok(())
    }

    async fn delete(&mut self, table: &str, identifier: Uuid) -> Result<bool, DomainError> {
        validate_identifier(table)?;
        if self.visible(table, identifier).await.is_none() {
            return Ok(false);
        }
        self.stage(table, identifier, None).await;
        Ok(true)
    }

    async fn insert_tombstone(
        &mut self,
        table: &str,
        tombstone: &Tombstone,
    ) -> Result<(), DomainError> {
        validate_identifier(table)?;
        self.tombstones
            .insert((table.to_string(), tombstone.identifier), *tombstone);
        Ok(())
    }

    async fn find_tombstone(
        &mut self,
        table: &str,
        identifier: Uuid,
    ) -> Result<Option<Tombstone>, DomainError> {
        validate_identifier(table)?;
        if let Some(staged) = self.tombstones.get(&(table.to_string(), identifier)) {
            return Ok(Some(*staged));
        }
        Ok(self.backend.tombstone(table, identifier).await)
    }

    async fn append(&mut self, entry: &PendingRecord) -> Result<(), DomainError> {
        self.log.push(entry.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), DomainError> {
        let Self {
            backend,
            rows,
            tombstones,
            log,
        } = *self;
        let mut state = backend.state.lock().await;

        for ((table, identifier), staged) in &rows {
            let committed = state.row(table, *identifier).map(|row| row.version);
            if committed != staged.base {
                return Err(DomainError::ConcurrencyConflict {
                    aggregate_id: *identifier,
                    expected: staged.base.unwrap_or(NEW_AGGREGATE_VERSION),
                    actual: committed.unwrap_or(NEW_AGGREGATE_VERSION),
                });
            }
            if staged.value.is_some()
                && let Some(tombstone) = state
                    .tombstones
                    .get(table)
                    .and_then(|markers| markers.get(identifier))
            {
                return Err(DomainError::ConcurrencyConflict {
                    aggregate_id: *identifier,
                    expected: staged.base.unwrap_or(NEW_AGGREGATE_VERSION),
                    actual: tombstone.version,
                });
            }
        }

        for ((table, identifier), staged) in rows {
            let table_rows = state.tables.entry(table).or_default();
            match staged.value {
                Some(row) => {
                    table_rows.insert(identifier, row);
                }
                None => {
                    table_rows.remove(&identifier);
                }
            }
        }
        for ((table, identifier), tombstone) in tombstones {
            state
                .tombstones
                .entry(table)
                .or_default()
                .insert(identifier, tombstone);
        }
        for entry in log {
            let offset = state.next_offset;
            state.next_offset += 1;
            state.log.push(ConsumerRecord {
                partition: entry.partition(backend.partitions),
                offset,
                transaction_identifier: entry.transaction_identifier,
                record: entry.record,
            });
        }
        debug!(next_offset = state.next_offset, "In-memory transaction committed");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), DomainError> {
        Ok(())
    }
}
