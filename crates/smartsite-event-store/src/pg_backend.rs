//! `PostgreSQL` implementation of [`PersistenceBackend`] and [`EventLog`].
//!
//! Every projection table has the same layout, so table names are passed in
//! at runtime. They are checked with [`validate_identifier`] before being
//! formatted into SQL; values always travel as bind parameters.
//!
//! Every write to a row or tombstone first takes a transaction-scoped advisory
//! lock on `(table, identifier)`. Inserts and updates also refuse identifiers
//! that carry a tombstone, so a deletion committed by a concurrent
//! transaction cannot be undone by a write that was racing it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::debug;
use uuid::Uuid;

use smartsite_core::error::DomainError;
use smartsite_core::event::{ConsumerRecord, EventName, EventRecord};
use smartsite_core::identifier::{AggregateIdentifier, AggregateType, MessageKey};
use smartsite_core::memory::DEFAULT_PARTITIONS;
use smartsite_core::persistence::{
    EventLog, PendingRecord, PersistenceBackend, PersistenceTransaction, ProjectionRow, Tombstone,
    validate_identifier,
};

use crate::schema::{EVENT_LOG_TABLE, LOG_COLUMNS, ROW_COLUMNS, TOMBSTONE_TABLE};

fn db_error(error: sqlx::Error) -> DomainError {
    DomainError::Infrastructure(format!("database error: {error}"))
}

fn decode_row(row: &PgRow) -> Result<ProjectionRow, DomainError> {
    Ok(ProjectionRow {
        identifier: row.try_get("identifier").map_err(db_error)?,
        root_context_identifier: row.try_get("root_context_identifier").map_err(db_error)?,
        version: row.try_get("version").map_err(db_error)?,
        last_modified: row.try_get("last_modified").map_err(db_error)?,
        body: row.try_get("body").map_err(db_error)?,
    })
}

fn decode_record(row: &PgRow) -> Result<ConsumerRecord, DomainError> {
    let partition: i32 = row.try_get("partition_number").map_err(db_error)?;
    let aggregate_type: String = row.try_get("aggregate_type").map_err(db_error)?;
    let event_name: String = row.try_get("event_name").map_err(db_error)?;
    let aggregate_identifier = AggregateIdentifier::new(
        aggregate_type.parse::<AggregateType>()?,
        row.try_get("aggregate_identifier").map_err(db_error)?,
        row.try_get("aggregate_version").map_err(db_error)?,
    );
    let timestamp: DateTime<Utc> = row.try_get("occurred_at").map_err(db_error)?;
    Ok(ConsumerRecord {
        partition: u32::try_from(partition).map_err(|_| {
            DomainError::Infrastructure(format!("negative partition in event log: {partition}"))
        })?,
        offset: row.try_get("log_offset").map_err(db_error)?,
        transaction_identifier: row.try_get("transaction_identifier").map_err(db_error)?,
        record: EventRecord {
            key: MessageKey::new(
                row.try_get("root_context_identifier").map_err(db_error)?,
                aggregate_identifier,
            ),
            name: event_name.parse::<EventName>()?,
            timestamp,
            payload: row.try_get("payload").map_err(db_error)?,
        },
    })
}

/// PostgreSQL-backed persistence for projections and the event log.
#[derive(Debug, Clone)]
pub struct PgBackend {
    pool: PgPool,
    partitions: u32,
}

impl PgBackend {
    /// Creates a backend whose log has [`DEFAULT_PARTITIONS`] partitions.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self::with_partitions(pool, DEFAULT_PARTITIONS)
    }

    /// Creates a backend whose log has `partitions` partitions.
    #[must_use]
    pub fn with_partitions(pool: PgPool, partitions: u32) -> Self {
        Self {
            pool,
            partitions: partitions.max(1),
        }
    }

    /// The underlying connection pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl PersistenceBackend for PgBackend {
    async fn begin(&self) -> Result<Box<dyn PersistenceTransaction>, DomainError> {
        let tx = self.pool.begin().await.map_err(db_error)?;
        Ok(Box::new(PgTransaction {
            tx,
            partitions: self.partitions,
        }))
    }
}

#[async_trait]
impl EventLog for PgBackend {
    async fn read(&self, from_offset: i64, limit: usize) -> Result<Vec<ConsumerRecord>, DomainError> {
        let sql = format!(
            "SELECT {LOG_COLUMNS} FROM {EVENT_LOG_TABLE} \
             WHERE log_offset >= $1 ORDER BY log_offset LIMIT $2"
        );
        let rows = sqlx::query(&sql)
            .bind(from_offset)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
        rows.iter().map(decode_record).collect()
    }

    async fn latest_offset(&self) -> Result<Option<i64>, DomainError> {
        let sql = format!("SELECT MAX(log_offset) AS latest FROM {EVENT_LOG_TABLE}");
        let row = sqlx::query(&sql)
            .fetch_one(&self.pool)
            .await
            .map_err(db_error)?;
        row.try_get("latest").map_err(db_error)
    }
}

/// An open `PostgreSQL` transaction.
pub struct PgTransaction {
    tx: Transaction<'static, Postgres>,
    partitions: u32,
}

impl PgTransaction {
    async fn current_version(&mut self, table: &str, identifier: Uuid) -> Result<i64, DomainError> {
        Ok(self
            .find(table, identifier)
            .await?
            .map_or(-1, |row| row.version))
    }

    async fn lock_identifier(&mut self, table: &str, identifier: Uuid) -> Result<(), DomainError> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(format!("{table}:{identifier}"))
            .execute(&mut *self.tx)
            .await
            .map_err(db_error)?;
        Ok(())
    }

    /// Conflict reported when a guarded write touched no row.
    async fn conflict(
        &mut self,
        table: &str,
        identifier: Uuid,
        expected: i64,
    ) -> Result<DomainError, DomainError> {
        let actual = match self.find_tombstone(table, identifier).await? {
            Some(tombstone) => tombstone.version,
            None => self.current_version(table, identifier).await?,
        };
        Ok(DomainError::ConcurrencyConflict {
            aggregate_id: identifier,
            expected,
            actual,
        })
    }
}

#[async_trait]
impl PersistenceTransaction for PgTransaction {
    async fn find(
        &mut self,
        table: &str,
        identifier: Uuid,
    ) -> Result<Option<ProjectionRow>, DomainError> {
        let table = validate_identifier(table)?;
        let sql = format!("SELECT {ROW_COLUMNS} FROM {table} WHERE identifier = $1");
        let row = sqlx::query(&sql)
            .bind(identifier)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_error)?;
        row.as_ref().map(decode_row).transpose()
    }

    async fn find_by_field(
        &mut self,
        table: &str,
        field: &str,
        value: &str,
    ) -> Result<Vec<ProjectionRow>, DomainError> {
        let table = validate_identifier(table)?;
        let field = validate_identifier(field)?;
        let sql = format!(
            "SELECT {ROW_COLUMNS} FROM {table} WHERE body ->> $1 = $2 ORDER BY identifier"
        );
        let rows = sqlx::query(&sql)
            .bind(field)
            .bind(value)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(db_error)?;
        rows.iter().map(decode_row).collect()
    }

    async fn insert(&mut self, table: &str, row: &ProjectionRow) -> Result<(), DomainError> {
        let table = validate_identifier(table)?;
        self.lock_identifier(table, row.identifier).await?;
        let sql = format!(
            "INSERT INTO {table} ({ROW_COLUMNS}) SELECT $1, $2, $3, $4, $5 \
             WHERE NOT EXISTS (SELECT 1 FROM {TOMBSTONE_TABLE} \
             WHERE table_name = $6 AND identifier = $1) \
             ON CONFLICT (identifier) DO NOTHING"
        );
        let result = sqlx::query(&sql)
            .bind(row.identifier)
            .bind(row.root_context_identifier)
            .bind(row.version)
            .bind(row.last_modified)
            .bind(&row.body)
            .bind(table)
            .execute(&mut *self.tx)
            .await
            .map_err(db_error)?;
        if result.rows_affected() == 0 {
            return Err(self.conflict(table, row.identifier, -1).await?);
        }
        Ok(())
    }

    async fn update(
        &mut self,
        table: &str,
        row: &ProjectionRow,
        expected_version: i64,
    ) -> Result<(), DomainError> {
        let table = validate_identifier(table)?;
        self.lock_identifier(table, row.identifier).await?;
        let sql = format!(
            "UPDATE {table} SET root_context_identifier = $2, version = $3, \
             last_modified = $4, body = $5 WHERE identifier = $1 AND version = $6 \
             AND NOT EXISTS (SELECT 1 FROM {TOMBSTONE_TABLE} \
             WHERE table_name = $7 AND identifier = $1)"
        );
        let result = sqlx::query(&sql)
            .bind(row.identifier)
            .bind(row.root_context_identifier)
            .bind(row.version)
            .bind(row.last_modified)
            .bind(&row.body)
            .bind(expected_version)
            .bind(table)
            .execute(&mut *self.tx)
            .await
            .map_err(db_error)?;
        if result.rows_affected() == 0 {
            return Err(self.conflict(table, row.identifier, expected_version).await?);
        }
        Ok(())
    }

    async fn delete(&mut self, table: &str, identifier: Uuid) -> Result<bool, DomainError> {
        let table = validate_identifier(table)?;
        self.lock_identifier(table, identifier).await?;
        let sql = format!("DELETE FROM {table} WHERE identifier = $1");
        let result = sqlx::query(&sql)
            .bind(identifier)
            .execute(&mut *self.tx)
            .await
            .map_err(db_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_tombstone(
        &mut self,
        table: &str,
        tombstone: &Tombstone,
    ) -> Result<(), DomainError> {
        let table = validate_identifier(table)?;
        self.lock_identifier(table, tombstone.identifier).await?;
        let sql = format!(
            "INSERT INTO {TOMBSTONE_TABLE} (table_name, identifier, version, deleted_at) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (table_name, identifier) \
             DO UPDATE SET version = EXCLUDED.version, deleted_at = EXCLUDED.deleted_at"
        );
        sqlx::query(&sql)
            .bind(table)
            .bind(tombstone.identifier)
            .bind(tombstone.version)
            .bind(tombstone.deleted_at)
            .execute(&mut *self.tx)
            .await
            .map_err(db_error)?;
        Ok(())
    }

    async fn find_tombstone(
        &mut self,
        table: &str,
        identifier: Uuid,
    ) -> Result<Option<Tombstone>, DomainError> {
        let table = validate_identifier(table)?;
        let sql = format!(
            "SELECT identifier, version, deleted_at FROM {TOMBSTONE_TABLE} \
             WHERE table_name = $1 AND identifier = $2"
        );
        let row = sqlx::query(&sql)
            .bind(table)
            .bind(identifier)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_error)?;
        row.map(|row| {
            Ok(Tombstone {
                identifier: row.try_get("identifier").map_err(db_error)?,
                version: row.try_get("version").map_err(db_error)?,
                deleted_at: row.try_get("deleted_at").map_err(db_error)?,
            })
        })
        .transpose()
    }

    async fn append(&mut self, entry: &PendingRecord) -> Result<(), DomainError> {
        let record = &entry.record;
        let partition = i32::try_from(entry.partition(self.partitions)).map_err(|_| {
            DomainError::Infrastructure("partition does not fit the event log".to_string())
        })?;
        let sql = format!(
            "INSERT INTO {EVENT_LOG_TABLE} (partition_number, transaction_identifier, \
             root_context_identifier, aggregate_type, aggregate_identifier, aggregate_version, \
             event_name, occurred_at, payload) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"
        );
        sqlx::query(&sql)
            .bind(partition)
            .bind(entry.transaction_identifier)
            .bind(record.key.root_context_identifier)
            .bind(record.key.aggregate_identifier.aggregate_type.as_str())
            .bind(record.key.aggregate_identifier.identifier)
            .bind(record.key.aggregate_identifier.version)
            .bind(record.name.as_str())
            .bind(record.timestamp)
            .bind(&record.payload)
            .execute(&mut *self.tx)
            .await
            .map_err(db_error)?;
        debug!(kind = %record.kind(), partition, "Event appended to log");
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), DomainError> {
        self.tx.commit().await.map_err(db_error)
    }

    async fn rollback(self: Box<Self>) -> Result<(), DomainError> {
        self.tx.rollback().await.map_err(db_error)
    }
}
