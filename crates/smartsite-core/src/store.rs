//! Snapshot stores: materialize aggregate state from event records.
//!
//! The ordering rule lives in [`SnapshotStore::update_internal`]. Applied
//! state per aggregate is decided by the `(version, timestamp)` pair carried
//! in the record, never by arrival order, and a deleted aggregate stays
//! deleted. Together this makes the store idempotent and independent of the
//! delivery order.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry::metrics::Counter;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::error::DomainError;
use crate::event::EventRecord;
use crate::identifier::MessageKey;
use crate::persistence::Tombstone;
use crate::snapshot::{SnapshotProjector, VersionedSnapshot};
use crate::uow::UnitOfWork;

/// Where a record handed to a store comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSource {
    /// Emitted by a local command handler in the same unit of work.
    Online,
    /// Read back from the log during restore or replay.
    Restore,
}

/// Why a record was not applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// The stored state is at the same or a newer `(version, timestamp)`.
    Stale,
    /// The aggregate was deleted before.
    AggregateDeleted,
    /// A deletion of an aggregate that is not stored.
    AlreadyAbsent,
}

impl DiscardReason {
    /// Short name used in logs and metric attributes.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stale => "stale",
            Self::AggregateDeleted => "aggregate_deleted",
            Self::AlreadyAbsent => "already_absent",
        }
    }
}

/// Result of handing a record to an [`EventHandler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// A new row was written.
    Created,
    /// An existing row was replaced.
    Updated,
    /// A row was deleted.
    Deleted,
    /// The record was not applied.
    Discarded(DiscardReason),
}

/// Anything that applies event records inside a unit of work.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Name of the handler, used in logs.
    fn name(&self) -> &'static str;

    /// Returns `true` if the handler wants the record.
    fn handles_message(&self, key: &MessageKey, record: &EventRecord) -> bool;

    /// Applies the record.
    async fn handle_message(
        &self,
        record: &EventRecord,
        source: EventSource,
        uow: &mut UnitOfWork,
    ) -> Result<ApplyOutcome, DomainError>;
}

/// Generic snapshot store over a domain [`SnapshotProjector`].
pub struct SnapshotStore<P: SnapshotProjector> {
    projector: P,
    discarded: AtomicU64,
    discarded_counter: Counter<u64>,
}

impl<P: SnapshotProjector> SnapshotStore<P> {
    /// Creates a store for the projector.
    pub fn new(projector: P) -> Self {
        let discarded_counter = global::meter("smartsite-core")
            .u64_counter("smartsite.snapshot_store.discarded_events")
            .with_description("Event records discarded by snapshot stores")
            .build();
        Self {
            projector,
            discarded: AtomicU64::new(0),
            discarded_counter,
        }
    }

    /// The projector of this store.
    pub fn projector(&self) -> &P {
        &self.projector
    }

    /// Number of records this store has discarded since it was created.
    pub fn discarded_events(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }

    /// Loads the current snapshot of an aggregate.
    ///
    /// # Errors
    ///
    /// Propagates persistence and decoding errors.
    pub async fn find(
        &self,
        uow: &mut UnitOfWork,
        identifier: Uuid,
    ) -> Result<Option<P::Snapshot>, DomainError> {
        uow.find_cached(self.projector.table(), identifier)
            .await?
            .as_ref()
            .map(P::Snapshot::from_row)
            .transpose()
    }

    /// Loads the current snapshot of an aggregate that must exist.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::AggregateNotFound`] if there is none.
    pub async fn find_or_fail(
        &self,
        uow: &mut UnitOfWork,
        identifier: Uuid,
    ) -> Result<P::Snapshot, DomainError> {
        self.find(uow, identifier)
            .await?
            .ok_or(DomainError::AggregateNotFound(identifier))
    }

    /// Returns `true` if the record deletes its aggregate.
    pub fn is_deleted_event(&self, record: &EventRecord) -> bool {
        self.projector.is_deleted_event(record)
    }

    /// Returns `true` if the record belongs to this store's aggregate type and
    /// event kinds.
    pub fn handles_message(&self, key: &MessageKey, record: &EventRecord) -> bool {
        key.aggregate_identifier.aggregate_type == self.projector.aggregate_type()
            && self.projector.handles(record.kind())
    }

    /// Loads the current snapshot and applies the record to it.
    ///
    /// # Errors
    ///
    /// See [`SnapshotStore::update_internal`].
    #[instrument(
        skip(self, record, uow),
        fields(
            table = self.projector.table(),
            aggregate = %record.key.aggregate_identifier,
            event = %record.name,
        )
    )]
    pub async fn handle_message(
        &self,
        record: &EventRecord,
        source: EventSource,
        uow: &mut UnitOfWork,
    ) -> Result<ApplyOutcome, DomainError> {
        let current = self
            .find(uow, record.key.aggregate_identifier.identifier)
            .await?;
        self.update_internal(record, current, record.key.root_context_identifier, source, uow)
            .await
    }

    /// Applies a record to the current snapshot.
    ///
    /// [`EventSource::Online`] records must be the direct successor of the
    /// current snapshot. [`EventSource::Restore`] records that are not newer
    /// than the stored state are discarded.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::ConcurrencyConflict`] for an online record that
    /// does not follow the current version, [`DomainError::AggregateNotFound`]
    /// for an online deletion of an absent aggregate, and propagates
    /// projection and persistence errors.
    pub async fn update_internal(
        &self,
        record: &EventRecord,
        current: Option<P::Snapshot>,
        root_context_identifier: Uuid,
        source: EventSource,
        uow: &mut UnitOfWork,
    ) -> Result<ApplyOutcome, DomainError> {
        let table = self.projector.table();
        let identifier = record.key.aggregate_identifier.identifier;
        let version = record.version();

        if self.is_deleted_event(record) {
            let Some(current) = current else {
                if source == EventSource::Online {
                    return Err(DomainError::AggregateNotFound(identifier));
                }
                self.remember_deletion(uow, record).await?;
                return Ok(self.discard(record, DiscardReason::AlreadyAbsent));
            };
            if source == EventSource::Online {
                Self::expect_successor(identifier, current.identifier().version, version)?;
            }
            uow.transaction().delete(table, identifier).await?;
            self.remember_deletion(uow, record).await?;
            uow.evict(table, identifier);
            debug!(version, "Snapshot deleted");
            return Ok(ApplyOutcome::Deleted);
        }

        match current {
            None => {
                if uow
                    .transaction()
                    .find_tombstone(table, identifier)
                    .await?
                    .is_some()
                {
                    return Ok(self.discard(record, DiscardReason::AggregateDeleted));
                }
                if source == EventSource::Online && version != 0 {
                    return Err(DomainError::ConcurrencyConflict {
                        aggregate_id: identifier,
                        expected: 0,
                        actual: version,
                    });
                }
                let mut row = self.projector.project(record, None)?.to_row()?;
                row.version = version;
                row.root_context_identifier = root_context_identifier;
                uow.transaction().insert(table, &row).await?;
                uow.evict(table, identifier);
                debug!(version, "Snapshot created");
                Ok(ApplyOutcome::Created)
            }
            Some(current) => {
                let stored = (current.identifier().version, current.last_modified_date());
                match source {
                    EventSource::Online => Self::expect_successor(identifier, stored.0, version)?,
                    EventSource::Restore if (version, record.timestamp) <= stored => {
                        return Ok(self.discard(record, DiscardReason::Stale));
                    }
                    EventSource::Restore => {}
                }
                let mut row = self.projector.project(record, Some(&current))?.to_row()?;
                row.version = version;
                row.root_context_identifier = root_context_identifier;
                uow.transaction().update(table, &row, stored.0).await?;
                uow.evict(table, identifier);
                debug!(version, previous_version = stored.0, "Snapshot updated");
                Ok(ApplyOutcome::Updated)
            }
        }
    }

    fn expect_successor(identifier: Uuid, current: i64, version: i64) -> Result<(), DomainError> {
        if version == current + 1 {
            Ok(())
        } else {
            Err(DomainError::ConcurrencyConflict {
                aggregate_id: identifier,
                expected: current + 1,
                actual: version,
            })
        }
    }

    async fn remember_deletion(
        &self,
        uow: &mut UnitOfWork,
        record: &EventRecord,
    ) -> Result<(), DomainError> {
        let table = self.projector.table();
        let identifier = record.key.aggregate_identifier.identifier;
        let known = uow.transaction().find_tombstone(table, identifier).await?;
        if known.is_some_and(|t| t.version >= record.version()) {
            return Ok(());
        }
        let tombstone = Tombstone {
            identifier,
            version: record.version(),
            deleted_at: record.timestamp,
        };
        uow.transaction().insert_tombstone(table, &tombstone).await
    }

    fn discard(&self, record: &EventRecord, reason: DiscardReason) -> ApplyOutcome {
        self.discarded.fetch_add(1, Ordering::Relaxed);
        self.discarded_counter.add(
            1,
            &[
                KeyValue::new("table", self.projector.table()),
                KeyValue::new("reason", reason.as_str()),
            ],
        );
        debug!(
            aggregate = %record.key.aggregate_identifier,
            event = %record.name,
            reason = reason.as_str(),
            "Skipping update of snapshot store for event"
        );
        ApplyOutcome::Discarded(reason)
    }
}

#[async_trait]
impl<P: SnapshotProjector> EventHandler for SnapshotStore<P> {
    fn name(&self) -> &'static str {
        self.projector.table()
    }

    fn handles_message(&self, key: &MessageKey, record: &EventRecord) -> bool {
        SnapshotStore::handles_message(self, key, record)
    }

    async fn handle_message(
        &self,
        record: &EventRecord,
        source: EventSource,
        uow: &mut UnitOfWork,
    ) -> Result<ApplyOutcome, DomainError> {
        SnapshotStore::handle_message(self, record, source, uow).await
    }
}
