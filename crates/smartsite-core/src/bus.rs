//! The local event bus: the in-process publish path of a service.
//!
//! Emitting resolves the single mapper for the event kind, appends the record
//! to the event log inside the caller's unit of work and fans it out to the
//! registered handlers in the same unit of work. Listeners only hear about
//! records after the unit of work has committed.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::clock::SharedClock;
use crate::error::DomainError;
use crate::event::{EventKind, EventRecord};
use crate::identifier::MessageKey;
use crate::mapper::MapperRegistry;
use crate::persistence::{PendingRecord, PersistenceBackend};
use crate::store::{EventHandler, EventSource};
use crate::uow::UnitOfWork;

/// Post-commit notification hook.
#[async_trait]
pub trait EventListener: Send + Sync {
    /// Called once per committed unit of work with the records it appended.
    async fn on_committed(&self, records: &[PendingRecord]) -> Result<(), DomainError>;
}

/// In-process event bus.
pub struct LocalEventBus {
    registry: Arc<MapperRegistry>,
    backend: Arc<dyn PersistenceBackend>,
    clock: SharedClock,
    handlers: Vec<Arc<dyn EventHandler>>,
    listeners: Vec<Arc<dyn EventListener>>,
}

impl std::fmt::Debug for LocalEventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalEventBus")
            .field("registry", &self.registry)
            .field(
                "handlers",
                &self.handlers.iter().map(|h| h.name()).collect::<Vec<_>>(),
            )
            .field("listeners", &self.listeners.len())
            .finish_non_exhaustive()
    }
}

impl LocalEventBus {
    /// Creates a bus without handlers or listeners.
    pub fn new(
        registry: Arc<MapperRegistry>,
        backend: Arc<dyn PersistenceBackend>,
        clock: SharedClock,
    ) -> Self {
        Self {
            registry,
            backend,
            clock,
            handlers: Vec::new(),
            listeners: Vec::new(),
        }
    }

    /// Registers a handler. Handlers are invoked in registration order.
    #[must_use]
    pub fn with_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Registers a post-commit listener.
    #[must_use]
    pub fn with_listener(mut self, listener: Arc<dyn EventListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// The clock used to stamp records the bus creates itself.
    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    /// The mapper registry of the bus.
    pub fn registry(&self) -> &MapperRegistry {
        &self.registry
    }

    /// Opens a unit of work on the bus backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot begin a transaction.
    pub async fn begin(&self) -> Result<UnitOfWork, DomainError> {
        UnitOfWork::begin(self.backend.as_ref()).await
    }

    /// Maps `message` with the single mapper of `kind` and publishes it.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::MapperNotFound`] or
    /// [`DomainError::AmbiguousMapper`] if mapper resolution fails, and
    /// propagates handler and persistence errors.
    pub async fn emit<M: Any + Send + Sync>(
        &self,
        uow: &mut UnitOfWork,
        kind: EventKind,
        message: &M,
    ) -> Result<EventRecord, DomainError> {
        let record = self.registry.map(kind, message)?;
        self.publish(uow, record).await
    }

    /// Publishes a tombstone for `key`.
    ///
    /// # Errors
    ///
    /// Propagates handler and persistence errors.
    pub async fn emit_tombstone(
        &self,
        uow: &mut UnitOfWork,
        key: MessageKey,
    ) -> Result<EventRecord, DomainError> {
        let record = EventRecord::tombstone(key, self.clock.now());
        self.publish(uow, record).await
    }

    /// Appends an already built record and routes it to every handler that
    /// wants it.
    ///
    /// # Errors
    ///
    /// Propagates handler and persistence errors; the caller is expected to
    /// roll the unit of work back.
    pub async fn publish(
        &self,
        uow: &mut UnitOfWork,
        record: EventRecord,
    ) -> Result<EventRecord, DomainError> {
        uow.append(&record).await?;
        for handler in &self.handlers {
            if handler.handles_message(&record.key, &record) {
                let outcome = handler
                    .handle_message(&record, EventSource::Online, uow)
                    .await?;
                debug!(
                    handler = handler.name(),
                    kind = %record.kind(),
                    ?outcome,
                    "Event handled"
                );
            }
        }
        Ok(record)
    }

    /// Commits the unit of work, then notifies listeners.
    ///
    /// # Errors
    ///
    /// Returns an error if the commit fails. Listener failures are logged and
    /// do not fail the call.
    pub async fn commit(&self, uow: UnitOfWork) -> Result<Vec<PendingRecord>, DomainError> {
        let records = uow.commit().await?;
        for listener in &self.listeners {
            if let Err(error) = listener.on_committed(&records).await {
                warn!(%error, records = records.len(), "Event listener failed after commit");
            }
        }
        Ok(records)
    }

    /// Rolls the unit of work back.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails to roll back.
    pub async fn rollback(&self, uow: UnitOfWork) -> Result<(), DomainError> {
        uow.rollback().await
    }

    /// Commits the unit of work if `result` is a success and rolls it back
    /// otherwise.
    ///
    /// # Errors
    ///
    /// Returns the error carried by `result`, or the commit error. A failed
    /// rollback is logged and does not replace the original error.
    pub async fn complete<T>(
        &self,
        uow: UnitOfWork,
        result: Result<T, DomainError>,
    ) -> Result<T, DomainError> {
        match result {
            Ok(value) => {
                self.commit(uow).await?;
                Ok(value)
            }
            Err(error) => {
                if let Err(rollback_error) = self.rollback(uow).await {
                    warn!(error = %rollback_error, "Rollback of failed unit of work failed");
                }
                Err(error)
            }
        }
    }
}
