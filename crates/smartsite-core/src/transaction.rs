//! Business transactions: group every record of one logical operation into a
//! single ordered batch that is committed atomically.
//!
//! A batch is framed by a `BATCH_OPERATION_STARTED` and a
//! `BATCH_OPERATION_FINISHED` marker and every record in between carries the
//! business transaction identifier. Consumers use
//! [`BusinessTransactionAwareListener`] to see the batch as one unit.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bus::LocalEventBus;
use crate::consumer::RecordProcessor;
use crate::error::DomainError;
use crate::event::{ConsumerRecord, Event, EventName};
use crate::identifier::{AggregateIdentifier, AggregateType, MessageKey};
use crate::uow::{BusinessTransactionContext, UnitOfWork};

/// How to start a business transaction when one may already be active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Propagation {
    /// Join the active business transaction, or start one.
    Required,
    /// Start a new business transaction; fail if one is active.
    RequiresNew,
}

/// Payload of the start and finish markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessTransactionMarker {
    /// Identifier of the business transaction.
    pub transaction_identifier: Uuid,
    /// Root context the business transaction was started for.
    pub root_context_identifier: Uuid,
}

/// Starts and finishes business transactions on a [`LocalEventBus`].
#[derive(Debug, Clone)]
pub struct BusinessTransactionManager {
    bus: Arc<LocalEventBus>,
}

impl BusinessTransactionManager {
    /// Creates a manager publishing markers on `bus`.
    #[must_use]
    pub fn new(bus: Arc<LocalEventBus>) -> Self {
        Self { bus }
    }

    /// The bus this manager publishes on.
    #[must_use]
    pub fn bus(&self) -> &Arc<LocalEventBus> {
        &self.bus
    }

    /// Starts a business transaction in `uow`, or joins the active one.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::BusinessTransaction`] for
    /// [`Propagation::RequiresNew`] while a business transaction is active,
    /// and propagates errors of appending the start marker.
    pub async fn start_transaction(
        &self,
        uow: &mut UnitOfWork,
        root_context_identifier: Uuid,
        propagation: Propagation,
    ) -> Result<Uuid, DomainError> {
        if let Some(active) = uow.business_transaction_mut() {
            return match propagation {
                Propagation::RequiresNew => Err(DomainError::BusinessTransaction(format!(
                    "business transaction {} is already active",
                    active.identifier
                ))),
                Propagation::Required => {
                    active.depth += 1;
                    debug!(business_transaction = %active.identifier, depth = active.depth, "Joined business transaction");
                    Ok(active.identifier)
                }
            };
        }

        let context = BusinessTransactionContext {
            identifier: Uuid::now_v7(),
            root_context_identifier,
            depth: 1,
        };
        uow.set_business_transaction(Some(context));
        if let Err(error) = self
            .publish_marker(uow, context, EventName::BatchOperationStarted)
            .await
        {
            uow.set_business_transaction(None);
            return Err(error);
        }
        info!(business_transaction = %context.identifier, root = %root_context_identifier, "Business transaction started");
        Ok(context.identifier)
    }

    /// Finishes the innermost start of the active business transaction.
    ///
    /// Only the outermost finish appends the finish marker and ends the
    /// business transaction.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::BusinessTransaction`] if none is active, and
    /// propagates errors of appending the finish marker.
    pub async fn finish_transaction(&self, uow: &mut UnitOfWork) -> Result<(), DomainError> {
        let Some(active) = uow.business_transaction_mut() else {
            return Err(DomainError::BusinessTransaction(
                "no business transaction is active".to_string(),
            ));
        };
        if active.depth > 1 {
            active.depth -= 1;
            return Ok(());
        }
        let context = *active;
        let result = self
            .publish_marker(uow, context, EventName::BatchOperationFinished)
            .await;
        uow.set_business_transaction(None);
        result?;
        info!(business_transaction = %context.identifier, "Business transaction finished");
        Ok(())
    }

    /// Runs `body` inside a business transaction of `uow`, joining an active
    /// one if present.
    ///
    /// # Errors
    ///
    /// Propagates errors of `body`; afterwards no business transaction is
    /// active in `uow`.
    pub async fn do_in_business_transaction<T, F>(
        &self,
        uow: &mut UnitOfWork,
        root_context_identifier: Uuid,
        body: F,
    ) -> Result<T, DomainError>
    where
        F: for<'a> FnOnce(&'a mut UnitOfWork) -> BoxFuture<'a, Result<T, DomainError>> + Send,
        T: Send,
    {
        self.start_transaction(uow, root_context_identifier, Propagation::Required)
            .await?;
        match body(uow).await {
            Ok(value) => {
                self.finish_transaction(uow).await?;
                Ok(value)
            }
            Err(error) => {
                uow.set_business_transaction(None);
                Err(error)
            }
        }
    }

    /// Runs `body` in a fresh unit of work inside a new business transaction
    /// and commits everything as one batch.
    ///
    /// # Errors
    ///
    /// Propagates errors of `body` and of the commit; in both cases nothing of
    /// the batch is persisted or published.
    pub async fn do_batch_in_business_transaction<T, F>(
        &self,
        root_context_identifier: Uuid,
        body: F,
    ) -> Result<T, DomainError>
    where
        F: for<'a> FnOnce(&'a mut UnitOfWork) -> BoxFuture<'a, Result<T, DomainError>> + Send,
        T: Send,
    {
        let mut uow = self.bus.begin().await?;
        let started = self
            .start_transaction(&mut uow, root_context_identifier, Propagation::RequiresNew)
            .await;
        let result = match started {
            Ok(_) => match body(&mut uow).await {
                Ok(value) => self.finish_transaction(&mut uow).await.map(|()| value),
                Err(error) => Err(error),
            },
            Err(error) => Err(error),
        };
        match result {
            Ok(value) => {
                self.bus.commit(uow).await?;
                Ok(value)
            }
            Err(error) => {
                warn!(%error, root = %root_context_identifier, "Business transaction failed, rolling back");
                if let Err(rollback_error) = self.bus.rollback(uow).await {
                    warn!(error = %rollback_error, "Rollback of business transaction failed");
                }
                Err(error)
            }
        }
    }

    async fn publish_marker(
        &self,
        uow: &mut UnitOfWork,
        context: BusinessTransactionContext,
        name: EventName,
    ) -> Result<(), DomainError> {
        let version = i64::from(name == EventName::BatchOperationFinished);
        let marker = Event {
            key: MessageKey::new(
                context.root_context_identifier,
                AggregateIdentifier::new(
                    AggregateType::BusinessTransaction,
                    context.identifier,
                    version,
                ),
            ),
            name,
            timestamp: self.bus.clock().now(),
            payload: Some(BusinessTransactionMarker {
                transaction_identifier: context.identifier,
                root_context_identifier: context.root_context_identifier,
            }),
        };
        self.bus.publish(uow, marker.encode()?).await?;
        Ok(())
    }
}

/// Callbacks of a [`BusinessTransactionAwareListener`].
#[async_trait]
pub trait BusinessTransactionProcessor: Send + Sync {
    /// A business transaction was started.
    async fn on_transaction_started(&self, _started: &ConsumerRecord) -> Result<(), DomainError> {
        Ok(())
    }

    /// A record of an open business transaction arrived.
    async fn on_transactional_event(&self, _record: &ConsumerRecord) -> Result<(), DomainError> {
        Ok(())
    }

    /// A business transaction was finished; `events` are its records in
    /// offset order, each once.
    async fn on_transaction_finished(
        &self,
        started: &ConsumerRecord,
        events: &[ConsumerRecord],
        finished: &ConsumerRecord,
    ) -> Result<(), DomainError>;

    /// A record outside of any open business transaction arrived.
    async fn on_non_transactional_event(&self, record: &ConsumerRecord) -> Result<(), DomainError>;
}

#[derive(Debug)]
struct OpenTransaction {
    started: ConsumerRecord,
    events: BTreeMap<i64, ConsumerRecord>,
}

/// Buffers the records of each business transaction and hands the complete
/// batch to a [`BusinessTransactionProcessor`] once its finish marker
/// arrives. Duplicate start and finish markers are ignored.
pub struct BusinessTransactionAwareListener<P> {
    processor: P,
    open: Mutex<HashMap<Uuid, OpenTransaction>>,
}

impl<P: BusinessTransactionProcessor> BusinessTransactionAwareListener<P> {
    /// Creates a listener dispatching to `processor`.
    pub fn new(processor: P) -> Self {
        Self {
            processor,
            open: Mutex::new(HashMap::new()),
        }
    }

    /// The wrapped processor.
    pub fn processor(&self) -> &P {
        &self.processor
    }

    /// Number of business transactions that were started but not finished.
    pub async fn open_transactions(&self) -> usize {
        self.open.lock().await.len()
    }

    /// Processes one record read from the log.
    ///
    /// # Errors
    ///
    /// Propagates processor errors. A failed finish keeps the business
    /// transaction open so a redelivered finish marker completes it.
    pub async fn process(&self, record: &ConsumerRecord) -> Result<(), DomainError> {
        let Some(transaction_identifier) = record.transaction_identifier else {
            return self.processor.on_non_transactional_event(record).await;
        };
        let is_marker = record.record.key.aggregate_identifier.aggregate_type
            == AggregateType::BusinessTransaction;
        let mut open = self.open.lock().await;

        match record.record.name {
            EventName::BatchOperationStarted if is_marker => {
                if open.contains_key(&transaction_identifier) {
                    debug!(business_transaction = %transaction_identifier, "Ignoring duplicate start marker");
                    return Ok(());
                }
                self.processor.on_transaction_started(record).await?;
                open.insert(
                    transaction_identifier,
                    OpenTransaction {
                        started: record.clone(),
                        events: BTreeMap::new(),
                    },
                );
                Ok(())
            }
            EventName::BatchOperationFinished if is_marker => {
                let Some(transaction) = open.get(&transaction_identifier) else {
                    debug!(business_transaction = %transaction_identifier, "Ignoring finish marker of unknown business transaction");
                    return Ok(());
                };
                let events: Vec<_> = transaction.events.values().cloned().collect();
                self.processor
                    .on_transaction_finished(&transaction.started, &events, record)
                    .await?;
                open.remove(&transaction_identifier);
                Ok(())
            }
            _ => match open.get_mut(&transaction_identifier) {
                Some(transaction) => {
                    transaction.events.insert(record.offset, record.clone());
                    self.processor.on_transactional_event(record).await
                }
                None => {
                    debug!(business_transaction = %transaction_identifier, "Record of unknown business transaction");
                    self.processor.on_non_transactional_event(record).await
                }
            },
        }
    }
}

#[async_trait]
impl<P: BusinessTransactionProcessor> RecordProcessor for BusinessTransactionAwareListener<P> {
    async fn process(&self, record: &ConsumerRecord) -> Result<(), DomainError> {
        BusinessTransactionAwareListener::process(self, record).await
    }
}
