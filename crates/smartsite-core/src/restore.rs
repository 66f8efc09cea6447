//! Restore and replay: rebuild a service's database from the event log.
//!
//! Restore strategies apply records with the same create/update/delete rules
//! as online processing, but in [`EventSource::Restore`] mode, so replaying
//! the log any number of times converges to the same state. Wrapped in a
//! [`BusinessTransactionAwareListener`](crate::transaction::BusinessTransactionAwareListener),
//! the dispatcher restores each business transaction in one unit of work.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, instrument, warn};

use crate::consumer::{ConsumerPool, ConsumerPoolConfig, DeadLetterQueue, RecordProcessor};
use crate::error::DomainError;
use crate::event::{ConsumerRecord, EventRecord};
use crate::persistence::{EventLog, PersistenceBackend};
use crate::retry::RetryPolicy;
use crate::store::{ApplyOutcome, EventHandler, EventSource};
use crate::transaction::BusinessTransactionProcessor;
use crate::uow::UnitOfWork;

/// Applies records of one kind of aggregate during restore.
#[async_trait]
pub trait RestoreStrategy: Send + Sync {
    /// Returns `true` if the strategy applies this record.
    fn can_handle(&self, record: &EventRecord) -> bool;

    /// Applies the record.
    async fn do_handle(
        &self,
        record: &EventRecord,
        uow: &mut UnitOfWork,
    ) -> Result<ApplyOutcome, DomainError>;
}

/// Restores through any [`EventHandler`], typically a snapshot store.
pub struct SnapshotRestoreStrategy {
    handler: Arc<dyn EventHandler>,
}

impl SnapshotRestoreStrategy {
    /// Wraps a handler.
    #[must_use]
    pub fn new(handler: Arc<dyn EventHandler>) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl RestoreStrategy for SnapshotRestoreStrategy {
    fn can_handle(&self, record: &EventRecord) -> bool {
        self.handler.handles_message(&record.key, record)
    }

    async fn do_handle(
        &self,
        record: &EventRecord,
        uow: &mut UnitOfWork,
    ) -> Result<ApplyOutcome, DomainError> {
        self.handler
            .handle_message(record, EventSource::Restore, uow)
            .await
    }
}

/// Keeps restore from running ahead of the online service.
///
/// The online service reports the highest offset it has processed per
/// partition. A partition without a reported offset is not guarded. Restore
/// waits for a record ahead of the reported offset instead of failing it.
#[derive(Debug, Default)]
pub struct OffsetSynchronizationManager {
    max_offsets: RwLock<HashMap<u32, i64>>,
    advanced: Notify,
    next_followed: Mutex<i64>,
}

impl OffsetSynchronizationManager {
    /// Records read from a followed log per page.
    const FOLLOW_PAGE_SIZE: usize = 500;

    /// Creates a manager without any reported offsets.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the highest offset the online service has processed and wakes
    /// every waiting restore.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::Infrastructure`] if the offset table is poisoned.
    pub fn update_max_offset(&self, partition: u32, offset: i64) -> Result<(), DomainError> {
        {
            let mut offsets = self
                .max_offsets
                .write()
                .map_err(|_| DomainError::Infrastructure("offset table poisoned".to_string()))?;
            let entry = offsets.entry(partition).or_insert(offset);
            *entry = (*entry).max(offset);
        }
        self.advanced.notify_waiters();
        Ok(())
    }

    /// The highest offset reported for `partition`.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::Infrastructure`] if the offset table is poisoned.
    pub fn max_offset(&self, partition: u32) -> Result<Option<i64>, DomainError> {
        let offsets = self
            .max_offsets
            .read()
            .map_err(|_| DomainError::Infrastructure("offset table poisoned".to_string()))?;
        Ok(offsets.get(&partition).copied())
    }

    /// Fails if the record lies beyond what the online service has reached.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::RestoreAheadOfOnline`].
    pub fn check(&self, record: &ConsumerRecord) -> Result<(), DomainError> {
        match self.max_offset(record.partition)? {
            Some(max_offset) if record.offset > max_offset => {
                Err(DomainError::RestoreAheadOfOnline {
                    partition: record.partition,
                    offset: record.offset,
                    max_offset,
                })
            }
            _ => Ok(()),
        }
    }

    /// Waits until the online service has reached the record's offset.
    ///
    /// Wakes on every reported offset and re-checks at least every `poll`.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::Infrastructure`] if the offset table is poisoned.
    pub async fn wait_until_reached(
        &self,
        record: &ConsumerRecord,
        poll: Duration,
    ) -> Result<(), DomainError> {
        let mut waited = false;
        loop {
            let advanced = self.advanced.notified();
            match self.check(record) {
                Err(DomainError::RestoreAheadOfOnline { max_offset, .. }) => {
                    if !waited {
                        debug!(max_offset, "Restore ahead of online service, waiting");
                        waited = true;
                    }
                    let _elapsed = tokio::time::timeout(poll, advanced).await;
                }
                Ok(()) if waited => {
                    debug!("Online service caught up, resuming restore");
                    return Ok(());
                }
                other => return other,
            }
        }
    }

    /// Reports every record appended to `log` since the previous call as
    /// processed. Returns the number of records read.
    ///
    /// For services whose online path writes straight to the log, a record in
    /// the log is a record the online service has processed.
    ///
    /// # Errors
    ///
    /// Propagates errors reading the log.
    pub async fn follow(&self, log: &dyn EventLog) -> Result<usize, DomainError> {
        let mut next = self.next_followed.lock().await;
        let mut read = 0;
        loop {
            let page = log.read(*next, Self::FOLLOW_PAGE_SIZE).await?;
            let Some(last) = page.last() else { break };
            *next = last.offset + 1;
            read += page.len();
            let mut reached: HashMap<u32, i64> = HashMap::new();
            for record in &page {
                let entry = reached.entry(record.partition).or_insert(record.offset);
                *entry = (*entry).max(record.offset);
            }
            for (partition, offset) in reached {
                self.update_max_offset(partition, offset)?;
            }
        }
        Ok(read)
    }
}

/// Runs every matching strategy for a record in one unit of work.
pub struct RestoreDbStrategyDispatcher {
    backend: Arc<dyn PersistenceBackend>,
    strategies: Vec<Arc<dyn RestoreStrategy>>,
    offsets: Option<Arc<OffsetSynchronizationManager>>,
    offset_poll: Duration,
}

impl RestoreDbStrategyDispatcher {
    /// Default interval at which a record ahead of the online service is
    /// re-checked.
    pub const DEFAULT_OFFSET_POLL: Duration = Duration::from_millis(100);

    /// Creates a dispatcher without strategies.
    #[must_use]
    pub fn new(backend: Arc<dyn PersistenceBackend>) -> Self {
        Self {
            backend,
            strategies: Vec::new(),
            offsets: None,
            offset_poll: Self::DEFAULT_OFFSET_POLL,
        }
    }

    /// Registers a strategy.
    #[must_use]
    pub fn with_strategy(mut self, strategy: Arc<dyn RestoreStrategy>) -> Self {
        self.strategies.push(strategy);
        self
    }

    /// Guards dispatching with an offset synchronization manager.
    #[must_use]
    pub fn with_offset_guard(mut self, offsets: Arc<OffsetSynchronizationManager>) -> Self {
        self.offsets = Some(offsets);
        self
    }

    /// Sets how often a record ahead of the online service is re-checked.
    #[must_use]
    pub fn with_offset_poll(mut self, poll: Duration) -> Self {
        self.offset_poll = poll;
        self
    }

    /// Applies one record. Returns the number of strategies that handled it.
    ///
    /// With an offset guard, a record ahead of the online service is held
    /// until the service reports its offset.
    ///
    /// # Errors
    ///
    /// Propagates offset guard errors, and strategy errors after rolling the
    /// unit of work back.
    #[instrument(skip(self, record), fields(partition = record.partition, offset = record.offset, kind = %record.record.kind()))]
    pub async fn dispatch(&self, record: &ConsumerRecord) -> Result<usize, DomainError> {
        self.wait_for_online(record).await?;
        self.apply(std::slice::from_ref(record)).await
    }

    /// Applies the records of one business transaction in a single unit of
    /// work, once the online service has reached `finished`. Returns the
    /// number of strategy applications.
    ///
    /// # Errors
    ///
    /// Propagates offset guard errors, and strategy errors after rolling the
    /// whole batch back.
    #[instrument(skip_all, fields(partition = finished.partition, offset = finished.offset, records = events.len()))]
    pub async fn dispatch_batch(
        &self,
        events: &[ConsumerRecord],
        finished: &ConsumerRecord,
    ) -> Result<usize, DomainError> {
        self.wait_for_online(finished).await?;
        self.apply(events).await
    }

    async fn wait_for_online(&self, record: &ConsumerRecord) -> Result<(), DomainError> {
        match &self.offsets {
            Some(offsets) => offsets.wait_until_reached(record, self.offset_poll).await,
            None => Ok(()),
        }
    }

    async fn apply(&self, records: &[ConsumerRecord]) -> Result<usize, DomainError> {
        let work: Vec<_> = records
            .iter()
            .flat_map(|record| {
                self.strategies
                    .iter()
                    .filter(move |s| s.can_handle(&record.record))
                    .map(move |strategy| (record, strategy))
            })
            .collect();
        if work.is_empty() {
            debug!("No restore strategy for records, skipping");
            return Ok(0);
        }

        let mut uow = UnitOfWork::begin(self.backend.as_ref()).await?;
        for (record, strategy) in &work {
            match strategy.do_handle(&record.record, &mut uow).await {
                Ok(outcome) => debug!(?outcome, offset = record.offset, "Record restored"),
                Err(error) => {
                    warn!(%error, offset = record.offset, "Restore of record failed, rolling back");
                    if let Err(rollback_error) = uow.rollback().await {
                        warn!(error = %rollback_error, "Rollback after failed restore failed");
                    }
                    return Err(error);
                }
            }
        }
        uow.commit().await?;
        Ok(work.len())
    }
}

#[async_trait]
impl RecordProcessor for RestoreDbStrategyDispatcher {
    async fn process(&self, record: &ConsumerRecord) -> Result<(), DomainError> {
        self.dispatch(record).await.map(|_| ())
    }
}

#[async_trait]
impl BusinessTransactionProcessor for RestoreDbStrategyDispatcher {
    async fn on_transaction_finished(
        &self,
        _started: &ConsumerRecord,
        events: &[ConsumerRecord],
        finished: &ConsumerRecord,
    ) -> Result<(), DomainError> {
        self.dispatch_batch(events, finished).await.map(|_| ())
    }

    async fn on_non_transactional_event(&self, record: &ConsumerRecord) -> Result<(), DomainError> {
        self.dispatch(record).await.map(|_| ())
    }
}

/// Outcome of a replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReplayReport {
    /// Records read from the log and dispatched.
    pub dispatched: u64,
    /// Records processed successfully.
    pub processed: u64,
    /// Records parked in the dead letter queue.
    pub parked: u64,
}

/// Replays the whole event log through a record processor.
pub struct ReplayRunner {
    log: Arc<dyn EventLog>,
    processor: Arc<dyn RecordProcessor>,
    pool: ConsumerPoolConfig,
    retry: RetryPolicy,
    dead_letters: Arc<DeadLetterQueue>,
    page_size: usize,
}

impl ReplayRunner {
    /// Default number of records read from the log per page.
    pub const DEFAULT_PAGE_SIZE: usize = 500;

    /// Creates a runner with default pool sizing and retry policy.
    #[must_use]
    pub fn new(log: Arc<dyn EventLog>, processor: Arc<dyn RecordProcessor>) -> Self {
        Self {
            log,
            processor,
            pool: ConsumerPoolConfig::default(),
            retry: RetryPolicy::default(),
            dead_letters: Arc::new(DeadLetterQueue::new()),
            page_size: Self::DEFAULT_PAGE_SIZE,
        }
    }

    /// Sets the consumer pool sizing.
    #[must_use]
    pub fn with_pool(mut self, pool: ConsumerPoolConfig) -> Self {
        self.pool = pool;
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Parks failed records in `dead_letters`.
    #[must_use]
    pub fn with_dead_letters(mut self, dead_letters: Arc<DeadLetterQueue>) -> Self {
        self.dead_letters = dead_letters;
        self
    }

    /// Sets the number of records read per page.
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// The dead letter queue of this runner.
    #[must_use]
    pub fn dead_letters(&self) -> &Arc<DeadLetterQueue> {
        &self.dead_letters
    }

    /// Reads the log from the first offset and processes every record.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be read or a worker dies. Records
    /// that fail processing are parked, not reported as errors.
    pub async fn replay_from_beginning(&self) -> Result<ReplayReport, DomainError> {
        let latest = self.log.latest_offset().await?;
        info!(?latest, "Replaying event log from the beginning");
        let pool = ConsumerPool::spawn(
            self.pool,
            Arc::clone(&self.processor),
            self.retry,
            Arc::clone(&self.dead_letters),
        );

        let mut dispatched = 0_u64;
        let mut next_offset = 0;
        loop {
            let page = match self.log.read(next_offset, self.page_size).await {
                Ok(page) => page,
                Err(error) => {
                    pool.shutdown().await?;
                    return Err(error);
                }
            };
            let Some(last) = page.last() else { break };
            next_offset = last.offset + 1;
            for record in page {
                pool.dispatch(record).await?;
                dispatched += 1;
            }
        }

        let reports = pool.shutdown().await?;
        let report = ReplayReport {
            dispatched,
            processed: reports.iter().map(|r| r.processed).sum(),
            parked: reports.iter().map(|r| r.parked).sum(),
        };
        info!(
            dispatched = report.dispatched,
            processed = report.processed,
            parked = report.parked,
            "Replay finished"
        );
        Ok(report)
    }
}
