//! Partitioned consumer pool and dead letter queue.
//!
//! Records are routed to workers by partition, so every record of one
//! aggregate is processed by the same worker in log order. A worker processes
//! one record at a time to completion. A record that keeps failing is parked
//! in the [`DeadLetterQueue`] and the worker moves on.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry::metrics::Counter;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::error::DomainError;
use crate::event::ConsumerRecord;
use crate::retry::{RetryPolicy, retry_with_backoff};

/// Processes records read from the log.
#[async_trait]
pub trait RecordProcessor: Send + Sync {
    /// Processes one record.
    async fn process(&self, record: &ConsumerRecord) -> Result<(), DomainError>;
}

/// A record that could not be processed.
#[derive(Debug, Clone)]
pub struct ParkedRecord {
    /// The record.
    pub record: ConsumerRecord,
    /// The last error, rendered.
    pub error: String,
    /// Number of attempts made.
    pub attempts: u32,
    /// When the record was parked.
    pub parked_at: DateTime<Utc>,
}

/// Records that exhausted their retries.
#[derive(Debug)]
pub struct DeadLetterQueue {
    parked: Mutex<Vec<ParkedRecord>>,
    parked_counter: Counter<u64>,
}

impl Default for DeadLetterQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl DeadLetterQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        let parked_counter = global::meter("smartsite-core")
            .u64_counter("smartsite.consumer.parked_records")
            .with_description("Records parked after exhausting their retries")
            .build();
        Self {
            parked: Mutex::new(Vec::new()),
            parked_counter,
        }
    }

    /// Parks a record.
    pub async fn park(&self, record: ConsumerRecord, error: &DomainError, attempts: u32) {
        error!(
            partition = record.partition,
            offset = record.offset,
            kind = %record.record.kind(),
            attempts,
            %error,
            "Parking record in dead letter queue"
        );
        self.parked_counter.add(
            1,
            &[KeyValue::new(
                "aggregate_type",
                record.record.key.aggregate_identifier.aggregate_type.as_str(),
            )],
        );
        self.parked.lock().await.push(ParkedRecord {
            record,
            error: error.to_string(),
            attempts,
            parked_at: Utc::now(),
        });
    }

    /// Number of parked records.
    pub async fn len(&self) -> usize {
        self.parked.lock().await.len()
    }

    /// Returns `true` if nothing is parked.
    pub async fn is_empty(&self) -> bool {
        self.parked.lock().await.is_empty()
    }

    /// Copies of all parked records, oldest first.
    pub async fn list(&self) -> Vec<ParkedRecord> {
        self.parked.lock().await.clone()
    }

    /// Removes and returns all parked records for reprocessing.
    pub async fn drain(&self) -> Vec<ParkedRecord> {
        std::mem::take(&mut *self.parked.lock().await)
    }
}

/// Sizing of a [`ConsumerPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerPoolConfig {
    /// Number of worker tasks.
    pub workers: usize,
    /// Capacity of each worker's queue.
    pub capacity: usize,
}

impl Default for ConsumerPoolConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            capacity: 256,
        }
    }
}

/// What a worker did before it stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WorkerReport {
    /// Index of the worker.
    pub worker: usize,
    /// Records processed successfully.
    pub processed: u64,
    /// Records parked in the dead letter queue.
    pub parked: u64,
}

/// A fixed set of workers, each owning one bounded queue.
#[derive(Debug)]
pub struct ConsumerPool {
    senders: Vec<mpsc::Sender<ConsumerRecord>>,
    workers: Vec<JoinHandle<WorkerReport>>,
}

impl ConsumerPool {
    /// Spawns the workers on the current tokio runtime.
    pub fn spawn(
        config: ConsumerPoolConfig,
        processor: Arc<dyn RecordProcessor>,
        retry: RetryPolicy,
        dead_letters: Arc<DeadLetterQueue>,
    ) -> Self {
        let workers = config.workers.max(1);
        let (senders, handles): (Vec<_>, Vec<_>) = (0..workers)
            .map(|worker| {
                let (tx, rx) = mpsc::channel(config.capacity.max(1));
                let handle = tokio::spawn(run_worker(
                    worker,
                    rx,
                    Arc::clone(&processor),
                    retry,
                    Arc::clone(&dead_letters),
                ));
                (tx, handle)
            })
            .unzip();
        info!(workers, capacity = config.capacity, "Consumer pool started");
        Self {
            senders,
            workers: handles,
        }
    }

    /// Index of the worker responsible for `partition`.
    #[must_use]
    pub fn worker_for(&self, partition: u32) -> usize {
        usize::try_from(partition).unwrap_or(0) % self.senders.len()
    }

    /// Hands a record to the worker of its partition, waiting while that
    /// worker's queue is full.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::Infrastructure`] if the worker has stopped.
    pub async fn dispatch(&self, record: ConsumerRecord) -> Result<(), DomainError> {
        let worker = self.worker_for(record.partition);
        self.senders[worker]
            .send(record)
            .await
            .map_err(|_| DomainError::Infrastructure(format!("consumer worker {worker} stopped")))
    }

    /// Closes the queues and waits for the workers to drain them.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::Infrastructure`] if a worker panicked.
    pub async fn shutdown(self) -> Result<Vec<WorkerReport>, DomainError> {
        drop(self.senders);
        let mut reports = Vec::with_capacity(self.workers.len());
        for handle in self.workers {
            let report = handle
                .await
                .map_err(|e| DomainError::Infrastructure(format!("consumer worker failed: {e}")))?;
            reports.push(report);
        }
        info!(
            processed = reports.iter().map(|r| r.processed).sum::<u64>(),
            parked = reports.iter().map(|r| r.parked).sum::<u64>(),
            "Consumer pool stopped"
        );
        Ok(reports)
    }
}

async fn run_worker(
    worker: usize,
    mut rx: mpsc::Receiver<ConsumerRecord>,
    processor: Arc<dyn RecordProcessor>,
    retry: RetryPolicy,
    dead_letters: Arc<DeadLetterQueue>,
) -> WorkerReport {
    let mut report = WorkerReport {
        worker,
        ..WorkerReport::default()
    };
    while let Some(record) = rx.recv().await {
        match retry_with_backoff(&retry, || processor.process(&record)).await {
            Ok(()) => {
                report.processed += 1;
                debug!(worker, partition = record.partition, offset = record.offset, "Record processed");
            }
            Err(exhausted) => {
                report.parked += 1;
                dead_letters
                    .park(record, &exhausted.error, exhausted.attempts)
                    .await;
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use serde_json::json;
    use uuid::Uuid;

    use super::*;
    use crate::event::{EventName, EventRecord};
    use crate::identifier::{AggregateIdentifier, AggregateType, MessageKey};
    use crate::testing::at;

    #[derive(Default)]
    struct Recorder {
        seen: StdMutex<HashMap<u32, Vec<i64>>>,
        poison_offset: Option<i64>,
    }

    #[async_trait]
    impl RecordProcessor for Recorder {
        async fn process(&self, record: &ConsumerRecord) -> Result<(), DomainError> {
            if Some(record.offset) == self.poison_offset {
                return Err(DomainError::Infrastructure("cannot deserialize".to_string()));
            }
            self.seen
                .lock()
                .unwrap()
                .entry(record.partition)
                .or_default()
                .push(record.offset);
            Ok(())
        }
    }

    fn record(partition: u32, offset: i64) -> ConsumerRecord {
        let id = Uuid::new_v4();
        ConsumerRecord {
            partition,
            offset,
            transaction_identifier: None,
            record: EventRecord::new(
                MessageKey::new(id, AggregateIdentifier::new(AggregateType::User, id, 0)),
                EventName::Created,
                at(0),
                json!({}),
            ),
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::builder()
            .max_retries(2)
            .initial_delay(Duration::from_millis(1))
            .build()
    }

    #[tokio::test]
    async fn test_records_of_one_partition_are_processed_in_order() {
        // Arrange
        let recorder = Arc::new(Recorder::default());
        let dlq = Arc::new(DeadLetterQueue::new());
        let pool = ConsumerPool::spawn(
            ConsumerPoolConfig {
                workers: 3,
                capacity: 2,
            },
            recorder.clone(),
            fast_retry(),
            Arc::clone(&dlq),
        );

        // Act
        for offset in 0..30 {
            pool.dispatch(record(u32::try_from(offset % 5).unwrap(), offset))
                .await
                .unwrap();
        }
        let reports = pool.shutdown().await.unwrap();

        // Assert
        assert_eq!(reports.iter().map(|r| r.processed).sum::<u64>(), 30);
        let seen = recorder.seen.lock().unwrap();
        for offsets in seen.values() {
            assert!(offsets.windows(2).all(|w| w[0] < w[1]));
        }
        assert!(dlq.is_empty().await);
    }

    #[tokio::test]
    async fn test_failing_record_is_parked_and_partition_continues() {
        // Arrange
        let recorder = Arc::new(Recorder {
            poison_offset: Some(1),
            ..Recorder::default()
        });
        let dlq = Arc::new(DeadLetterQueue::new());
        let pool = ConsumerPool::spawn(
            ConsumerPoolConfig {
                workers: 1,
                capacity: 4,
            },
            recorder.clone(),
            fast_retry(),
            Arc::clone(&dlq),
        );

        // Act
        for offset in 0..3 {
            pool.dispatch(record(0, offset)).await.unwrap();
        }
        let reports = pool.shutdown().await.unwrap();

        // Assert
        assert_eq!(reports[0].processed, 2);
        assert_eq!(reports[0].parked, 1);
        let parked = dlq.list().await;
        assert_eq!(parked.len(), 1);
        assert_eq!(parked[0].record.offset, 1);
        assert_eq!(parked[0].attempts, 3);
        assert_eq!(recorder.seen.lock().unwrap()[&0], vec![0, 2]);
    }

    #[tokio::test]
    async fn test_same_partition_maps_to_same_worker() {
        // Arrange
        let pool = ConsumerPool::spawn(
            ConsumerPoolConfig {
                workers: 4,
                capacity: 1,
            },
            Arc::new(Recorder::default()),
            fast_retry(),
            Arc::new(DeadLetterQueue::new()),
        );

        // Act
        let first = pool.worker_for(6);
        let second = pool.worker_for(6);

        // Assert
        assert_eq!(first, second);
        assert_eq!(first, 2);
        pool.shutdown().await.unwrap();
    }
}
