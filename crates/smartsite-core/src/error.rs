//! Domain error types.

use thiserror::Error;
use uuid::Uuid;

use crate::event::EventKind;

/// Top-level domain error type.
#[derive(Debug, Error)]
pub enum DomainError {
    /// An aggregate was not found.
    #[error("aggregate not found: {0}")]
    AggregateNotFound(Uuid),

    /// No registered mapper claims the event kind.
    #[error("no event mapper registered for {0}")]
    MapperNotFound(EventKind),

    /// More than one registered mapper claims the event kind.
    #[error("{matches} event mappers registered for {kind}, expected exactly one")]
    AmbiguousMapper {
        /// The event kind that was looked up.
        kind: EventKind,
        /// Number of mappers claiming the kind.
        matches: usize,
    },

    /// Optimistic concurrency conflict.
    #[error("concurrency conflict on aggregate {aggregate_id}: expected version {expected}, found {actual}")]
    ConcurrencyConflict {
        /// The aggregate that had the conflict.
        aggregate_id: Uuid,
        /// The expected version.
        expected: i64,
        /// The actual version found.
        actual: i64,
    },

    /// A command precondition did not hold for the current snapshot.
    #[error("precondition violated: {0}")]
    PreconditionViolation(String),

    /// A validation error in domain logic.
    #[error("validation error: {0}")]
    Validation(String),

    /// Misuse of the business transaction lifecycle.
    #[error("business transaction error: {0}")]
    BusinessTransaction(String),

    /// The restore consumer tried to process a record the online service has
    /// not reached yet.
    #[error("restore is ahead of the online service on partition {partition}: offset {offset} > {max_offset}")]
    RestoreAheadOfOnline {
        /// Partition of the rejected record.
        partition: u32,
        /// Offset of the rejected record.
        offset: i64,
        /// Highest offset the online service has processed.
        max_offset: i64,
    },

    /// An infrastructure/persistence error.
    #[error("infrastructure error: {0}")]
    Infrastructure(String),
}

impl DomainError {
    /// Returns `true` if the caller may reload state and try again.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConcurrencyConflict { .. } | Self::RestoreAheadOfOnline { .. } | Self::Infrastructure(_)
        )
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        Self::Infrastructure(format!("payload serialization failed: {err}"))
    }
}
