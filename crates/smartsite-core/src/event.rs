//! Event records as they travel over the log, and their typed views.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;
use crate::identifier::{AggregateIdentifier, AggregateType, MessageKey};

/// Name of an event within its aggregate type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventName {
    /// The aggregate was created.
    Created,
    /// The aggregate was updated.
    Updated,
    /// A user completed registration.
    Registered,
    /// The aggregate was deleted.
    Deleted,
    /// A business transaction was started.
    BatchOperationStarted,
    /// A business transaction was finished.
    BatchOperationFinished,
}

impl EventName {
    /// Wire name of the event.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Updated => "UPDATED",
            Self::Registered => "REGISTERED",
            Self::Deleted => "DELETED",
            Self::BatchOperationStarted => "BATCH_OPERATION_STARTED",
            Self::BatchOperationFinished => "BATCH_OPERATION_FINISHED",
        }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventName {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            Self::Created,
            Self::Updated,
            Self::Registered,
            Self::Deleted,
            Self::BatchOperationStarted,
            Self::BatchOperationFinished,
        ]
        .into_iter()
        .find(|name| name.as_str() == s)
        .ok_or_else(|| DomainError::Infrastructure(format!("unknown event name: {s}")))
    }
}

/// Aggregate type and event name; the lookup key for event mappers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventKind {
    /// Aggregate type the event belongs to.
    pub aggregate_type: AggregateType,
    /// Name of the event.
    pub name: EventName,
}

impl EventKind {
    /// Creates an event kind.
    #[must_use]
    pub const fn new(aggregate_type: AggregateType, name: EventName) -> Self {
        Self {
            aggregate_type,
            name,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.aggregate_type, self.name)
    }
}

/// A record on the log. A record without payload is a tombstone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Key of the record.
    pub key: MessageKey,
    /// Name of the event.
    pub name: EventName,
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
    /// Serialized payload; `None` marks a deletion.
    pub payload: Option<serde_json::Value>,
}

impl EventRecord {
    /// Creates a record carrying a payload.
    #[must_use]
    pub fn new(
        key: MessageKey,
        name: EventName,
        timestamp: DateTime<Utc>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            key,
            name,
            timestamp,
            payload: Some(payload),
        }
    }

    /// Creates a tombstone for the given key.
    #[must_use]
    pub fn tombstone(key: MessageKey, timestamp: DateTime<Utc>) -> Self {
        Self {
            key,
            name: EventName::Deleted,
            timestamp,
            payload: None,
        }
    }

    /// Returns `true` if the record has no payload.
    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        self.payload.is_none()
    }

    /// The event kind of this record.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        EventKind::new(self.key.aggregate_identifier.aggregate_type, self.name)
    }

    /// Shorthand for the aggregate identifier carried in the key.
    #[must_use]
    pub fn aggregate_identifier(&self) -> AggregateIdentifier {
        self.key.aggregate_identifier
    }

    /// Shorthand for the aggregate version carried in the key.
    #[must_use]
    pub fn version(&self) -> i64 {
        self.key.aggregate_identifier.version
    }
}

/// Typed view of an [`EventRecord`].
#[derive(Debug, Clone, PartialEq)]
pub struct Event<P> {
    /// Key of the record.
    pub key: MessageKey,
    /// Name of the event.
    pub name: EventName,
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
    /// Decoded payload; `None` for tombstones.
    pub payload: Option<P>,
}

impl<P> Event<P>
where
    P: Serialize + DeserializeOwned,
{
    /// Decodes the payload of a wire record.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::Infrastructure`] if the payload does not match `P`.
    pub fn decode(record: &EventRecord) -> Result<Self, DomainError> {
        let payload = record
            .payload
            .as_ref()
            .map(|value| serde_json::from_value(value.clone()))
            .transpose()?;
        Ok(Self {
            key: record.key,
            name: record.name,
            timestamp: record.timestamp,
            payload,
        })
    }

    /// Encodes this event into its wire form.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::Infrastructure`] if the payload cannot be serialized.
    pub fn encode(&self) -> Result<EventRecord, DomainError> {
        let payload = self.payload.as_ref().map(serde_json::to_value).transpose()?;
        Ok(EventRecord {
            key: self.key,
            name: self.name,
            timestamp: self.timestamp,
            payload,
        })
    }
}

/// A record read back from the log together with its position.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumerRecord {
    /// Partition the record was written to.
    pub partition: u32,
    /// Offset of the record; increases monotonically across the log.
    pub offset: i64,
    /// Business transaction the record was written in, if any.
    pub transaction_identifier: Option<Uuid>,
    /// The record itself.
    pub record: EventRecord,
}
