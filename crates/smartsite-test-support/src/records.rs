//! Builders for log records.

use serde_json::Value;
use smartsite_core::event::{ConsumerRecord, EventName, EventRecord};
use smartsite_core::identifier::{AggregateIdentifier, MessageKey};
use smartsite_core::memory::DEFAULT_PARTITIONS;

use crate::clock::fixed_time;

/// A record for `aggregate` in root context `root`, stamped `minute`
/// minutes into the fixed test day. `None` payload builds a tombstone.
#[must_use]
pub fn record_for(
    root: uuid::Uuid,
    aggregate: AggregateIdentifier,
    name: EventName,
    minute: u32,
    payload: Option<Value>,
) -> EventRecord {
    let key = MessageKey::new(root, aggregate);
    match payload {
        Some(payload) => EventRecord::new(key, name, fixed_time(minute), payload),
        None => EventRecord::tombstone(key, fixed_time(minute)),
    }
}

/// Wraps records as if they had been read from the log in the given order,
/// with offsets starting at 1.
#[must_use]
pub fn as_consumer_records(records: &[EventRecord]) -> Vec<ConsumerRecord> {
    records
        .iter()
        .zip(1_i64..)
        .map(|(record, offset)| ConsumerRecord {
            partition: record.key.partition(DEFAULT_PARTITIONS),
            offset,
            transaction_identifier: None,
            record: record.clone(),
        })
        .collect()
}
