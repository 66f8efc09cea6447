//! Names of the tables shared by every service.
//!
//! The DDL lives in the workspace `migrations/` directory.

/// Tombstone markers of deleted aggregates, keyed by projection table.
pub const TOMBSTONE_TABLE: &str = "snapshot_tombstone";

/// The durable event log.
pub const EVENT_LOG_TABLE: &str = "event_log";

/// Columns selected for a projection row, in decoding order.
pub(crate) const ROW_COLUMNS: &str =
    "identifier, root_context_identifier, version, last_modified, body";

/// Columns selected for a log record, in decoding order.
pub(crate) const LOG_COLUMNS: &str = "log_offset, partition_number, transaction_identifier, \
     root_context_identifier, aggregate_type, aggregate_identifier, aggregate_version, \
     event_name, occurred_at, payload";
