//! Fixtures shared by the unit tests of this crate.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;
use crate::event::{Event, EventKind, EventName, EventRecord};
use crate::identifier::{AggregateIdentifier, AggregateType, MessageKey};
use crate::mapper::EventMapper;
use crate::snapshot::{SnapshotProjector, VersionedSnapshot};

pub(crate) const NOTE_TABLE: &str = "note";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct NoteSnapshot {
    pub identifier: AggregateIdentifier,
    pub root_context_identifier: Uuid,
    pub text: String,
    pub last_modified_date: DateTime<Utc>,
}

impl NoteSnapshot {
    pub fn new(text: &str) -> Self {
        let id = Uuid::new_v4();
        Self {
            identifier: AggregateIdentifier::unsaved(AggregateType::Company, id),
            root_context_identifier: id,
            text: text.to_string(),
            last_modified_date: at(0),
        }
    }
}

impl VersionedSnapshot for NoteSnapshot {
    fn identifier(&self) -> AggregateIdentifier {
        self.identifier
    }

    fn root_context_identifier(&self) -> Uuid {
        self.root_context_identifier
    }

    fn last_modified_date(&self) -> DateTime<Utc> {
        self.last_modified_date
    }

    fn with_version(self, version: i64) -> Self {
        Self {
            identifier: self.identifier.with_version(version),
            ..self
        }
    }
}

pub(crate) struct NoteProjector;

impl SnapshotProjector for NoteProjector {
    type Snapshot = NoteSnapshot;

    fn aggregate_type(&self) -> AggregateType {
        AggregateType::Company
    }

    fn table(&self) -> &'static str {
        NOTE_TABLE
    }

    fn handles(&self, kind: EventKind) -> bool {
        kind.aggregate_type == AggregateType::Company
            && matches!(
                kind.name,
                EventName::Created | EventName::Updated | EventName::Deleted
            )
    }

    fn project(
        &self,
        record: &EventRecord,
        _current: Option<&NoteSnapshot>,
    ) -> Result<NoteSnapshot, DomainError> {
        let event = Event::<NoteSnapshot>::decode(record)?;
        let snapshot = event
            .payload
            .ok_or_else(|| DomainError::Validation("note event without payload".to_string()))?;
        Ok(snapshot.with_version(record.version()))
    }
}

pub(crate) struct NoteMapper;

impl EventMapper for NoteMapper {
    type Message = NoteSnapshot;

    fn can_map(&self, kind: EventKind) -> bool {
        NoteProjector.handles(kind)
    }

    fn map_to_key(&self, _kind: EventKind, message: &NoteSnapshot) -> MessageKey {
        MessageKey::new(message.root_context_identifier, message.identifier)
    }

    fn map_to_value(
        &self,
        kind: EventKind,
        message: &NoteSnapshot,
    ) -> Result<Option<serde_json::Value>, DomainError> {
        if kind.name == EventName::Deleted {
            return Ok(None);
        }
        Ok(Some(serde_json::to_value(message)?))
    }

    fn occurred_at(&self, message: &NoteSnapshot) -> DateTime<Utc> {
        message.last_modified_date
    }
}

pub(crate) fn at(minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 15, 10, minute, 0).unwrap()
}

/// A record for `note` at `version`, as the note mapper would produce it.
pub(crate) fn note_record(
    note: &NoteSnapshot,
    version: i64,
    name: EventName,
    minute: u32,
) -> EventRecord {
    let snapshot = NoteSnapshot {
        last_modified_date: at(minute),
        ..note.clone()
    }
    .with_version(version);
    let key = MessageKey::new(snapshot.root_context_identifier, snapshot.identifier);
    if name == EventName::Deleted {
        return EventRecord::tombstone(key, at(minute));
    }
    EventRecord::new(key, name, at(minute), serde_json::to_value(&snapshot).unwrap())
}
