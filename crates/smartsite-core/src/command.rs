//! Fluent command handling on top of a snapshot.
//!
//! ```ignore
//! let outcome = CommandHandler::of(current)
//!     .assert_version_matches(command.expected_version)
//!     .check_precondition(|c| !c.name.is_empty(), "name must not be empty")
//!     .update(|c| CompanySnapshot { name: command.name, ..c })
//!     .emit_event(EventName::Updated)
//!     .if_snapshot_was_changed()
//!     .to(&bus, &mut uow)
//!     .await?;
//! ```

use crate::bus::LocalEventBus;
use crate::error::DomainError;
use crate::event::{EventKind, EventName, EventRecord};
use crate::identifier::MessageKey;
use crate::snapshot::VersionedSnapshot;
use crate::uow::UnitOfWork;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Emission {
    Event(EventName),
    Tombstone,
}

/// Result of a handled command.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandOutcome<S> {
    /// The snapshot after the command; carries the new version.
    pub snapshot: S,
    /// The emitted record, or `None` if nothing changed.
    pub event: Option<EventRecord>,
}

impl<S: VersionedSnapshot> CommandOutcome<S> {
    /// Version of the snapshot after the command, usable as an `ETag`.
    pub fn version(&self) -> i64 {
        self.snapshot.identifier().version
    }
}

/// Builder that turns `(current snapshot, command)` into `(next snapshot,
/// emitted event)`.
///
/// The first failed check short-circuits every later step; the failure is
/// reported by [`CommandHandler::to`].
#[must_use]
#[derive(Debug)]
pub struct CommandHandler<S: VersionedSnapshot> {
    original: S,
    snapshot: S,
    failure: Option<DomainError>,
    emission: Option<Emission>,
    only_if_changed: bool,
}

impl<S: VersionedSnapshot> CommandHandler<S> {
    /// Starts handling a command against `snapshot`.
    pub fn of(snapshot: S) -> Self {
        Self {
            original: snapshot.clone(),
            snapshot,
            failure: None,
            emission: None,
            only_if_changed: false,
        }
    }

    /// Fails with [`DomainError::ConcurrencyConflict`] unless the snapshot is
    /// at `expected_version`.
    pub fn assert_version_matches(mut self, expected_version: i64) -> Self {
        let actual = self.original.identifier().version;
        if self.failure.is_none() && actual != expected_version {
            self.failure = Some(DomainError::ConcurrencyConflict {
                aggregate_id: self.original.identifier().identifier,
                expected: expected_version,
                actual,
            });
        }
        self
    }

    /// Fails with [`DomainError::PreconditionViolation`] unless `predicate`
    /// holds for the current snapshot.
    pub fn check_precondition(
        mut self,
        predicate: impl FnOnce(&S) -> bool,
        message: impl Into<String>,
    ) -> Self {
        if self.failure.is_none() && !predicate(&self.snapshot) {
            self.failure = Some(DomainError::PreconditionViolation(message.into()));
        }
        self
    }

    /// Replaces the snapshot with the result of `change`.
    pub fn update(mut self, change: impl FnOnce(S) -> S) -> Self {
        if self.failure.is_none() {
            self.snapshot = change(self.snapshot.clone());
        }
        self
    }

    /// Emits an event of `name` for the aggregate.
    pub fn emit_event(mut self, name: EventName) -> Self {
        self.emission = Some(Emission::Event(name));
        self
    }

    /// Emits a tombstone for the aggregate.
    pub fn emit_tombstone(mut self) -> Self {
        self.emission = Some(Emission::Tombstone);
        self
    }

    /// Skips the emission if [`CommandHandler::update`] left the snapshot
    /// unchanged.
    pub fn if_snapshot_was_changed(mut self) -> Self {
        self.only_if_changed = true;
        self
    }

    /// Emits the event on the bus inside `uow` and returns the new snapshot.
    ///
    /// # Errors
    ///
    /// Returns the first failed check, or any error of the bus.
    pub async fn to(
        self,
        bus: &LocalEventBus,
        uow: &mut UnitOfWork,
    ) -> Result<CommandOutcome<S>, DomainError> {
        if let Some(failure) = self.failure {
            return Err(failure);
        }
        let Some(emission) = self.emission else {
            return Ok(CommandOutcome {
                snapshot: self.original,
                event: None,
            });
        };
        if self.only_if_changed && self.snapshot == self.original {
            return Ok(CommandOutcome {
                snapshot: self.original,
                event: None,
            });
        }

        let next_version = self.original.identifier().version + 1;
        let snapshot = self.snapshot.with_version(next_version);
        let identifier = snapshot.identifier();
        let event = match emission {
            Emission::Event(name) => {
                let kind = EventKind::new(identifier.aggregate_type, name);
                bus.emit(uow, kind, &snapshot).await?
            }
            Emission::Tombstone => {
                let key = MessageKey::new(snapshot.root_context_identifier(), identifier);
                bus.emit_tombstone(uow, key).await?
            }
        };
        Ok(CommandOutcome {
            snapshot,
            event: Some(event),
        })
    }
}
