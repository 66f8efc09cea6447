//! Event mappers and the registry that resolves exactly one mapper per event
//! kind.
//!
//! Mappers are registered explicitly at startup through
//! [`MapperRegistry::builder`] and the finished registry is handed to the
//! [`LocalEventBus`](crate::bus::LocalEventBus) by composition.

use std::any::{Any, type_name};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::DomainError;
use crate::event::{EventKind, EventRecord};
use crate::identifier::MessageKey;

/// Converts a typed message into the key and value of a log record.
pub trait EventMapper: Send + Sync + 'static {
    /// The message type this mapper understands.
    type Message: Send + Sync + 'static;

    /// Returns `true` if this mapper is responsible for the event kind.
    fn can_map(&self, kind: EventKind) -> bool;

    /// Builds the record key for the message.
    fn map_to_key(&self, kind: EventKind, message: &Self::Message) -> MessageKey;

    /// Builds the record payload for the message; `None` produces a tombstone.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be serialized.
    fn map_to_value(
        &self,
        kind: EventKind,
        message: &Self::Message,
    ) -> Result<Option<serde_json::Value>, DomainError>;

    /// The point in time the message describes.
    fn occurred_at(&self, message: &Self::Message) -> DateTime<Utc>;
}

trait ErasedMapper: Send + Sync {
    fn mapper_name(&self) -> &'static str;

    fn can_map(&self, kind: EventKind) -> bool;

    fn map(&self, kind: EventKind, message: &dyn Any) -> Result<EventRecord, DomainError>;
}

impl<M: EventMapper> ErasedMapper for M {
    fn mapper_name(&self) -> &'static str {
        type_name::<M>()
    }

    fn can_map(&self, kind: EventKind) -> bool {
        EventMapper::can_map(self, kind)
    }

    fn map(&self, kind: EventKind, message: &dyn Any) -> Result<EventRecord, DomainError> {
        let message = message.downcast_ref::<M::Message>().ok_or_else(|| {
            DomainError::Infrastructure(format!(
                "mapper {} expects a {} message for {kind}",
                type_name::<M>(),
                type_name::<M::Message>()
            ))
        })?;
        Ok(EventRecord {
            key: self.map_to_key(kind, message),
            name: kind.name,
            timestamp: self.occurred_at(message),
            payload: self.map_to_value(kind, message)?,
        })
    }
}

/// Registry of all event mappers of a service.
#[derive(Clone, Default)]
pub struct MapperRegistry {
    mappers: Vec<Arc<dyn ErasedMapper>>,
}

impl fmt::Debug for MapperRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.mappers.iter().map(|m| m.mapper_name()))
            .finish()
    }
}

/// A mapper resolved for one event kind.
pub struct ResolvedMapper<'a> {
    kind: EventKind,
    mapper: &'a dyn ErasedMapper,
}

impl ResolvedMapper<'_> {
    /// Type name of the resolved mapper.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.mapper.mapper_name()
    }

    /// Maps the message into a record.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::Infrastructure`] if the message has the wrong type
    /// for this mapper or cannot be serialized.
    pub fn map<T: Any>(&self, message: &T) -> Result<EventRecord, DomainError> {
        self.mapper.map(self.kind, message)
    }
}

impl MapperRegistry {
    /// Starts building a registry.
    #[must_use]
    pub fn builder() -> MapperRegistryBuilder {
        MapperRegistryBuilder::default()
    }

    /// Number of registered mappers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.mappers.len()
    }

    /// Returns `true` if no mapper is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mappers.is_empty()
    }

    /// Resolves the single mapper claiming `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::MapperNotFound`] if no mapper claims the kind and
    /// [`DomainError::AmbiguousMapper`] if more than one does.
    pub fn resolve(&self, kind: EventKind) -> Result<ResolvedMapper<'_>, DomainError> {
        let mut matching = self.mappers.iter().filter(|m| m.can_map(kind));
        let Some(first) = matching.next() else {
            return Err(DomainError::MapperNotFound(kind));
        };
        let others = matching.count();
        if others > 0 {
            return Err(DomainError::AmbiguousMapper {
                kind,
                matches: others + 1,
            });
        }
        Ok(ResolvedMapper {
            kind,
            mapper: first.as_ref(),
        })
    }

    /// Resolves the mapper for `kind` and maps the message into a record.
    ///
    /// # Errors
    ///
    /// Fails like [`MapperRegistry::resolve`] and [`ResolvedMapper::map`].
    pub fn map<T: Any>(&self, kind: EventKind, message: &T) -> Result<EventRecord, DomainError> {
        self.resolve(kind)?.map(message)
    }
}

/// Builder for [`MapperRegistry`].
#[derive(Default)]
pub struct MapperRegistryBuilder {
    mappers: Vec<Arc<dyn ErasedMapper>>,
}

impl MapperRegistryBuilder {
    /// Registers a mapper.
    #[must_use]
    pub fn register<M: EventMapper>(mut self, mapper: M) -> Self {
        self.mappers.push(Arc::new(mapper));
        self
    }

    /// Finishes the registry.
    #[must_use]
    pub fn build(self) -> MapperRegistry {
        MapperRegistry {
            mappers: self.mappers,
        }
    }
}
