//! Event-sourced snapshot and command pipeline shared by all Smartsite
//! services.
//!
//! Commands are applied to immutable snapshots by a [`command::CommandHandler`],
//! which emits the resulting event on the [`bus::LocalEventBus`]. The bus
//! appends the event to the log and applies it to the
//! [`store::SnapshotStore`]s of the service inside one [`uow::UnitOfWork`].
//! Replaying the log through [`restore`] rebuilds the same state from
//! scratch.

pub mod bus;
pub mod cache;
pub mod clock;
pub mod command;
pub mod consumer;
pub mod error;
pub mod event;
pub mod identifier;
pub mod mapper;
pub mod memory;
pub mod persistence;
pub mod restore;
pub mod retry;
pub mod snapshot;
pub mod store;
pub mod transaction;
pub mod uow;

#[cfg(test)]
mod testing;
