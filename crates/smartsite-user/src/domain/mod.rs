//! Domain model of the user context.

pub mod aggregates;
pub mod commands;
pub mod events;
