//! Aggregates, commands and event mappers of the company context.

pub mod aggregates;
pub mod commands;
pub mod events;
