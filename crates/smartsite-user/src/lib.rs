//! Smartsite user context.
//!
//! Owns the user aggregate. Users are keyed by themselves, so every user
//! lives on its own partition of the event log.

pub mod application;
pub mod domain;
