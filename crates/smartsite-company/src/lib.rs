//! Smartsite company context.
//!
//! Owns the company and employee aggregates and the employable user
//! projection, which combines user data with the user's current employment.

pub mod application;
pub mod domain;
