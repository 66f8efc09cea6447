//! `PostgreSQL` implementation of the Smartsite persistence ports.

pub mod pg_backend;
pub mod schema;

pub use pg_backend::PgBackend;
