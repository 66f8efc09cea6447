//! Service configuration read from the environment.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use smartsite_core::consumer::ConsumerPoolConfig;
use smartsite_core::retry::RetryPolicy;

use crate::error::AppError;

/// Configuration of the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    /// PostgreSQL connection string (`DATABASE_URL`, required).
    pub database_url: String,
    /// Address to bind (`HOST`, default `0.0.0.0`).
    pub host: String,
    /// Port to bind (`PORT`, default 3000).
    pub port: u16,
    /// Size of the connection pool (`DATABASE_MAX_CONNECTIONS`, default 10).
    pub database_max_connections: u32,
    /// Replay workers (`CONSUMER_WORKERS`, default 4).
    pub consumer_workers: usize,
    /// Retries per record before it is parked (`RETRY_MAX_ATTEMPTS`, default 3).
    pub retry_max_attempts: u32,
    /// First retry delay (`RETRY_INITIAL_DELAY_MS`, default 100).
    pub retry_initial_delay: Duration,
    /// Rebuild the database from the event log before serving
    /// (`RESTORE_DB_ON_STARTUP`, default false).
    pub restore_db_on_startup: bool,
    /// How often restore re-reads the log for offsets the online path has
    /// reached (`RESTORE_OFFSET_POLL_MS`, default 100).
    pub restore_offset_poll: Duration,
    /// OTLP collector (`OTEL_EXPORTER_OTLP_ENDPOINT`); telemetry export is
    /// off without it.
    pub otlp_endpoint: Option<String>,
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, AppError>
where
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| AppError::Config(format!("{key} is invalid: {e}"))),
    }
}

impl ServiceConfig {
    /// Reads the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if a variable is missing or malformed.
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the configuration through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if a variable is missing or malformed.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let database_url = lookup("DATABASE_URL")
            .ok_or_else(|| AppError::Config("DATABASE_URL must be set".to_string()))?;
        let consumer_workers: usize = parse_or(&lookup, "CONSUMER_WORKERS", 4)?;
        if consumer_workers == 0 {
            return Err(AppError::Config(
                "CONSUMER_WORKERS must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            database_url,
            host: lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_or(&lookup, "PORT", 3000)?,
            database_max_connections: parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", 10)?,
            consumer_workers,
            retry_max_attempts: parse_or(&lookup, "RETRY_MAX_ATTEMPTS", 3)?,
            retry_initial_delay: Duration::from_millis(parse_or(
                &lookup,
                "RETRY_INITIAL_DELAY_MS",
                100,
            )?),
            restore_db_on_startup: parse_or(&lookup, "RESTORE_DB_ON_STARTUP", false)?,
            restore_offset_poll: Duration::from_millis(parse_or(
                &lookup,
                "RESTORE_OFFSET_POLL_MS",
                100,
            )?),
            otlp_endpoint: lookup("OTEL_EXPORTER_OTLP_ENDPOINT").filter(|e| !e.is_empty()),
        })
    }

    /// The address to listen on.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if `HOST` and `PORT` do not form an address.
    pub fn socket_addr(&self) -> Result<SocketAddr, AppError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| AppError::Config(format!("invalid HOST:PORT combination: {e}")))
    }

    /// Retry policy of the replay workers.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::builder()
            .max_retries(self.retry_max_attempts)
            .initial_delay(self.retry_initial_delay)
            .build()
    }

    /// Sizing of the replay worker pool.
    #[must_use]
    pub fn pool_config(&self) -> ConsumerPoolConfig {
        ConsumerPoolConfig {
            workers: self.consumer_workers,
            ..ConsumerPoolConfig::default()
        }
    }
}
