//! Post-commit listeners for tests.

use std::sync::Mutex;

use async_trait::async_trait;
use smartsite_core::bus::EventListener;
use smartsite_core::error::DomainError;
use smartsite_core::persistence::PendingRecord;

/// A listener that records every committed batch.
#[derive(Debug, Default)]
pub struct RecordingListener {
    batches: Mutex<Vec<Vec<PendingRecord>>>,
}

impl RecordingListener {
    /// Creates an empty listener.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every batch received so far, oldest first.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn batches(&self) -> Vec<Vec<PendingRecord>> {
        self.batches.lock().unwrap().clone()
    }

    /// Returns all records received so far, flattened.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn records(&self) -> Vec<PendingRecord> {
        self.batches.lock().unwrap().iter().flatten().cloned().collect()
    }
}

#[async_trait]
impl EventListener for RecordingListener {
    async fn on_committed(&self, records: &[PendingRecord]) -> Result<(), DomainError> {
        self.batches.lock().unwrap().push(records.to_vec());
        Ok(())
    }
}

/// A listener that fails on every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingListener;

#[async_trait]
impl EventListener for FailingListener {
    async fn on_committed(&self, _records: &[PendingRecord]) -> Result<(), DomainError> {
        Err(DomainError::Infrastructure(
            "listener unavailable".to_string(),
        ))
    }
}
