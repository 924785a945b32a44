//! Cross-thread handoff points
//!
//! - `FeatureSlot`: producer -> cycle, latest record wins
//! - `PublishedView`: cycle -> UI, readers get a consistent `Arc` snapshot
//! - `ConfigSlot`: UI -> cycle, validated on submit and picked up at a cycle boundary

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::types::FeatureRecord;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

/// Single-value mailbox from the vision producer
#[derive(Debug, Default)]
pub struct FeatureSlot {
    latest: Mutex<Option<FeatureRecord>>,
}

impl FeatureSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a record, replacing any the cycle has not consumed yet
    pub fn put(&self, record: FeatureRecord) {
        let mut latest = self.latest.lock().unwrap_or_else(|e| e.into_inner());
        if latest.is_some() {
            log::debug!("feature record overwritten before it was consumed");
        }
        *latest = Some(record);
    }

    /// Take the latest record, leaving the slot empty
    pub fn take(&self) -> Option<FeatureRecord> {
        self.latest
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }
}

/// Versioned, copy-on-publish view for readers on other threads
#[derive(Debug)]
pub struct PublishedView<T> {
    current: Arc<RwLock<Arc<T>>>,
    version: Arc<AtomicU64>,
}

impl<T> Clone for PublishedView<T> {
    fn clone(&self) -> Self {
        Self {
            current: Arc::clone(&self.current),
            version: Arc::clone(&self.version),
        }
    }
}

impl<T> PublishedView<T> {
    pub fn new(initial: T) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(initial))),
            version: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Replace the published value; readers holding the old `Arc` are unaffected
    pub fn publish(&self, value: T) {
        let next = Arc::new(value);
        let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
        *current = next;
        self.version.fetch_add(1, Ordering::Release);
    }

    pub fn read(&self) -> Arc<T> {
        Arc::clone(&self.current.read().unwrap_or_else(|e| e.into_inner()))
    }

    /// Number of publishes so far
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }
}

/// Staged configuration waiting for the next cycle boundary
#[derive(Debug, Default)]
pub struct ConfigSlot {
    staged: Mutex<Option<EngineConfig>>,
}

impl ConfigSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and stage; an invalid configuration leaves the slot untouched
    pub fn submit(&self, config: EngineConfig) -> Result<(), EngineError> {
        config.validate()?;
        *self.staged.lock().unwrap_or_else(|e| e.into_inner()) = Some(config);
        Ok(())
    }

    pub fn take(&self) -> Option<EngineConfig> {
        self.staged
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }
}
