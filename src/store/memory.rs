use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use super::{ImageStore, StoredFingerprint};
use crate::error::{GuardError, Result};
use crate::models::{ImageRecord, NewImage};

/// Non-durable store for tests and dry runs.
///
/// `set_unavailable(true)` makes every call fail with `StorageUnavailable`,
/// which is how callers' fail-closed paths get exercised.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<Vec<ImageRecord>>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(GuardError::StorageUnavailable("memory store switched off".into()));
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn push_raw(&self, record: ImageRecord) {
        self.records.lock().push(record);
    }
}

#[async_trait]
impl ImageStore for MemoryStore {
    async fn insert(&self, image: NewImage) -> Result<ImageRecord> {
        self.ensure_available()?;
        let mut records = self.records.lock();
        let id = records.last().map_or(1, |r| r.id + 1);
        let record = ImageRecord {
            id,
            phash: image.phash.to_hex(),
            dhash: image.dhash.to_hex(),
            source_url: image.source_url,
            source_platform: image.source_platform,
            guild_id: image.guild_id,
            thread_id: image.thread_id,
            message_id: image.message_id,
            posted_at: Utc::now(),
        };
        records.push(record.clone());
        Ok(record)
    }

    async fn load_fingerprints(&self) -> Result<Vec<StoredFingerprint>> {
        self.ensure_available()?;
        Ok(self
            .records
            .lock()
            .iter()
            .map(|r| StoredFingerprint { id: r.id, phash: r.phash.clone() })
            .collect())
    }

    async fn fetch(&self, ids: &[i64]) -> Result<Vec<ImageRecord>> {
        self.ensure_available()?;
        Ok(self
            .records
            .lock()
            .iter()
            .filter(|r| ids.contains(&r.id))
            .cloned()
            .collect())
    }

    async fn count(&self) -> Result<u64> {
        self.ensure_available()?;
        Ok(self.records.lock().len() as u64)
    }

    async fn ping(&self) -> Result<()> {
        self.ensure_available()
    }
}
