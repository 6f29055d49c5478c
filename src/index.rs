use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::fingerprint::Fingerprint;
use crate::models::{ImageRecord, NewImage};
use crate::store::ImageStore;

#[derive(Debug, Clone, Copy)]
struct Entry {
    phash: Fingerprint,
    id: i64,
}

/// In-memory phash cache over an `ImageStore`, answering "which records have a
/// phash within the threshold of this one?".
///
/// Readers clone the current snapshot `Arc` and scan without holding the lock.
/// Writers are serialized by `write_gate`, write to the store first, and only
/// then publish a new snapshot, so a failed store write never reaches the cache.
/// Several records may share a phash (same image posted in different guilds).
pub struct SimilarityIndex {
    store: Arc<dyn ImageStore>,
    entries: RwLock<Arc<Vec<Entry>>>,
    write_gate: Mutex<()>,
    threshold: u32,
}

impl SimilarityIndex {
    /// Build the cache eagerly from everything in the store.
    pub async fn load(store: Arc<dyn ImageStore>, threshold: u32) -> Result<Self> {
        let entries = read_entries(store.as_ref()).await?;
        info!(fingerprints = entries.len(), threshold, "similarity index loaded");
        Ok(Self {
            store,
            entries: RwLock::new(Arc::new(entries)),
            write_gate: Mutex::new(()),
            threshold,
        })
    }

    /// Rebuild the cache from the store. Returns the number of cached fingerprints.
    pub async fn reload(&self) -> Result<usize> {
        let _gate = self.write_gate.lock().await;
        let entries = read_entries(self.store.as_ref()).await?;
        let n = entries.len();
        *self.entries.write() = Arc::new(entries);
        info!(fingerprints = n, "similarity index reloaded");
        Ok(n)
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn store(&self) -> &Arc<dyn ImageStore> {
        &self.store
    }

    /// Ids of every cached phash within the threshold, in cache (ascending id) order.
    pub fn candidate_ids(&self, phash: Fingerprint) -> Vec<i64> {
        let snapshot = Arc::clone(&*self.entries.read());
        snapshot
            .iter()
            .filter(|e| e.phash.distance(phash) <= self.threshold)
            .map(|e| e.id)
            .collect()
    }

    /// Records whose phash is within the threshold, from any guild.
    ///
    /// Always consults the store, so an outage surfaces here even when the cache
    /// has no candidates.
    pub async fn find_candidates(&self, phash: Fingerprint) -> Result<Vec<ImageRecord>> {
        let ids = self.candidate_ids(phash);
        if ids.is_empty() {
            self.store.ping().await?;
            return Ok(Vec::new());
        }
        let records = self.store.fetch(&ids).await?;
        debug!(%phash, candidates = records.len(), "phash candidates");
        Ok(records)
    }

    /// Persist `image`, then make it visible to lookups.
    pub async fn insert(&self, image: NewImage) -> Result<ImageRecord> {
        let phash = image.phash;
        let _gate = self.write_gate.lock().await;
        let record = self.store.insert(image).await?;

        let mut entries = self.entries.write();
        Arc::make_mut(&mut *entries).push(Entry { phash, id: record.id });
        Ok(record)
    }
}

async fn read_entries(store: &dyn ImageStore) -> Result<Vec<Entry>> {
    let stored = store.load_fingerprints().await?;
    let mut entries = Vec::with_capacity(stored.len());
    for sf in stored {
        match Fingerprint::from_hex(&sf.phash) {
            Ok(phash) => entries.push(Entry { phash, id: sf.id }),
            Err(e) => warn!(id = sf.id, error = %e, "skipping image record with malformed phash"),
        }
    }
    Ok(entries)
}
