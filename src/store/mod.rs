//! Durable storage for image records.
//!
//! The store is the source of truth; the similarity index only caches
//! fingerprints loaded from it.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{ImageRecord, NewImage};

/// A stored phash as it sits on disk, not yet decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFingerprint {
    pub id: i64,
    pub phash: String,
}

#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Persist a record and return it with its assigned id and timestamp.
    async fn insert(&self, image: NewImage) -> Result<ImageRecord>;

    /// Every stored phash, ascending by id.
    async fn load_fingerprints(&self) -> Result<Vec<StoredFingerprint>>;

    /// Full records for `ids`, ascending by id. Unknown ids are ignored.
    async fn fetch(&self, ids: &[i64]) -> Result<Vec<ImageRecord>>;

    async fn count(&self) -> Result<u64>;

    /// Cheap round trip proving the store answers. Fails with `StorageUnavailable`.
    async fn ping(&self) -> Result<()>;

    async fn close(&self) {}
}
