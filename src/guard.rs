use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::Thresholds;
use crate::error::{GuardError, Result};
use crate::fingerprint::Fingerprint;
use crate::hashing::{HashComputer, ImageHashes};
use crate::index::SimilarityIndex;
use crate::models::{ImageRecord, NewImage, Platform};

/// Proof that a check accepted an image in a guild.
///
/// Only `DuplicateGuard` can create one and `register` consumes it, so an image
/// can only be registered after it was checked. Carries the computed hashes so
/// they are not recomputed.
#[derive(Debug)]
#[must_use = "an accepted image must be registered once it has been posted"]
pub struct AcceptToken {
    guild_id: u64,
    hashes: ImageHashes,
}

impl AcceptToken {
    pub fn guild_id(&self) -> u64 {
        self.guild_id
    }

    pub fn phash(&self) -> Fingerprint {
        self.hashes.phash
    }

    pub fn dhash(&self) -> Fingerprint {
        self.hashes.dhash
    }
}

#[derive(Debug)]
pub enum Verdict {
    Accept(AcceptToken),
    /// The first stored record (index order) that passed both thresholds.
    Reject(ImageRecord),
}

impl Verdict {
    pub fn is_accept(&self) -> bool {
        matches!(self, Verdict::Accept(_))
    }
}

/// Where an accepted image ended up; the first successful thread post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostLocation {
    pub source_url: String,
    pub platform: Platform,
    pub thread_id: u64,
    pub message_id: u64,
}

/// Per-guild duplicate decision: phash candidates from the index, confirmed by
/// requiring both the phash and the dhash to be within their thresholds.
///
/// Two concurrent checks of the same image in the same guild may both accept;
/// the window between `check` and `register` is not closed here.
pub struct DuplicateGuard {
    index: Arc<SimilarityIndex>,
    hasher: HashComputer,
    thresholds: Thresholds,
}

impl DuplicateGuard {
    pub fn new(index: Arc<SimilarityIndex>, thresholds: Thresholds) -> Self {
        Self { index, hasher: HashComputer::new(), thresholds }
    }

    pub fn index(&self) -> &Arc<SimilarityIndex> {
        &self.index
    }

    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    /// Hash `bytes` off the async executor.
    pub async fn hash(&self, bytes: &[u8]) -> Result<ImageHashes> {
        let hasher = self.hasher;
        let bytes = bytes.to_vec();
        tokio::task::spawn_blocking(move || hasher.compute(&bytes))
            .await
            .map_err(|e| GuardError::Decode(format!("hashing task failed: {e}")))?
    }

    pub async fn check(&self, guild_id: u64, bytes: &[u8]) -> Result<Verdict> {
        let hashes = self.hash(bytes).await?;
        self.check_hashes(guild_id, hashes).await
    }

    /// Decide for already computed fingerprints.
    pub async fn check_hashes(&self, guild_id: u64, hashes: ImageHashes) -> Result<Verdict> {
        let candidates = self.index.find_candidates(hashes.phash).await?;

        for record in candidates.into_iter().filter(|r| r.guild_id == guild_id) {
            if self.confirms(&record, hashes) {
                debug!(guild_id, record_id = record.id, phash = %hashes.phash, "duplicate");
                return Ok(Verdict::Reject(record));
            }
        }
        debug!(guild_id, phash = %hashes.phash, dhash = %hashes.dhash, "accepted");
        Ok(Verdict::Accept(AcceptToken { guild_id, hashes }))
    }

    fn confirms(&self, record: &ImageRecord, hashes: ImageHashes) -> bool {
        let stored = record
            .phash_fingerprint()
            .and_then(|p| Ok((p, record.dhash_fingerprint()?)));
        match stored {
            Ok((phash, dhash)) => {
                phash.distance(hashes.phash) <= self.thresholds.phash
                    && dhash.distance(hashes.dhash) <= self.thresholds.dhash
            }
            Err(e) => {
                warn!(record_id = record.id, error = %e, "skipping image record with malformed fingerprint");
                false
            }
        }
    }

    /// Record that accepted content was posted. Call only after the post went out.
    pub async fn register(&self, token: AcceptToken, at: PostLocation) -> Result<ImageRecord> {
        let record = self
            .index
            .insert(NewImage {
                phash: token.hashes.phash,
                dhash: token.hashes.dhash,
                source_url: at.source_url,
                source_platform: at.platform,
                guild_id: token.guild_id,
                thread_id: at.thread_id,
                message_id: at.message_id,
            })
            .await?;
        info!(
            record_id = record.id,
            guild_id = record.guild_id,
            thread_id = record.thread_id,
            "registered posted image"
        );
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ImageStore, MemoryStore};

    const G1: u64 = 1001;

    fn hashes(phash: u64, dhash: u64) -> ImageHashes {
        ImageHashes { phash: Fingerprint::from_bits(phash), dhash: Fingerprint::from_bits(dhash) }
    }

    fn at(thread_id: u64, message_id: u64) -> PostLocation {
        PostLocation {
            source_url: "https://www.pixiv.net/en/artworks/9".into(),
            platform: Platform::Pixiv,
            thread_id,
            message_id,
        }
    }

    async fn guard_over(store: &Arc<MemoryStore>) -> DuplicateGuard {
        let index = SimilarityIndex::load(store.clone() as Arc<dyn ImageStore>, 8).await.unwrap();
        DuplicateGuard::new(Arc::new(index), Thresholds::default())
    }

    async fn accept(guard: &DuplicateGuard, guild: u64, h: ImageHashes) -> AcceptToken {
        match guard.check_hashes(guild, h).await.unwrap() {
            Verdict::Accept(token) => token,
            Verdict::Reject(rec) => panic!("unexpected reject: {rec:?}"),
        }
    }

    #[tokio::test]
    async fn token_carries_computed_hashes() {
        let store = Arc::new(MemoryStore::new());
        let guard = guard_over(&store).await;
        let token = accept(&guard, G1, hashes(0xAAAA, 0xBBBB)).await;
        assert_eq!(token.guild_id(), G1);
        assert_eq!(token.phash(), Fingerprint::from_bits(0xAAAA));
        assert_eq!(token.dhash(), Fingerprint::from_bits(0xBBBB));
    }

    #[tokio::test]
    async fn dhash_is_a_second_gate() {
        let store = Arc::new(MemoryStore::new());
        let guard = guard_over(&store).await;
        let token = accept(&guard, G1, hashes(0, 0)).await;
        guard.register(token, at(1, 2)).await.unwrap();

        // phash 3 bits off, dhash 11 bits off: not a duplicate.
        assert!(guard.check_hashes(G1, hashes(0b111, 0x7FF)).await.unwrap().is_accept());
        // Both within bounds (8 and 10): duplicate.
        assert!(!guard.check_hashes(G1, hashes(0xFF, 0x3FF)).await.unwrap().is_accept());
        // phash just outside: never a candidate.
        assert!(guard.check_hashes(G1, hashes(0x1FF, 0)).await.unwrap().is_accept());
    }

    #[tokio::test]
    async fn first_matching_record_wins() {
        let store = Arc::new(MemoryStore::new());
        let guard = guard_over(&store).await;
        let t1 = accept(&guard, G1, hashes(0, 0)).await;
        let t2 = accept(&guard, G1, hashes(1, 1)).await;
        let first = guard.register(t1, at(10, 20)).await.unwrap();
        guard.register(t2, at(30, 40)).await.unwrap();

        match guard.check_hashes(G1, hashes(0, 1)).await.unwrap() {
            Verdict::Reject(rec) => assert_eq!(rec, first),
            Verdict::Accept(_) => panic!("expected reject"),
        }
    }

    #[tokio::test]
    async fn corrupt_dhash_is_skipped_not_fatal() {
        let store = Arc::new(MemoryStore::new());
        let guard = guard_over(&store).await;
        let token = accept(&guard, G1, hashes(0, 0)).await;
        let mut rec = guard.register(token, at(1, 2)).await.unwrap();

        rec.id += 1;
        rec.dhash = "abc".into();
        store.push_raw(rec);
        guard.index().reload().await.unwrap();

        let token = accept(&guard, G1, hashes(0, 0xFFFF_FFFF)).await;
        assert_eq!(token.phash(), Fingerprint::from_bits(0));
    }

    #[tokio::test]
    async fn store_outage_fails_closed() {
        let store = Arc::new(MemoryStore::new());
        let guard = guard_over(&store).await;
        let token = accept(&guard, G1, hashes(0, 0)).await;
        guard.register(token, at(1, 2)).await.unwrap();

        store.set_unavailable(true);
        let err = guard.check_hashes(G1, hashes(0, 0)).await.unwrap_err();
        assert!(matches!(err, GuardError::StorageUnavailable(_)));
    }

    #[tokio::test]
    async fn store_outage_fails_closed_on_an_empty_index() {
        let store = Arc::new(MemoryStore::new());
        let guard = guard_over(&store).await;

        store.set_unavailable(true);
        let err = guard.check_hashes(G1, hashes(0x1234, 0x5678)).await.unwrap_err();
        assert!(matches!(err, GuardError::StorageUnavailable(_)));
    }

    #[tokio::test]
    async fn undecodable_bytes_are_refused() {
        let store = Arc::new(MemoryStore::new());
        let guard = guard_over(&store).await;
        let err = guard.check(G1, b"\x89PNG broken").await.unwrap_err();
        assert!(matches!(err, GuardError::Decode(_)));
    }
}
