//! Perceptual duplicate detection for art posts relayed into Discord forum threads.
//!
//! Images are fingerprinted twice (a DCT phash and a gradient dhash). A post is
//! refused when the same guild already has a record whose phash and dhash are both
//! within their Hamming thresholds. Records are written only after the post went
//! out, so every record points at a real message.

pub mod config;
pub mod context;
pub mod error;
pub mod fingerprint;
pub mod guard;
pub mod hashing;
pub mod index;
pub mod models;
pub mod pipeline;
pub mod store;

pub use config::{GuardCfg, Thresholds};
pub use context::AppContext;
pub use error::{GuardError, PipelineError};
pub use fingerprint::Fingerprint;
pub use guard::{AcceptToken, DuplicateGuard, PostLocation, Verdict};
pub use hashing::{HashComputer, ImageHashes};
pub use index::SimilarityIndex;
pub use models::{ImageRecord, NewImage, Platform};
pub use pipeline::{PostOutcome, PostRequest, PostingPipeline};
pub use store::{ImageStore, MemoryStore, SqliteStore};
