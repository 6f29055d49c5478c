use thiserror::Error;

pub type Result<T, E = GuardError> = std::result::Result<T, E>;

/// Faults raised while deciding whether an image was already posted.
///
/// A duplicate is not a fault; it comes back as `Verdict::Reject`.
#[derive(Debug, Error)]
pub enum GuardError {
    /// The bytes could not be turned into a raster image. The post must be refused.
    #[error("image could not be decoded: {0}")]
    Decode(String),

    /// The durable store could not be reached. Callers fail closed.
    #[error("image store unavailable: {0}")]
    StorageUnavailable(String),

    /// A fingerprint string did not decode to the expected width.
    #[error("malformed fingerprint {value:?}: {reason}")]
    MalformedFingerprint { value: String, reason: String },
}

impl From<image::ImageError> for GuardError {
    fn from(e: image::ImageError) -> Self {
        Self::Decode(e.to_string())
    }
}

impl From<sqlx::Error> for GuardError {
    fn from(e: sqlx::Error) -> Self {
        Self::StorageUnavailable(e.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for GuardError {
    fn from(e: sqlx::migrate::MigrateError) -> Self {
        Self::StorageUnavailable(format!("migration failed: {e}"))
    }
}

/// Failures of the posting flow around the guard.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Guard(#[from] GuardError),

    #[error("unsupported link {0:?}: only pixiv and bluesky posts are accepted")]
    UnsupportedLink(String),

    #[error("no target threads given")]
    NoThreads,

    #[error("fetching {link} failed: {reason}")]
    Fetch { link: String, reason: String },

    /// Some thread sends failed; `delivered` lists the ones that went out.
    #[error("sending to thread {thread_id} failed after {} deliveries: {reason}", .delivered.len())]
    Send {
        thread_id: u64,
        reason: String,
        delivered: Vec<crate::pipeline::PostedMessage>,
    },

    /// Every thread received the post but recording it failed; the post is live
    /// and unrecorded.
    #[error("recording the post failed after {} deliveries: {source}", .delivered.len())]
    Register {
        #[source]
        source: GuardError,
        delivered: Vec<crate::pipeline::PostedMessage>,
    },
}
