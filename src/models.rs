use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::fingerprint::Fingerprint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Pixiv,
    Bluesky,
    Unknown,
}

impl Platform {
    pub fn detect(link: &str) -> Self {
        if link.contains("pixiv.net") {
            Platform::Pixiv
        } else if link.contains("bsky.app") {
            Platform::Bluesky
        } else {
            Platform::Unknown
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Platform::Pixiv => "pixiv",
            Platform::Bluesky => "bluesky",
            Platform::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = std::convert::Infallible;

    // Anything we do not recognise is kept as provenance "unknown".
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "pixiv" => Platform::Pixiv,
            "bluesky" => Platform::Bluesky,
            _ => Platform::Unknown,
        })
    }
}

/// A persisted fact that this perceptual content was posted in a guild.
/// Append-only: never updated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageRecord {
    pub id: i64,
    /// Stored hex form. Decoded on demand so a corrupt row can be isolated.
    pub phash: String,
    pub dhash: String,
    pub source_url: String,
    pub source_platform: Platform,
    pub guild_id: u64,
    pub thread_id: u64,
    pub message_id: u64,
    pub posted_at: DateTime<Utc>,
}

impl ImageRecord {
    pub fn phash_fingerprint(&self) -> Result<Fingerprint> {
        Fingerprint::from_hex(&self.phash)
    }

    pub fn dhash_fingerprint(&self) -> Result<Fingerprint> {
        Fingerprint::from_hex(&self.dhash)
    }

    /// Link to the first successful post of this content.
    pub fn jump_url(&self) -> String {
        format!(
            "https://discord.com/channels/{}/{}/{}",
            self.guild_id, self.thread_id, self.message_id
        )
    }
}

/// Everything a store needs to create an `ImageRecord`; the id and
/// `posted_at` are assigned on insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewImage {
    pub phash: Fingerprint,
    pub dhash: Fingerprint,
    pub source_url: String,
    pub source_platform: Platform,
    pub guild_id: u64,
    pub thread_id: u64,
    pub message_id: u64,
}
