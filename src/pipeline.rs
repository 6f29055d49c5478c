use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, warn};

use crate::context::AppContext;
use crate::error::PipelineError;
use crate::guard::{DuplicateGuard, PostLocation, Verdict};
use crate::models::{ImageRecord, Platform};

/// Upload cap for guilds at boost tier 2 and above.
pub const BOOSTED_UPLOAD_LIMIT: usize = 52_428_799;
/// Upload cap otherwise.
pub const DEFAULT_UPLOAD_LIMIT: usize = 10_485_759;

pub fn upload_limit(premium_tier: u8) -> usize {
    if premium_tier > 1 { BOOSTED_UPLOAD_LIMIT } else { DEFAULT_UPLOAD_LIMIT }
}

#[derive(Debug, Clone)]
pub struct FetchedImage {
    pub bytes: Vec<u8>,
    pub filename: String,
    pub platform: Platform,
}

/// Platform adapter (Pixiv, Bluesky) returning the original asset of a post.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, link: &str, image_index: Option<u32>) -> anyhow::Result<FetchedImage>;
}

/// What gets sent to each forum thread.
#[derive(Debug, Clone)]
pub struct Post {
    pub link: String,
    pub filename: String,
    /// `None` when the image is over the guild's upload cap; the post is then link-only.
    pub attachment: Option<Vec<u8>>,
}

impl Post {
    pub fn is_fallback(&self) -> bool {
        self.attachment.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PostedMessage {
    pub thread_id: u64,
    pub message_id: u64,
}

#[async_trait]
pub trait ThreadPoster: Send + Sync {
    async fn send(&self, thread_id: u64, post: &Post) -> anyhow::Result<PostedMessage>;
}

#[derive(Debug, Clone)]
pub struct PostRequest {
    pub guild_id: u64,
    pub premium_tier: u8,
    pub link: String,
    pub image_index: Option<u32>,
    pub thread_ids: Vec<u64>,
}

#[derive(Debug)]
pub enum PostOutcome {
    Posted {
        record: ImageRecord,
        messages: Vec<PostedMessage>,
        fallback: bool,
    },
    /// Already posted in this guild; `record.jump_url()` points at the earlier post.
    Duplicate { record: ImageRecord },
}

/// fetch -> check -> send to every thread -> register.
///
/// Registration happens only once every thread received the post, keyed to the
/// first message. If any send fails nothing is registered. Both failure paths
/// after the first send return the messages that went out.
pub struct PostingPipeline {
    guard: Arc<DuplicateGuard>,
    fetcher: Arc<dyn ImageFetcher>,
    poster: Arc<dyn ThreadPoster>,
}

impl PostingPipeline {
    pub fn new(ctx: &AppContext, fetcher: Arc<dyn ImageFetcher>, poster: Arc<dyn ThreadPoster>) -> Self {
        Self { guard: ctx.guard().clone(), fetcher, poster }
    }

    pub async fn post(&self, req: PostRequest) -> Result<PostOutcome, PipelineError> {
        if req.thread_ids.is_empty() {
            return Err(PipelineError::NoThreads);
        }
        if Platform::detect(&req.link) == Platform::Unknown {
            return Err(PipelineError::UnsupportedLink(req.link));
        }

        let fetched = self
            .fetcher
            .fetch(&req.link, req.image_index)
            .await
            .map_err(|e| PipelineError::Fetch { link: req.link.clone(), reason: format!("{e:#}") })?;

        let token = match self.guard.check(req.guild_id, &fetched.bytes).await? {
            Verdict::Accept(token) => token,
            Verdict::Reject(record) => {
                info!(guild_id = req.guild_id, link = %req.link, previous = %record.jump_url(), "duplicate post refused");
                return Ok(PostOutcome::Duplicate { record });
            }
        };

        let fallback = fetched.bytes.len() > upload_limit(req.premium_tier);
        let post = Post {
            link: req.link.clone(),
            filename: fetched.filename,
            attachment: (!fallback).then_some(fetched.bytes),
        };

        let mut delivered: Vec<PostedMessage> = Vec::with_capacity(req.thread_ids.len());
        for &thread_id in &req.thread_ids {
            match self.poster.send(thread_id, &post).await {
                Ok(msg) => delivered.push(msg),
                Err(e) => {
                    warn!(thread_id, delivered = delivered.len(), error = %e, "thread send failed; not registering");
                    return Err(PipelineError::Send { thread_id, reason: format!("{e:#}"), delivered });
                }
            }
        }

        let first = delivered.first().copied().ok_or(PipelineError::NoThreads)?;
        let at = PostLocation {
            source_url: req.link,
            platform: fetched.platform,
            thread_id: first.thread_id,
            message_id: first.message_id,
        };
        match self.guard.register(token, at).await {
            Ok(record) => Ok(PostOutcome::Posted { record, messages: delivered, fallback }),
            Err(source) => {
                warn!(guild_id = req.guild_id, delivered = delivered.len(), error = %source, "post went out but was not recorded");
                Err(PipelineError::Register { source, delivered })
            }
        }
    }
}
