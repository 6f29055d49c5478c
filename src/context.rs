use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::config::GuardCfg;
use crate::guard::DuplicateGuard;
use crate::index::SimilarityIndex;
use crate::store::{ImageStore, SqliteStore};

/// Everything the bot's commands need, built once at startup and passed in
/// explicitly.
pub struct AppContext {
    cfg: GuardCfg,
    store: Arc<dyn ImageStore>,
    guard: Arc<DuplicateGuard>,
}

impl AppContext {
    /// Open the configured SQLite store, migrate it and load the index.
    pub async fn connect(cfg: GuardCfg) -> Result<Self> {
        let url = cfg.database_url();
        let store = SqliteStore::connect(&url, cfg.max_connections)
            .await
            .with_context(|| format!("Failed to open image store at {url}"))?;
        Self::with_store(cfg, Arc::new(store)).await
    }

    pub async fn with_store(cfg: GuardCfg, store: Arc<dyn ImageStore>) -> Result<Self> {
        let index = SimilarityIndex::load(store.clone(), cfg.thresholds.phash)
            .await
            .context("Failed to load similarity index")?;
        let guard = Arc::new(DuplicateGuard::new(Arc::new(index), cfg.thresholds));
        Ok(Self { cfg, store, guard })
    }

    pub fn cfg(&self) -> &GuardCfg {
        &self.cfg
    }

    pub fn guard(&self) -> &Arc<DuplicateGuard> {
        &self.guard
    }

    pub fn store(&self) -> &Arc<dyn ImageStore> {
        &self.store
    }

    pub async fn shutdown(self) {
        self.store.close().await;
        info!("image store closed");
    }
}
