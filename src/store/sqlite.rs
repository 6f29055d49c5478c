use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite};

use super::{ImageStore, StoredFingerprint};
use crate::error::Result;
use crate::models::{ImageRecord, NewImage};

// Keeps each IN (...) well under SQLite's bind parameter limit.
const FETCH_CHUNK: usize = 500;

#[derive(Debug, sqlx::FromRow)]
struct ImageRow {
    id: i64,
    phash: String,
    dhash: String,
    source_url: String,
    source_platform: String,
    guild_id: i64,
    thread_id: i64,
    message_id: i64,
    posted_at: DateTime<Utc>,
}

// Discord snowflakes are stored as the bit-identical i64.
impl From<ImageRow> for ImageRecord {
    fn from(row: ImageRow) -> Self {
        Self {
            id: row.id,
            phash: row.phash,
            dhash: row.dhash,
            source_url: row.source_url,
            source_platform: row.source_platform.parse().unwrap_or(crate::models::Platform::Unknown),
            guild_id: row.guild_id as u64,
            thread_id: row.thread_id as u64,
            message_id: row.message_id as u64,
            posted_at: row.posted_at,
        }
    }
}

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect to a sqlx SQLite URL (`sqlite://path.db`, `sqlite::memory:`) and migrate.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let opts = SqliteConnectOptions::from_str(url)?;
        // Every connection to :memory: is its own database, so keep exactly one alive.
        if url.contains(":memory:") {
            let pool_opts = SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
            return Self::connect_with(opts, pool_opts).await;
        }
        Self::connect_with(opts, SqlitePoolOptions::new().max_connections(max_connections.max(1))).await
    }

    pub async fn open(path: &Path, max_connections: u32) -> Result<Self> {
        let opts = SqliteConnectOptions::new().filename(path);
        Self::connect_with(opts, SqlitePoolOptions::new().max_connections(max_connections.max(1))).await
    }

    async fn connect_with(opts: SqliteConnectOptions, pool_opts: SqlitePoolOptions) -> Result<Self> {
        let opts = opts.create_if_missing(true).journal_mode(SqliteJournalMode::Wal);
        let max_connections = pool_opts.get_max_connections();
        let pool = pool_opts.connect_with(opts).await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        tracing::info!(max_connections, "image store connected and migrations applied");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl ImageStore for SqliteStore {
    async fn insert(&self, image: NewImage) -> Result<ImageRecord> {
        let row: ImageRow = sqlx::query_as(
            "INSERT INTO images (phash, dhash, source_url, source_platform, guild_id, thread_id, message_id, posted_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING id, phash, dhash, source_url, source_platform, guild_id, thread_id, message_id, posted_at",
        )
        .bind(image.phash.to_hex())
        .bind(image.dhash.to_hex())
        .bind(&image.source_url)
        .bind(image.source_platform.as_str())
        .bind(image.guild_id as i64)
        .bind(image.thread_id as i64)
        .bind(image.message_id as i64)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn load_fingerprints(&self) -> Result<Vec<StoredFingerprint>> {
        let rows: Vec<(i64, String)> = sqlx::query_as("SELECT id, phash FROM images ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|(id, phash)| StoredFingerprint { id, phash })
            .collect())
    }

    async fn fetch(&self, ids: &[i64]) -> Result<Vec<ImageRecord>> {
        let mut out = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(FETCH_CHUNK) {
            let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
                "SELECT id, phash, dhash, source_url, source_platform, guild_id, thread_id, message_id, posted_at
                 FROM images WHERE id IN (",
            );
            let mut sep = qb.separated(", ");
            for id in chunk {
                sep.push_bind(*id);
            }
            sep.push_unseparated(")");

            let rows: Vec<ImageRow> = qb.build_query_as().fetch_all(&self.pool).await?;
            out.extend(rows.into_iter().map(ImageRecord::from));
        }
        out.sort_by_key(|r| r.id);
        Ok(out)
    }

    async fn count(&self) -> Result<u64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM images")
            .fetch_one(&self.pool)
            .await?;
        Ok(n as u64)
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
