use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Maximum Hamming distances (out of 64 bits) for two images to count as the same.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub phash: u32,
    pub dhash: u32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self { phash: 8, dhash: 10 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardCfg {
    /// SQLite file holding the image records.
    pub db_path: PathBuf,
    /// Full sqlx URL; wins over `db_path` when set.
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub thresholds: Thresholds,
}

impl Default for GuardCfg {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("artguard.db"),
            database_url: None,
            max_connections: 5,
            thresholds: Thresholds::default(),
        }
    }
}

impl GuardCfg {
    /// Defaults, then the YAML file if given, then `ARTGUARD_*` env overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let cfg = match path {
            Some(p) => {
                let txt = std::fs::read_to_string(p)
                    .with_context(|| format!("Failed to read config file: {}", p.display()))?;
                Self::from_yaml(&txt)?
            }
            None => Self::default(),
        };
        Ok(cfg.with_env())
    }

    pub fn from_yaml(txt: &str) -> Result<Self> {
        serde_yaml::from_str(txt).context("Failed to parse config YAML")
    }

    pub fn with_env(self) -> Self {
        self.with_vars(|k| std::env::var(k).ok())
    }

    fn with_vars(mut self, var: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(p) = var("ARTGUARD_DB_PATH") { self.db_path = PathBuf::from(p); }
        if let Some(url) = var("DATABASE_URL") { self.database_url = Some(url); }
        if let Some(n) = var("ARTGUARD_MAX_CONNECTIONS").and_then(|v| v.parse().ok()) { self.max_connections = n; }
        if let Some(t) = var("ARTGUARD_PHASH_THRESH").and_then(|v| v.parse().ok()) { self.thresholds.phash = t; }
        if let Some(t) = var("ARTGUARD_DHASH_THRESH").and_then(|v| v.parse().ok()) { self.thresholds.dhash = t; }
        self
    }

    pub fn database_url(&self) -> String {
        match &self.database_url {
            Some(url) => url.clone(),
            None => format!("sqlite://{}", self.db_path.display()),
        }
    }
}
