//! Configuration (§6.4, ambient). A small TOML document loaded with `serde`,
//! the way the teacher crate's own CLI config loads its `spacetime.toml` —
//! scaled down to the handful of keys this engine actually has, rather than
//! the CLI's full schema/merge machinery, which solves a much larger problem
//! (layering CLI flags over multiple config files) this crate doesn't have.

use std::env;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file `{path}`")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file `{path}`")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Deserialize)]
struct RawConfig {
    edges: RawEdges,
    db: RawDb,
    #[serde(default)]
    errors: RawErrors,
}

#[derive(Debug, Clone, Deserialize)]
struct RawEdges {
    db_name: String,
}

#[derive(Debug, Clone, Deserialize)]
struct RawDb {
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawErrors {
    #[serde(default = "default_deadlock_retries")]
    deadlock_retries: u32,
}

fn default_deadlock_retries() -> u32 {
    3
}

impl Default for RawErrors {
    fn default() -> Self {
        Self {
            deadlock_retries: default_deadlock_retries(),
        }
    }
}

/// Runtime configuration for one [`crate::shard::Shard`].
#[derive(Debug, Clone)]
pub struct ShardConfig {
    /// Logical database/table-prefix name for this shard's edges table.
    pub db_name: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// How many times `atomically` retries a transaction that failed with
    /// `ExecutorError::Deadlock` before giving up (§4.1, §7).
    pub deadlock_retries: u32,
}

impl ShardConfig {
    /// Loads config from a TOML file, then overrides `username`/`password`
    /// from `SHARDSTORE_DB_USERNAME` / `SHARDSTORE_DB_PASSWORD` if set, so
    /// credentials never need to live in a checked-in file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let raw: RawConfig = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self::from_raw(raw))
    }

    fn from_raw(raw: RawConfig) -> Self {
        let username = env::var("SHARDSTORE_DB_USERNAME").ok().or(raw.db.username);
        let password = env::var("SHARDSTORE_DB_PASSWORD").ok().or(raw.db.password);
        Self {
            db_name: raw.edges.db_name,
            username,
            password,
            deadlock_retries: raw.errors.deadlock_retries,
        }
    }

    /// A config suitable for tests: an in-memory database, default retries.
    pub fn in_memory(db_name: impl Into<String>) -> Self {
        Self {
            db_name: db_name.into(),
            username: None,
            password: None,
            deadlock_retries: default_deadlock_retries(),
        }
    }
}
