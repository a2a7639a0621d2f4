use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use dotenvy::dotenv;

use crate::{Error, Result};

const DEFAULT_SOURCE_URL: &str = "https://pelotainvernal.com/liga/dominicana-lidom";
const DEFAULT_DETAIL_URL: &str = "https://pelotainvernal.com/juego/{id}";
const DEFAULT_MARKER: &str = "new ViewModel(";
const DEFAULT_OUT_DIR: &str = "docs";
const DEFAULT_CONCURRENCY: usize = 4;
const DEFAULT_DELAY_MS: u64 = 250;
const DEFAULT_CHUNK_TARGET_BYTES: usize = 5 * 1024 * 1024;
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Options of one batch invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub concurrency: usize,
    /// Politeness pause a worker takes after each fetch.
    pub delay: Duration,
    pub shard_count: usize,
    pub shard_index: usize,
    /// If set to 0 the limit is set to usize::MAX
    pub batch_size: usize,
    pub overwrite: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            delay: Duration::from_millis(DEFAULT_DELAY_MS),
            shard_count: 1,
            shard_index: 0,
            batch_size: 0,
            overwrite: false,
        }
    }
}

impl RunConfig {
    pub fn batch_limit(&self) -> usize {
        if self.batch_size == 0 {
            usize::MAX
        } else {
            self.batch_size
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.shard_count == 0 {
            return Err(config_error("LIDOM_SHARD_COUNT", "0", "must be at least 1"));
        }
        if self.shard_index >= self.shard_count {
            return Err(config_error(
                "LIDOM_SHARD_INDEX",
                &self.shard_index.to_string(),
                &format!("must be below shard count {}", self.shard_count),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub source_url: String,
    pub results_url: Option<String>,
    /// Contains `{id}`.
    pub detail_url: String,
    pub marker: String,
    pub out_dir: PathBuf,
    pub timeout: Duration,
    pub chunk_target_bytes: usize,
    pub force_ids: Vec<u64>,
    pub run: RunConfig,
}

impl Config {
    /// Load configuration from environment variables, after an optional `.env`.
    pub fn from_env() -> Result<Self> {
        let _ = dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let text = |key: &str, default: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let run = RunConfig {
            concurrency: parsed(&lookup, "LIDOM_CONCURRENCY", DEFAULT_CONCURRENCY)?.max(1),
            delay: Duration::from_millis(parsed(&lookup, "LIDOM_DELAY_MS", DEFAULT_DELAY_MS)?),
            shard_count: parsed(&lookup, "LIDOM_SHARD_COUNT", 1)?,
            shard_index: parsed(&lookup, "LIDOM_SHARD_INDEX", 0)?,
            batch_size: parsed(&lookup, "LIDOM_BATCH_SIZE", 0)?,
            overwrite: flag(&lookup, "LIDOM_OVERWRITE")?,
        };
        run.validate()?;

        let force_ids = match lookup("LIDOM_FORCE_IDS") {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| {
                    s.parse::<u64>()
                        .map_err(|e| config_error("LIDOM_FORCE_IDS", s, &e.to_string()))
                })
                .collect::<Result<Vec<_>>>()?,
            None => Vec::new(),
        };

        let detail_url = text("LIDOM_DETAIL_URL", DEFAULT_DETAIL_URL);
        if !detail_url.contains("{id}") {
            return Err(config_error("LIDOM_DETAIL_URL", &detail_url, "must contain {id}"));
        }

        Ok(Self {
            source_url: text("LIDOM_SOURCE_URL", DEFAULT_SOURCE_URL),
            results_url: lookup("LIDOM_RESULTS_URL").filter(|v| !v.trim().is_empty()),
            detail_url,
            marker: text("LIDOM_MARKER", DEFAULT_MARKER),
            out_dir: PathBuf::from(text("LIDOM_OUT_DIR", DEFAULT_OUT_DIR)),
            timeout: Duration::from_secs(parsed(
                &lookup,
                "LIDOM_TIMEOUT_SECS",
                DEFAULT_TIMEOUT_SECS,
            )?),
            chunk_target_bytes: parsed(
                &lookup,
                "LIDOM_CHUNK_TARGET_BYTES",
                DEFAULT_CHUNK_TARGET_BYTES,
            )?,
            force_ids,
            run,
        })
    }
}

fn config_error(key: &str, value: &str, reason: &str) -> Error {
    Error::Config {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parsed<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| config_error(key, &raw, &e.to_string())),
        _ => Ok(default),
    }
}

fn flag(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<bool> {
    match lookup(key).map(|v| v.trim().to_ascii_lowercase()).as_deref() {
        None | Some("" | "0" | "false" | "no") => Ok(false),
        Some("1" | "true" | "yes") => Ok(true),
        Some(other) => Err(config_error(key, other, "expected 1/0 or true/false")),
    }
}
