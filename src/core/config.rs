//! Configuration system: TOML file + env var overrides + defaults.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, TlsError};

/// Largest page a Mastodon-compatible server accepts for any timeline kind.
pub const MAX_PAGE_SIZE: usize = 80;

/// Full tlsync configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Config {
    pub paging: PagingConfig,
    pub cache: CacheConfig,
    pub filters: FilterConfig,
    pub logging: LoggingConfig,
    pub paths: PathsConfig,
}

/// Page size and fetch worker pool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PagingConfig {
    /// Items requested per page; a response this long is a full fetch.
    pub page_size: usize,
    /// Threads that call the page source.
    pub worker_threads: usize,
    /// Pending requests the worker queue accepts before dispatch is refused.
    pub queue_capacity: usize,
    /// Suppress a second Middle fetch for a gap that already has one in flight.
    pub dedupe_gap_fetches: bool,
}

/// Home-feed disk cache.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Cached entries older than this are pruned on open.
    pub retention_days: u32,
    /// Local account the cached rows belong to.
    pub account_id: i64,
}

/// Content filters applied to fetched pages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FilterConfig {
    pub show_replies: bool,
    pub show_reblogs: bool,
}

/// Activity log tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    pub enabled: bool,
    pub jsonl_max_bytes: u64,
    pub jsonl_max_rotated: u32,
    pub fsync_interval_secs: u64,
    pub channel_capacity: usize,
}

/// Filesystem paths used by tlsync.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub config_file: PathBuf,
    pub cache_db: PathBuf,
    pub activity_db: PathBuf,
    pub jsonl_log: PathBuf,
}

impl Default for PagingConfig {
    fn default() -> Self {
        Self {
            page_size: 30,
            worker_threads: 2,
            queue_capacity: 64,
            dedupe_gap_fetches: true,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            retention_days: 14,
            account_id: 1,
        }
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            show_replies: true,
            show_reblogs: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            jsonl_max_bytes: 10 * 1024 * 1024,
            jsonl_max_rotated: 3,
            fsync_interval_secs: 10,
            channel_capacity: 1024,
        }
    }
}

fn home_dir() -> PathBuf {
    env::var_os("HOME").map_or_else(
        || {
            eprintln!("[TLS-CONFIG] WARNING: HOME not set, falling back to /tmp for data paths");
            PathBuf::from("/tmp")
        },
        PathBuf::from,
    )
}

impl Default for PathsConfig {
    fn default() -> Self {
        let home = home_dir();
        let data = home.join(".local").join("share").join("tlsync");
        Self {
            config_file: home.join(".config").join("tlsync").join("config.toml"),
            cache_db: data.join("timeline-cache.sqlite3"),
            activity_db: data.join("activity.sqlite3"),
            jsonl_log: data.join("activity.jsonl"),
        }
    }
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathsConfig::default().config_file
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| TlsError::Io {
                path: path_buf.clone(),
                source,
            })?;
            toml::from_str::<Self>(&raw)?
        } else if path.is_some() {
            return Err(TlsError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides_from(env_var)?;
        cfg.normalize_paths(&home_dir());
        cfg.validate()?;
        Ok(cfg)
    }

    /// Deterministic hash of the effective config for logging.
    ///
    /// FNV-1a over the canonical JSON form, stable across processes.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("TLSYNC_PAGE_SIZE") {
            self.paging.page_size = parse_env("TLSYNC_PAGE_SIZE", &raw)?;
        }
        if let Some(raw) = lookup("TLSYNC_WORKER_THREADS") {
            self.paging.worker_threads = parse_env("TLSYNC_WORKER_THREADS", &raw)?;
        }
        if let Some(raw) = lookup("TLSYNC_CACHE_ENABLED") {
            self.cache.enabled = parse_env("TLSYNC_CACHE_ENABLED", &raw)?;
        }
        if let Some(raw) = lookup("TLSYNC_RETENTION_DAYS") {
            self.cache.retention_days = parse_env("TLSYNC_RETENTION_DAYS", &raw)?;
        }
        if let Some(raw) = lookup("TLSYNC_SHOW_REPLIES") {
            self.filters.show_replies = parse_env("TLSYNC_SHOW_REPLIES", &raw)?;
        }
        if let Some(raw) = lookup("TLSYNC_SHOW_REBLOGS") {
            self.filters.show_reblogs = parse_env("TLSYNC_SHOW_REBLOGS", &raw)?;
        }
        if let Some(raw) = lookup("TLSYNC_LOGGING_ENABLED") {
            self.logging.enabled = parse_env("TLSYNC_LOGGING_ENABLED", &raw)?;
        }
        if let Some(raw) = lookup("TLSYNC_CACHE_DB") {
            self.paths.cache_db = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("TLSYNC_ACTIVITY_DB") {
            self.paths.activity_db = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("TLSYNC_JSONL_PATH") {
            self.paths.jsonl_log = PathBuf::from(raw);
        }
        Ok(())
    }

    /// Expand a leading `~/` in every configured path.
    fn normalize_paths(&mut self, home: &Path) {
        for path in [
            &mut self.paths.cache_db,
            &mut self.paths.activity_db,
            &mut self.paths.jsonl_log,
        ] {
            if let Ok(rest) = path.strip_prefix("~") {
                *path = home.join(rest);
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if !(1..=MAX_PAGE_SIZE).contains(&self.paging.page_size) {
            return Err(TlsError::InvalidConfig {
                details: format!(
                    "paging.page_size must be in [1, {MAX_PAGE_SIZE}], got {}",
                    self.paging.page_size
                ),
            });
        }
        if !(1..=16).contains(&self.paging.worker_threads) {
            return Err(TlsError::InvalidConfig {
                details: format!(
                    "paging.worker_threads must be in [1, 16], got {}",
                    self.paging.worker_threads
                ),
            });
        }
        if self.paging.queue_capacity == 0 {
            return Err(TlsError::InvalidConfig {
                details: "paging.queue_capacity must be > 0".to_string(),
            });
        }
        if self.cache.retention_days == 0 {
            return Err(TlsError::InvalidConfig {
                details: "cache.retention_days must be > 0".to_string(),
            });
        }
        if self.logging.jsonl_max_rotated == 0 {
            return Err(TlsError::InvalidConfig {
                details: "logging.jsonl_max_rotated must be >= 1".to_string(),
            });
        }
        if self.logging.channel_capacity == 0 {
            return Err(TlsError::InvalidConfig {
                details: "logging.channel_capacity must be > 0".to_string(),
            });
        }
        if self.cache.enabled && self.paths.cache_db.as_os_str().is_empty() {
            return Err(TlsError::InvalidConfig {
                details: "paths.cache_db must be set when the cache is enabled".to_string(),
            });
        }
        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn parse_env<T>(name: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse::<T>().map_err(|error| TlsError::ConfigParse {
        context: "env",
        details: format!("{name}={raw:?}: {error}"),
    })
}

#[cfg(test)]
mod tests {
    use super::{Config, TlsError};
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(name, value)| ((*name).to_string(), (*value).to_string()))
            .collect()
    }

    #[test]
    fn default_config_is_valid() {
        let cfg = Config::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.paging.page_size, 30);
        assert_eq!(cfg.cache.retention_days, 14);
    }

    #[test]
    fn page_size_out_of_range_rejected() {
        let mut cfg = Config::default();
        cfg.paging.page_size = 0;
        let err = cfg.validate().expect_err("expected invalid page size");
        match err {
            TlsError::InvalidConfig { details } => {
                assert!(details.contains("paging.page_size"));
            }
            other => panic!("unexpected error: {other}"),
        }

        cfg.paging.page_size = 81;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_workers_rejected() {
        let mut cfg = Config::default();
        cfg.paging.worker_threads = 0;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("worker_threads"));
    }

    #[test]
    fn zero_retention_rejected() {
        let mut cfg = Config::default();
        cfg.cache.retention_days = 0;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("retention_days"));
    }

    #[test]
    fn enabled_cache_requires_db_path() {
        let mut cfg = Config::default();
        cfg.paths.cache_db = PathBuf::new();
        assert!(cfg.validate().is_err());
        cfg.cache.enabled = false;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn env_overrides_apply() {
        let env = vars(&[
            ("TLSYNC_PAGE_SIZE", "40"),
            ("TLSYNC_SHOW_REBLOGS", "false"),
            ("TLSYNC_CACHE_DB", "/var/tmp/feed.sqlite3"),
        ]);
        let mut cfg = Config::default();
        cfg.apply_env_overrides_from(|name| env.get(name).cloned())
            .expect("overrides should apply");
        assert_eq!(cfg.paging.page_size, 40);
        assert!(!cfg.filters.show_reblogs);
        assert!(cfg.filters.show_replies);
        assert_eq!(cfg.paths.cache_db, PathBuf::from("/var/tmp/feed.sqlite3"));
    }

    #[test]
    fn env_invalid_value_rejected() {
        let env = vars(&[("TLSYNC_CACHE_ENABLED", "maybe")]);
        let mut cfg = Config::default();
        let err = cfg
            .apply_env_overrides_from(|name| env.get(name).cloned())
            .expect_err("expected parse failure");
        assert!(matches!(err, TlsError::ConfigParse { context: "env", .. }));
        assert!(err.to_string().contains("TLSYNC_CACHE_ENABLED"));
    }

    #[test]
    fn normalize_paths_expands_tilde() {
        let mut cfg = Config::default();
        cfg.paths.cache_db = PathBuf::from("~/feeds/home.sqlite3");
        cfg.paths.jsonl_log = PathBuf::from("/abs/activity.jsonl");
        cfg.normalize_paths(Path::new("/home/alice"));
        assert_eq!(
            cfg.paths.cache_db,
            PathBuf::from("/home/alice/feeds/home.sqlite3")
        );
        assert_eq!(cfg.paths.jsonl_log, PathBuf::from("/abs/activity.jsonl"));
    }

    #[test]
    fn load_returns_error_for_explicit_missing_path() {
        let err = Config::load(Some(Path::new("/nonexistent/tlsync/config.toml"))).unwrap_err();
        assert!(matches!(err, TlsError::MissingConfig { .. }));
    }

    #[test]
    fn load_reads_partial_toml() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[paging]\npage_size = 20\n\n[filters]\nshow_replies = false\n")
            .expect("write config");
        let cfg = Config::load(Some(&path)).expect("config should load");
        assert_eq!(cfg.paging.page_size, 20);
        assert_eq!(cfg.paging.worker_threads, 2);
        assert!(!cfg.filters.show_replies);
        assert_eq!(cfg.paths.config_file, path);
    }

    #[test]
    fn load_rejects_malformed_toml() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[paging\npage_size = ").expect("write config");
        let err = Config::load(Some(&path)).unwrap_err();
        assert_eq!(err.code(), "TLS-1003");
    }

    #[test]
    fn stable_hash_changes_when_config_changes() {
        let cfg = Config::default();
        let before = cfg.stable_hash().expect("hash");
        assert_eq!(before, cfg.stable_hash().expect("hash"));
        let mut changed = cfg;
        changed.paging.page_size = 31;
        assert_ne!(before, changed.stable_hash().expect("hash"));
    }
}
