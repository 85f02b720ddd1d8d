//! Configuration for a share's RQ tree.
//!
//! Persisted as TOML, loadable from a path or usable standalone via
//! [`ShareConfig::default`] (used heavily in tests).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Configuration recognized by a share's RQ tree.
///
/// Every field has the default named in §6 of the component design, plus the
/// operational fields (`remote_base_url`, `request_timeout_ms`,
/// `purge_after_failures`) a running share needs but that the distilled
/// design left implicit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShareConfig {
    /// Lifetime of a remote folder listing in the list cache, in milliseconds.
    pub content_cache_ttl_ms: u64,

    /// Chunk size for the chunked uploader, in megabytes.
    pub chunk_upload_size_mb: u64,

    /// Maximum per-chunk retry attempts before the upload fails.
    pub max_retries: u32,

    /// Delay between chunk retry attempts, in milliseconds.
    pub retry_delay_ms: u64,

    /// Directory used for request-queue persistence and work-files.
    pub work_path: PathBuf,

    /// Disables the sync processor (for test harnesses).
    pub noprocessor: bool,

    /// Disables Unicode canonical-decomposition path normalization.
    pub no_unicode_normalize: bool,

    /// Base URL of the remote asset API.
    pub remote_base_url: String,

    /// Timeout for an individual HTTP request, in milliseconds.
    pub request_timeout_ms: u64,

    /// Number of consecutive global sync failures before a queue entry is purged.
    pub purge_after_failures: u32,

    /// Sync processor drain cadence, in milliseconds.
    pub sync_interval_ms: u64,
}

impl Default for ShareConfig {
    fn default() -> Self {
        Self {
            content_cache_ttl_ms: 30_000,
            chunk_upload_size_mb: 10,
            max_retries: 3,
            retry_delay_ms: 3_000,
            work_path: default_work_path(),
            noprocessor: false,
            no_unicode_normalize: false,
            remote_base_url: String::new(),
            request_timeout_ms: 30_000,
            purge_after_failures: 5,
            sync_interval_ms: 5_000,
        }
    }
}

/// The work-path default: `<user cache dir>/rq-tree`, falling back to a
/// relative `.rqwork` directory when no cache dir can be resolved (e.g. a
/// minimal container environment).
fn default_work_path() -> PathBuf {
    dirs::cache_dir()
        .map(|dir| dir.join("rq-tree"))
        .unwrap_or_else(|| PathBuf::from(".rqwork"))
}

impl ShareConfig {
    /// The default location of a share's own config file:
    /// `<user config dir>/rq-tree/config.toml`.
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("rq-tree").join("config.toml"))
    }

    /// Loads configuration from a TOML file at `path`.
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Saves configuration as TOML to `path`, creating parent directories as needed.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// `content_cache_ttl_ms` as a [`Duration`].
    pub fn content_cache_ttl(&self) -> Duration {
        Duration::from_millis(self.content_cache_ttl_ms)
    }

    /// `chunk_upload_size_mb` as a byte count.
    pub fn chunk_upload_size_bytes(&self) -> u64 {
        self.chunk_upload_size_mb * 1024 * 1024
    }

    /// `retry_delay_ms` as a [`Duration`].
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// `request_timeout_ms` as a [`Duration`].
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// `sync_interval_ms` as a [`Duration`].
    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms)
    }
}
