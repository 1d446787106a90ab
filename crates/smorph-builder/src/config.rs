//! Encode cache configuration.

use directories::ProjectDirs;
use std::path::PathBuf;
use std::time::Duration;

/// Limits and location of the encode cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Directory for cache files; `None` keeps results in memory only (default: None)
    pub cache_dir: Option<PathBuf>,
    /// Cached entries of any other version are recomputed
    /// (default: [`smorph_analysis::ENCODER_VERSION`])
    pub encoder_version: String,
    /// Memory estimate above which oldest entries are dropped (default: 256MB)
    pub max_memory_bytes: usize,
    /// Entries not read during this many lookups are dropped (default: 1000)
    pub max_stamp_age: u64,
    /// Files older than this are deleted (default: 30 days)
    pub max_file_age: Duration,
    /// Maximum number of cache files (default: 1000)
    pub max_files: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            encoder_version: smorph_analysis::ENCODER_VERSION.to_string(),
            max_memory_bytes: 256 * 1024 * 1024,
            max_stamp_age: 1000,
            max_file_age: Duration::from_secs(30 * 24 * 60 * 60),
            max_files: 1000,
        }
    }
}

impl CacheConfig {
    /// Default config persisting to the per-user cache directory.
    ///
    /// Falls back to memory only if the platform has no home directory.
    pub fn user_cache() -> Self {
        let cache_dir = ProjectDirs::from("org", "smorph", "smorph")
            .map(|dirs| dirs.cache_dir().join("inst-enc"));
        Self {
            cache_dir,
            ..Default::default()
        }
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    pub fn with_encoder_version(mut self, version: impl Into<String>) -> Self {
        self.encoder_version = version.into();
        self
    }

    pub fn with_max_memory_bytes(mut self, bytes: usize) -> Self {
        self.max_memory_bytes = bytes;
        self
    }

    pub fn with_max_stamp_age(mut self, age: u64) -> Self {
        self.max_stamp_age = age;
        self
    }

    pub fn with_max_file_age(mut self, age: Duration) -> Self {
        self.max_file_age = age;
        self
    }

    pub fn with_max_files(mut self, max_files: usize) -> Self {
        self.max_files = max_files;
        self
    }
}
