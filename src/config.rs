//! Configuration for the gallery scanner

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::error::ScanError;

/// Default size of the first emitted batch
pub const DEFAULT_INITIAL_BATCH_SIZE: usize = 10;

/// Default upper bound for the batch size ramp
pub const DEFAULT_MAX_BATCH_SIZE: usize = 100;

/// Default growth of the batch size after each emitted batch
pub const DEFAULT_BATCH_SIZE_STEP: usize = 10;

/// Default number of cache-miss records between store writes
pub const DEFAULT_FLUSH_INTERVAL: usize = 50;

/// Default tolerance when comparing modification times (seconds)
pub const DEFAULT_MTIME_EPSILON: f64 = 0.05;

/// Default number of scan worker threads
pub const DEFAULT_NUM_THREADS: usize = 2;

/// Default time the coordinator waits for an aborted task to unwind
pub const DEFAULT_ABORT_GRACE_MS: u64 = 50;

/// Default number of directories kept in the history list
pub const DEFAULT_HISTORY_LIMIT: usize = 25;

/// Application directory name under the per-user data directory
pub const APP_DIR_NAME: &str = "gallery_scanner";

/// File name of the metadata cache
pub const DB_FILE_NAME: &str = "metadata_cache.db";

/// Configuration for the scanner
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Image extensions to include (lowercase, without dot)
    pub extensions: HashSet<String>,

    /// Directory names skipped during recursive walks
    pub ignore_dirs: HashSet<String>,

    /// Whether symbolic links to directories are followed
    pub follow_links: bool,

    /// Maximum depth for recursive scanning, `None` walks the full subtree
    pub max_depth: Option<usize>,

    /// Size of the first batch event
    pub initial_batch_size: usize,

    /// Largest batch size the ramp grows to
    pub max_batch_size: usize,

    /// Batch size increment after each emitted batch
    pub batch_size_step: usize,

    /// Number of decoded records buffered before writing to the store
    pub flush_interval: usize,

    /// Tolerance in seconds when comparing cached and on-disk mtimes
    pub mtime_epsilon: f64,

    /// Number of scan worker threads
    pub num_threads: usize,

    /// Milliseconds to wait for a superseded task before moving on
    pub abort_grace_ms: u64,

    /// Number of directories kept in the history list
    pub history_limit: usize,

    /// Metadata store path, `None` uses the per-user data directory
    pub db_path: Option<PathBuf>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            extensions: Self::default_extensions(),
            ignore_dirs: HashSet::new(),
            follow_links: false,
            max_depth: None,
            initial_batch_size: DEFAULT_INITIAL_BATCH_SIZE,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            batch_size_step: DEFAULT_BATCH_SIZE_STEP,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            mtime_epsilon: DEFAULT_MTIME_EPSILON,
            num_threads: DEFAULT_NUM_THREADS,
            abort_grace_ms: DEFAULT_ABORT_GRACE_MS,
            history_limit: DEFAULT_HISTORY_LIMIT,
            db_path: None,
        }
    }
}

impl ScanConfig {
    /// Create a config builder
    pub fn builder() -> ScanConfigBuilder {
        ScanConfigBuilder::new()
    }

    /// Load a config from a JSON file; missing fields take their defaults
    pub fn from_json_file(path: &Path) -> Result<Self, ScanError> {
        let text = std::fs::read_to_string(path).map_err(|e| ScanError::from(e).with_path(path))?;
        let mut config: ScanConfig = serde_json::from_str(&text)?;
        config.normalize_extensions();
        config.validate()?;
        Ok(config)
    }

    /// Lowercase extensions and strip a leading dot, as the matcher expects
    pub fn normalize_extensions(&mut self) {
        self.extensions = self
            .extensions
            .drain()
            .map(|e| e.trim_start_matches('.').to_lowercase())
            .filter(|e| !e.is_empty())
            .collect();
    }

    /// Get the default image extensions
    pub fn default_extensions() -> HashSet<String> {
        ["jpg", "jpeg", "png", "gif", "bmp", "tiff", "webp", "ico"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    /// Check if an extension should be included
    pub fn should_include_extension(&self, ext: &str) -> bool {
        self.extensions.contains(&ext.to_lowercase())
    }

    /// Check if a file path has a recognized image extension
    pub fn is_image_path(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| self.should_include_extension(e))
            .unwrap_or(false)
    }

    /// Check if a directory should be skipped
    pub fn should_ignore_dir(&self, name: &str) -> bool {
        self.ignore_dirs.contains(name)
    }

    /// Get the effective max depth for walkdir
    ///
    /// Depth 0 is the scan root itself, so a non-recursive scan only
    /// visits the root directory.
    pub fn effective_max_depth(&self, recursive: bool) -> usize {
        if !recursive {
            0
        } else {
            self.max_depth.unwrap_or(usize::MAX)
        }
    }

    /// Get the metadata store path, falling back to the per-user data directory
    pub fn effective_db_path(&self) -> Option<PathBuf> {
        self.db_path
            .clone()
            .or_else(crate::db::MetadataStore::default_path)
    }

    /// Reject values that would stall or break a scan
    pub fn validate(&self) -> Result<(), ScanError> {
        if self.initial_batch_size == 0 || self.max_batch_size == 0 {
            return Err(ScanError::config_error("batch sizes must be greater than zero"));
        }
        if self.initial_batch_size > self.max_batch_size {
            return Err(ScanError::config_error(format!(
                "initial batch size {} exceeds max batch size {}",
                self.initial_batch_size, self.max_batch_size
            )));
        }
        if self.flush_interval == 0 {
            return Err(ScanError::config_error("flush interval must be greater than zero"));
        }
        if self.num_threads == 0 {
            return Err(ScanError::config_error("at least one worker thread is required"));
        }
        if !self.mtime_epsilon.is_finite() || self.mtime_epsilon < 0.0 {
            return Err(ScanError::config_error(format!(
                "invalid mtime epsilon: {}",
                self.mtime_epsilon
            )));
        }
        Ok(())
    }
}

/// Builder for ScanConfig
#[derive(Debug, Default)]
pub struct ScanConfigBuilder {
    config: ScanConfig,
}

impl ScanConfigBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the extensions whitelist
    pub fn extensions(mut self, extensions: HashSet<String>) -> Self {
        self.config.extensions = extensions;
        self
    }

    /// Add an extension to the whitelist
    pub fn add_extension(mut self, ext: impl Into<String>) -> Self {
        self.config.extensions.insert(ext.into().to_lowercase());
        self
    }

    /// Add a directory to ignore
    pub fn add_ignore_dir(mut self, dir: impl Into<String>) -> Self {
        self.config.ignore_dirs.insert(dir.into());
        self
    }

    /// Follow symbolic links while walking
    pub fn follow_links(mut self, enabled: bool) -> Self {
        self.config.follow_links = enabled;
        self
    }

    /// Limit the depth of recursive scans
    pub fn max_depth(mut self, depth: usize) -> Self {
        self.config.max_depth = Some(depth);
        self
    }

    /// Set the batch size ramp
    pub fn batch_sizes(mut self, initial: usize, max: usize, step: usize) -> Self {
        self.config.initial_batch_size = initial;
        self.config.max_batch_size = max;
        self.config.batch_size_step = step;
        self
    }

    /// Set the number of decoded records buffered per store write
    pub fn flush_interval(mut self, interval: usize) -> Self {
        self.config.flush_interval = interval;
        self
    }

    /// Set the mtime comparison tolerance
    pub fn mtime_epsilon(mut self, epsilon: f64) -> Self {
        self.config.mtime_epsilon = epsilon;
        self
    }

    /// Set the number of worker threads
    pub fn num_threads(mut self, threads: usize) -> Self {
        self.config.num_threads = threads;
        self
    }

    /// Set the abort grace period
    pub fn abort_grace_ms(mut self, ms: u64) -> Self {
        self.config.abort_grace_ms = ms;
        self
    }

    /// Set the history list capacity
    pub fn history_limit(mut self, limit: usize) -> Self {
        self.config.history_limit = limit;
        self
    }

    /// Set the database path
    pub fn db_path(mut self, path: PathBuf) -> Self {
        self.config.db_path = Some(path);
        self
    }

    /// Build the config
    pub fn build(mut self) -> ScanConfig {
        self.config.normalize_extensions();
        self.config
    }
}
